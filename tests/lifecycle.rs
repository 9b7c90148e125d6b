//! Entity lifecycle: create, store, reload, soft delete, delete.

#[macro_use]
mod common;

use chrono::{Duration, TimeZone, Utc};
use common::InstrumentedStore;
use entity_store::storage::{Document, DocumentStore, MemoryStore, SaveMode, StoreError};
use entity_store::{Entities, EntityDefinition, EntityError, GrabOptions, Hooks, Value};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

async fn people(store: Arc<MemoryStore>) -> Result<Arc<EntityDefinition>, EntityError> {
    let entities = Entities::new(store);
    let mut person = entities.define("person").await?;
    person.define_index("age", "integer")?;
    person.define_index("name", "string")?.case_insensitive();
    person.define_index("born", "date")?;
    person.define_index("tags", "string")?;
    entities.register(person).await
}

#[tokio::test]
async fn stored_entities_round_trip() -> Result<(), EntityError> {
    let store = Arc::new(MemoryStore::new());
    let person = people(store.clone()).await?;

    let born = Utc.with_ymd_and_hms(1990, 6, 15, 8, 30, 0).unwrap();
    let mut ann = person.create(values! {
        "name" => "Ann",
        "age" => "31",
        "born" => born,
        "tags" => vec!["Red", "blue"],
        "notes" => json!({ "likes": ["tea"], "score": 4.5 }),
        "_scratch" => "not persisted",
    })?;
    assert!(ann.is_new());
    ann.store().await?;
    let oid = ann.oid().expect("oid after store");

    let raw = store.document("person", oid).await.expect("stored document");
    assert_eq!(raw["_id"], json!(oid));
    assert_eq!(raw["age"], json!(31));
    assert_eq!(raw["name"], json!("ann"));
    assert_eq!(raw["born"], json!("1990-06-15T08:30:00.000Z"));
    assert_eq!(raw["tags"], json!(["Red", "blue"]));
    assert!(raw.get("__deletedAt").is_none());

    let loaded = person.find_by_oid(oid).await?.expect("reloaded");
    assert_eq!(loaded.oid(), Some(oid));
    assert_eq!(loaded.get("name"), Some(&Value::from("Ann")));
    assert_eq!(loaded.get("age"), Some(&Value::from("31")));
    assert_eq!(loaded.get("born"), Some(&Value::Date(born)));
    assert_eq!(loaded.get("notes"), ann.get("notes"));
    assert_eq!(loaded.get("_scratch"), None);
    Ok(())
}

#[tokio::test]
async fn later_stores_update_in_place() -> Result<(), EntityError> {
    let store = Arc::new(MemoryStore::new());
    let person = people(store.clone()).await?;

    let mut bob = person.create(values! { "name" => "Bob", "age" => 40 })?;
    bob.store().await?;
    let oid = bob.oid();
    bob.set("age", 41);
    bob.store().await?;

    assert_eq!(bob.oid(), oid);
    assert_eq!(store.len("person").await, 1);
    let reloaded = person.query().matching("age").equals(41).grab_one().await?;
    assert_eq!(reloaded.and_then(|e| e.oid()), oid);
    Ok(())
}

#[tokio::test]
async fn hooks_run_in_lifecycle_order() -> Result<(), EntityError> {
    let events = Arc::new(Mutex::new(Vec::<String>::new()));
    let log = |name: &'static str| {
        let events = events.clone();
        move |_: &mut entity_store::Entity| -> anyhow::Result<()> {
            events.lock().unwrap().push(name.to_string());
            Ok(())
        }
    };

    let entities = Entities::in_memory();
    let mut note = entities.define("note").await?;
    note.define_index("title", "string")?;
    let construct_events = events.clone();
    note.set_hooks(
        Hooks::new()
            .defaults(log("defaults"))
            .construct(move |entity, values| {
                construct_events.lock().unwrap().push("construct".to_string());
                if let Some(title) = values.get("title").and_then(Value::as_str) {
                    entity.set("title", title.to_uppercase());
                }
                Ok(())
            })
            .before_store(log("before_store"))
            .after_store(log("after_store"))
            .on_load(log("on_load"))
            .before_delete(log("before_delete")),
    );
    let note = entities.register(note).await?;

    let mut first = note.create(values! { "title" => "hello", "extra" => 1 })?;
    // The construct hook took the values, so nothing else was merged.
    assert_eq!(first.get("title"), Some(&Value::from("HELLO")));
    assert_eq!(first.get("extra"), None);
    first.store().await?;
    let oid = first.oid().unwrap();

    let loaded = note.find_by_oid(oid).await?.unwrap();
    loaded.delete().await?;

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "defaults",
            "construct",
            "before_store",
            "after_store",
            "defaults",
            "construct",
            "on_load",
            "before_delete",
        ]
    );
    assert!(note.find_by_oid(oid).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn values_merge_after_a_value_less_construct() -> Result<(), EntityError> {
    let entities = Entities::in_memory();
    let mut task = entities.define("task").await?;
    task.set_hooks(
        Hooks::new()
            .defaults(|e| {
                e.set("status", "draft").set("priority", 1);
                Ok(())
            })
            .construct_without_values(|e| {
                e.set("status", "new");
                Ok(())
            }),
    );
    let task = entities.register(task).await?;

    let t = task.create(values! { "status" => "open" })?;
    assert_eq!(t.get("status"), Some(&Value::from("open")));
    assert_eq!(t.get("priority"), Some(&Value::from(1)));

    let given = task.create(values! { "oid" => "12" })?;
    assert_eq!(given.oid(), Some(12));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stores_get_distinct_oids() -> Result<(), EntityError> {
    let entities = Entities::in_memory();
    let mut ticket = entities.define("ticket").await?;
    ticket.define_index("seq", "integer")?;
    let ticket = entities.register(ticket).await?;

    let handles: Vec<_> = (0..200)
        .map(|i| {
            let ticket = ticket.clone();
            tokio::spawn(async move {
                let mut entity = ticket.create(values! { "seq" => i })?;
                entity.store().await?;
                Ok::<_, EntityError>(entity.oid().unwrap())
            })
        })
        .collect();

    let mut oids = HashSet::new();
    for handle in handles {
        oids.insert(handle.await.expect("task panicked")?);
    }
    assert_eq!(oids.len(), 200);
    assert_eq!(ticket.query().count().await?, 200);
    Ok(())
}

#[tokio::test]
async fn sparse_unique_index_allows_many_missing_values() -> Result<(), EntityError> {
    let store = Arc::new(MemoryStore::new());
    let entities = Entities::new(store.clone());
    let mut user = entities.define("user").await?;
    user.define_index("email", "string")?.unique().sparse();
    let user = entities.register(user).await?;

    for _ in 0..3 {
        user.create(values! { "name" => "anonymous" })?.store().await?;
    }
    let mut with_null = user.create(values! { "email" => Value::Null })?;
    with_null.store().await?;
    let raw = store.document("user", with_null.oid().unwrap()).await.unwrap();
    assert!(raw.get("email").is_none());

    user.create(values! { "email" => "a@example.com" })?.store().await?;
    let mut twin = user.create(values! { "email" => "a@example.com" })?;
    let err = twin.store().await.unwrap_err();
    assert!(
        err.store_error().is_some_and(|e| e.is_duplicate_on("entidx_email@uq@sp")),
        "{err}"
    );
    assert_eq!(user.query().count().await?, 5);

    // Retrying with the conflict fixed inserts under the oid already allocated.
    let allocated = twin.oid();
    assert!(twin.is_new());
    assert!(twin.store().await.is_err());
    twin.set("email", "b@example.com");
    twin.store().await?;
    assert_eq!(twin.oid(), allocated);
    assert_eq!(user.query().count().await?, 6);
    Ok(())
}

#[tokio::test]
async fn soft_delete_is_invisible_by_default() -> Result<(), EntityError> {
    let entities = Entities::in_memory();
    let mut doc = entities.define("doc").await?;
    doc.define_index("title", "string")?;
    let doc = entities.register(doc).await?;

    let mut gone = doc.create(values! { "title" => "gone" })?;
    gone.store().await?;
    let mut kept = doc.create(values! { "title" => "kept" })?;
    kept.store().await?;

    let before = Utc::now() - Duration::seconds(5);
    gone.soft_delete().await?;
    assert!(gone.is_deleted());

    let titles = |grab: entity_store::Grab| -> Vec<String> {
        grab.entities
            .iter()
            .map(|e| e.get("title").and_then(Value::as_str).unwrap_or_default().to_string())
            .collect()
    };

    let all = GrabOptions::default();
    assert_eq!(titles(doc.query().grab(all).await?), vec!["kept"]);
    assert_eq!(titles(doc.query().only_deleted().grab(all).await?), vec!["gone"]);
    assert_eq!(
        titles(doc.query().include_deleted().sort("oid", entity_store::Order::Asc).grab(all).await?),
        vec!["gone", "kept"]
    );
    assert_eq!(titles(doc.query().deleted_after(before).grab(all).await?), vec!["gone"]);
    assert!(doc.query().deleted_before(before).grab(all).await?.is_empty());
    // A plain clause cannot reach deleted records.
    assert!(doc.query().matching("title").equals("gone").grab(all).await?.is_empty());

    let mut back = doc.query().only_deleted().grab_one().await?.unwrap();
    assert_eq!(back.deleted_at(), gone.deleted_at());
    back.restore();
    back.store().await?;
    assert_eq!(doc.query().count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn deleting_an_unstored_entity_is_a_no_op() -> Result<(), EntityError> {
    let store = InstrumentedStore::new();
    let entities = Entities::new(store.clone());
    let temp = entities.register(entities.define("temp").await?).await?;

    temp.create(values! { "x" => 1 })?.delete().await?;
    assert_eq!(store.saves(), 0);
    Ok(())
}

#[tokio::test]
async fn corrupt_rows_are_reported_per_row() -> Result<(), EntityError> {
    let store = Arc::new(MemoryStore::new());
    let person = people(store.clone()).await?;
    for age in [20, 30] {
        person.create(values! { "age" => age })?.store().await?;
    }

    let mut broken = Document::new();
    broken.insert("_id".to_string(), json!(99));
    broken.insert("age".to_string(), json!(25));
    broken.insert("_data".to_string(), json!("{not json"));
    store.save("person", 99, broken, SaveMode::Insert).await.unwrap();

    let grab = person.query().grab(GrabOptions::default()).await?;
    assert_eq!(grab.len(), 2);
    assert_eq!(grab.failures.len(), 1);
    assert_eq!(grab.failures[0].oid, Some(99));
    assert!(matches!(grab.failures[0].error, EntityError::Serialization(_)));

    let single = person.find_by_oid(99).await;
    assert!(matches!(single, Err(EntityError::Serialization(_))));
    Ok(())
}

#[tokio::test]
async fn taken_oids_are_allocation_errors() -> Result<(), EntityError> {
    let store = Arc::new(MemoryStore::new());
    let person = people(store.clone()).await?;

    // Occupy the first oid the sequence will hand out.
    let mut squatter = Document::new();
    squatter.insert("_id".to_string(), json!(1));
    squatter.insert("_data".to_string(), json!(r#"{"name":"owner"}"#));
    store.save("person", 1, squatter, SaveMode::Insert).await.unwrap();

    let mut intruder = person.create(values! { "age" => 5, "name" => "intruder" })?;
    let err = intruder.store().await.unwrap_err();
    assert!(matches!(err, EntityError::Allocation(_)), "{err}");
    assert_eq!(intruder.oid(), None);
    assert!(intruder.is_new());

    // A retry allocates a fresh oid and leaves the owner of oid 1 alone.
    intruder.store().await?;
    assert_eq!(intruder.oid(), Some(2));
    let owner = store.document("person", 1).await.unwrap();
    assert_eq!(owner["_data"], json!(r#"{"name":"owner"}"#));
    assert_eq!(store.len("person").await, 2);

    // The sequence moved on; the next store succeeds with a fresh oid.
    let mut next = person.create(values! { "age" => 2 })?;
    next.store().await?;
    assert_eq!(next.oid(), Some(3));
    Ok(())
}

#[tokio::test]
async fn failed_steps_write_nothing() -> Result<(), EntityError> {
    let store = InstrumentedStore::new();
    let entities = Entities::new(store.clone());
    let mut account = entities.define("account").await?;
    account.define_index("balance", "integer")?;
    account.set_hooks(Hooks::new().before_store(|e| {
        if e.get("frozen") == Some(&Value::Bool(true)) {
            anyhow::bail!("account is frozen");
        }
        Ok(())
    }));
    let account = entities.register(account).await?;

    let mut frozen = account.create(values! { "frozen" => true, "balance" => 1 })?;
    let err = frozen.store().await.unwrap_err();
    assert!(matches!(err, EntityError::Hook { phase: "before_store", .. }), "{err}");
    assert_eq!(frozen.oid(), None);

    let mut uncastable = account.create(values! { "balance" => "lots" })?;
    let err = uncastable.store().await.unwrap_err();
    assert!(matches!(&err, EntityError::Cast { field, .. } if field == "balance"), "{err}");
    let allocated = uncastable.oid();
    assert!(allocated.is_some());
    assert!(uncastable.is_new());

    assert_eq!(store.saves(), 0);

    // Retries after fixing the instance write exactly once each.
    uncastable.set("balance", 5);
    uncastable.store().await?;
    assert_eq!(uncastable.oid(), allocated);
    assert!(!uncastable.is_new());

    frozen.set("frozen", false);
    frozen.store().await?;
    assert!(frozen.oid().is_some());
    assert_ne!(frozen.oid(), allocated);

    assert_eq!(store.saves(), 2);
    assert_eq!(account.query().count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn reindex_recomputes_values_without_hooks() -> Result<(), EntityError> {
    let store = Arc::new(MemoryStore::new());
    let stores = Arc::new(Mutex::new(0usize));

    let v1 = Entities::new(store.clone());
    let mut item = v1.define("item").await?;
    item.define_index("sku", "string")?;
    let item = v1.register(item).await?;
    for sku in ["a-1", "b-2", "c-3"] {
        item.create(values! { "sku" => sku, "label" => sku.to_uppercase() })?
            .store()
            .await?;
    }
    let mut retired = item.query().matching("sku").equals("c-3").grab_one().await?.unwrap();
    retired.soft_delete().await?;

    // Second deployment indexes a field that was only in the payload so far.
    let v2 = Entities::new(store.clone());
    let mut item = v2.define("item").await?;
    item.define_index("sku", "string")?;
    item.define_index("label", "string")?.case_insensitive();
    let counter = stores.clone();
    item.set_hooks(Hooks::new().before_store(move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    }));
    let item = v2.register(item).await?;

    assert!(item.query().matching("label").equals("a-1").grab_one().await?.is_none());
    assert_eq!(v2.reindex_all().await?, 3);
    assert_eq!(*stores.lock().unwrap(), 0);

    let found = item.query().matching("label").equals("A-1").grab_one().await?;
    assert_eq!(found.and_then(|e| e.get("sku").cloned()), Some(Value::from("a-1")));
    let raw = store.document("item", retired.oid().unwrap()).await.unwrap();
    assert_eq!(raw["label"], json!("c-3"));
    assert!(raw.get("__deletedAt").is_some());
    Ok(())
}

#[tokio::test]
async fn store_errors_surface_unchanged() {
    let entities = Entities::in_memory();
    let mut item = entities.define("item").await.unwrap();
    item.define_text_search(["title"]).unwrap();
    let item = entities.register(item).await.unwrap();
    item.store().drop_index("item", "entidx_@text:title").await.unwrap();

    let err = item.query().text_search("anything").grab(GrabOptions::default()).await.unwrap_err();
    assert!(matches!(err.store_error(), Some(StoreError::TextIndexRequired(_))), "{err}");
}
