//! Index reconciliation against a live, shared store.

#[macro_use]
mod common;

use common::InstrumentedStore;
use entity_store::storage::{DocumentStore, IndexDefinition, IndexKind, ID_INDEX};
use entity_store::{Entities, EntityError, FieldType};
use std::sync::Arc;

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test]
async fn reconciliation_is_idempotent() -> Result<(), EntityError> {
    let store = InstrumentedStore::new();
    let entities = Entities::new(store.clone());

    let mut person = entities.define("person").await?;
    person.define_index("age", "integer")?;
    person.define_index("email", "string")?.unique().sparse();
    person.define_text_search(["name", "bio"])?;
    let person = entities.register(person).await?;

    assert_eq!(store.creates(), 3);
    assert_eq!(
        sorted(store.list_indexes("person").await.unwrap()),
        vec![
            ID_INDEX.to_string(),
            "entidx_@text:name,bio".to_string(),
            "entidx_age".to_string(),
            "entidx_email@uq@sp".to_string(),
        ]
    );

    let again = person.initialize().await?;
    assert!(again.is_noop());
    assert_eq!(again.kept.len(), 3);
    assert_eq!(store.creates(), 3);
    assert_eq!(store.drops(), 0);
    Ok(())
}

#[tokio::test]
async fn semantic_option_change_rebuilds_the_index() -> Result<(), EntityError> {
    let store = InstrumentedStore::new();

    let before = Entities::new(store.clone());
    let mut person = before.define("person").await?;
    person.define_index("email", "string")?;
    before.register(person).await?;

    // A restarted process with a changed declaration on the same store.
    let after = Entities::new(store.clone());
    let mut person = after.define("person").await?;
    person.define_index("email", "string")?.unique();
    let report = person.initialize().await?;

    assert_eq!(report.dropped, vec!["entidx_email".to_string()]);
    assert_eq!(report.created, vec!["entidx_email@uq".to_string()]);
    Ok(())
}

#[tokio::test]
async fn field_names_never_alias_option_markers() -> Result<(), EntityError> {
    let store = InstrumentedStore::new();

    let v1 = Entities::new(store.clone());
    let mut item = v1.define("item").await?;
    item.define_index("tag_uq", "string")?;
    v1.register(item).await?;

    let v2 = Entities::new(store.clone());
    let mut item = v2.define("item").await?;
    item.define_index("tag", "string")?.unique();
    assert!(item.define_index("tag@uq", "string").is_err());
    let report = item.initialize().await?;
    assert_eq!(report.dropped, vec!["entidx_tag_uq".to_string()]);
    assert_eq!(report.created, vec!["entidx_tag@uq".to_string()]);
    let item = v2.register(item).await?;

    item.create(values! { "tag" => "x" })?.store().await?;
    let err = item.create(values! { "tag" => "x" })?.store().await.unwrap_err();
    assert!(err.store_error().is_some_and(|e| e.is_duplicate_on("entidx_tag@uq")), "{err}");

    // A field spelled like the text index never reuses its name.
    let v3 = Entities::new(store.clone());
    let mut item = v3.define("item").await?;
    item.define_index("tag", "string")?.unique();
    item.define_index("text:tag", "string")?;
    item.define_text_search(["tag"])?;
    let report = item.initialize().await?;
    let mut created = report.created.clone();
    created.sort();
    assert_eq!(created, vec!["entidx_@text:tag".to_string(), "entidx_text:tag".to_string()]);
    Ok(())
}

#[tokio::test]
async fn foreign_indexes_are_never_touched() -> Result<(), EntityError> {
    let store = InstrumentedStore::new();
    let legacy = IndexDefinition {
        name: "by_legacy_code".to_string(),
        kind: IndexKind::Field {
            field: "code".to_string(),
            unique: false,
            sparse: false,
        },
    };
    store.create_index("person", &legacy).await.unwrap();

    let entities = Entities::new(store.clone());
    let mut person = entities.define("person").await?;
    person.define_index("age", "integer")?;
    let person = entities.register(person).await?;

    let dropped = person.drop_indexes().await?;
    assert_eq!(dropped, vec!["entidx_age".to_string()]);
    assert_eq!(
        sorted(store.list_indexes("person").await.unwrap()),
        vec![ID_INDEX.to_string(), "by_legacy_code".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn failed_index_creation_aborts_registration() {
    let store = InstrumentedStore::new();
    store.fail_create_of("entidx_b");
    let entities = Entities::new(store.clone());

    let mut thing = entities.define("thing").await.unwrap();
    thing.define_index("a", "string").unwrap();
    thing.define_index("b", "string").unwrap();
    thing.define_index("c", "string").unwrap();

    let err = entities.register(thing).await.unwrap_err();
    assert!(matches!(err, EntityError::Storage { .. }), "{err}");
    assert!(entities.get("thing").await.is_none());
    // Indexes are processed in field order; nothing after the failure runs.
    assert_eq!(store.creates(), 1);
}

#[tokio::test]
async fn text_index_follows_field_order() -> Result<(), EntityError> {
    let store = InstrumentedStore::new();

    let first = Entities::new(store.clone());
    let mut article = first.define("article").await?;
    article.define_text_search(["title", "body"])?;
    first.register(article).await?;

    let second = Entities::new(store.clone());
    let mut article = second.define("article").await?;
    article.define_text_search(["body", "title"])?;
    let report = article.initialize().await?;
    assert_eq!(report.dropped, vec!["entidx_@text:title,body".to_string()]);
    assert_eq!(report.created, vec!["entidx_@text:body,title".to_string()]);

    let third = Entities::new(store.clone());
    let mut article = third.define("article").await?;
    article.define_text_search(["body", "title"])?;
    assert!(article.initialize().await?.is_noop());
    Ok(())
}

#[tokio::test]
async fn declarations_are_validated() -> Result<(), EntityError> {
    let entities = Entities::in_memory();
    let mut person = entities.define("person").await?;

    let err = person.define_index("height", "float").unwrap_err();
    assert!(matches!(&err, EntityError::Configuration(m) if m.contains("person") && m.contains("height")));

    person.define_index("age", "integer")?;
    assert!(matches!(
        person.define_index("age", "string"),
        Err(EntityError::Configuration(_))
    ));
    person.define_typed_index("age", FieldType::Integer)?.unique();
    assert!(person.index("age").unwrap().options().unique);

    assert!(person.define_index("oid", "integer").is_err());
    assert!(person.define_index("_secret", "string").is_err());
    assert!(person.define_text_search(Vec::<String>::new()).is_err());
    assert!(person.define_text_search(["bio", "bio"]).is_err());
    Ok(())
}

#[tokio::test]
async fn rebuild_recreates_every_managed_index() -> Result<(), EntityError> {
    let store = InstrumentedStore::new();
    let entities = Entities::new(store.clone());
    for name in ["person", "company"] {
        let mut definition = entities.define(name).await?;
        definition.define_index("name", "string")?;
        entities.register(definition).await?;
    }

    let reports = entities.rebuild_indexes().await?;
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report.created, vec!["entidx_name".to_string()]);
        assert!(report.dropped.is_empty());
    }
    assert_eq!(store.drops(), 2);
    assert_eq!(store.creates(), 4);

    entities.drop_indexes().await?;
    assert_eq!(
        store.list_indexes("company").await.unwrap(),
        vec![ID_INDEX.to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rejected() -> Result<(), EntityError> {
    let entities = Entities::new(Arc::new(entity_store::MemoryStore::new()));
    let person = entities.define("person").await?;
    entities.register(person).await?;

    assert!(matches!(entities.define("person").await, Err(EntityError::Configuration(_))));
    let twin = entity_store::EntityDefinition::bless("person", entities.store());
    assert!(matches!(entities.register(twin).await, Err(EntityError::Configuration(_))));
    assert_eq!(entities.names().await, vec!["person".to_string()]);
    Ok(())
}
