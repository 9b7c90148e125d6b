use entity_store::infra::{config::StoreConfig, telemetry};
use entity_store::storage::postgres::DOC_INDEX;
use entity_store::storage::ID_INDEX;
use entity_store::{Entities, StoreError, INDEX_PREFIX};

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: cargo run --bin preflight -- [COLLECTION ...]\n\
         \n\
         Requires env vars:\n\
           DATABASE_URL (postgres://... or memory://)\n\
         Optional:\n\
           DATABASE_MAX_CONNECTIONS (default 5), RUST_LOG\n"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }

    // Force-read config (nice error messages if missing)
    let config = StoreConfig::from_env()?;
    let backend = config.backend()?;

    println!("> Preflight:");
    println!("  DATABASE_URL backend={:?}", backend);
    println!("  DATABASE_MAX_CONNECTIONS={}", config.max_connections);

    let entities = Entities::connect(&config).await?;
    let store = entities.store();
    println!("  Store connected ({}).", store.backend());

    // Sequence round-trip proves the store accepts writes.
    let value = store.next_sequence("__preflight").await?;
    println!("  Sequence check ok (value={}).", value);

    for collection in &args {
        match store.list_indexes(collection).await {
            Ok(names) => {
                println!("  {}:", collection);
                for name in names {
                    let role = if name == ID_INDEX {
                        "identifier"
                    } else if name == DOC_INDEX {
                        "path index"
                    } else if name.starts_with(INDEX_PREFIX) {
                        "managed"
                    } else {
                        "foreign"
                    };
                    println!("    {} ({})", name, role);
                }
            }
            Err(StoreError::CollectionNotFound(_)) => {
                println!("  {}: not created yet", collection);
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("> Preflight OK.");
    Ok(())
}
