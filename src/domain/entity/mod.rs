//! Entity declaration and instance lifecycle.

mod definition;
pub mod hooks;
pub mod index;
mod instance;
pub mod sync;

pub use definition::{EntityDefinition, OID_FIELD};
pub use hooks::{Construct, Hooks};
pub use index::{FieldType, IndexOptions, IndexSpec, TextSearchSpec, INDEX_PREFIX};
pub use instance::{Entity, StoreOptions};
pub use sync::{IndexSyncReport, IndexSynchronizer};
