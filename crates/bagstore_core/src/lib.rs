//! # BagStore Core
//!
//! Bag orchestration and index consistency for BagStore.
//!
//! This crate provides:
//! - The key model: typed key fields, binary entry layout and header strings
//! - Secondary indexes with incremental maintenance on every entity change
//! - A bag-wide shared/exclusive lock guarding lifecycle transitions
//! - Crash recovery: primary verification plus parallel index rebuilds
//! - The [`Bag`] façade and, with the `std` feature, on-disk [`Instance`]s
//!
//! ```rust
//! use bagstore_core::{Bag, BagConfig, BagServices, DefaultIndexManager, Entity,
//!     InMemoryMetadataStore, KeyField, UuidIdGenerator};
//! use bagstore_storage::InMemoryRecordStoreFactory;
//! use std::sync::Arc;
//!
//! let metadata = Arc::new(InMemoryMetadataStore::new());
//! let services = BagServices {
//!     records: Arc::new(InMemoryRecordStoreFactory::new()),
//!     indexes: Arc::new(DefaultIndexManager::new("demo", metadata.clone())),
//!     metadata,
//!     ids: Arc::new(UuidIdGenerator),
//! };
//! let bag = Bag::open("demo", "people", services, &BagConfig::default())?;
//! let age = bag.ensure_index(&[KeyField::long("age")], false, &[])?;
//! bag.insert(Entity::new().with("age", 30))?;
//! assert_eq!(age.len(), 1);
//! # Ok::<(), bagstore_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bag;
mod config;
mod diff;
#[cfg(feature = "std")]
mod dir;
mod entity;
mod error;
pub mod index;
#[cfg(feature = "std")]
mod instance;
pub mod key;
mod lock;
mod metadata;
mod operation;
mod query;
mod recovery;

pub use bag::{Bag, BagServices};
pub use config::{BagConfig, FORCE_REBUILD_ENV};
pub use diff::{diff_index, BagChanges, IndexChanges};
#[cfg(feature = "std")]
pub use dir::{is_valid_bag_name, InstanceDir};
pub use entity::{
    decode_entity, encode_entity, extract_id, Entity, EntityId, FieldValue, IdGenerator,
    UuidIdGenerator, ID_FIELD, MAX_ID_LEN,
};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use index::{DefaultIndexManager, Index, IndexDefinition, IndexManager, IndexType};
#[cfg(feature = "std")]
pub use instance::{Instance, DEFAULT_INSTANCE};
pub use key::{Key, KeyField, KeyInfo, KeyType, KeyValue};
pub use lock::{BagLock, ExclusiveGuard, SharedGuard};
pub use metadata::{InMemoryMetadataStore, ManifestMetadataStore, MetadataStore};
pub use operation::{
    DataOperation, InsertOperation, OperationContext, PersistOperation, RemoveOperation,
    UpdateOperation,
};
pub use query::{
    search, select_index, FieldCondition, QueryFieldOperator, QueryResult, SearchLimit,
    SearchQuery, SortOrder, SortParameter,
};
pub use recovery::{RecoveryCoordinator, RecoveryReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
