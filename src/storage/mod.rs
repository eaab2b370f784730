//! Relay storage.

mod api;
pub use api::{BatchUpdate, StorageApi};
mod error;
pub use error::StorageError;
mod memory;
pub use memory::InMemoryStorage;
mod pg;
pub use pg::PgStorage;

use sqlx::PgPool;
use std::{ops::Deref, sync::Arc};

/// Cloneable handle to the storage backend.
#[derive(Debug, Clone)]
pub struct Storage {
    inner: Arc<dyn StorageApi>,
}

impl Storage {
    /// Creates a [`Storage`] backed by PostgreSQL.
    pub fn pg(pool: PgPool) -> Self {
        Self { inner: Arc::new(PgStorage::new(pool)) }
    }

    /// Creates a [`Storage`] with an in-memory backend. Used for testing only.
    pub fn in_memory() -> Self {
        Self { inner: Arc::new(InMemoryStorage::default()) }
    }
}

impl Deref for Storage {
    type Target = dyn StorageApi;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}
