//! Versioned content store for captured request/response pairs.
//!
//! A store holds named generations. Each generation maps a request identity (method + URL) to
//! an immutable response snapshot. The relay only ever writes into the generation named by the
//! current version tag; older generations are removed wholesale on activation.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ContentStore, RequestIdentity, StoredEntry};

use std::sync::Arc;

use crate::error::Result;

/// Entry point to all generations of a store backend.
#[derive(Clone)]
pub struct CacheStorage {
  backend: Arc<dyn ContentStore>,
}

impl CacheStorage {
  pub fn new(backend: Arc<dyn ContentStore>) -> Self {
    Self { backend }
  }

  /// Open a generation, creating it if needed.
  pub fn open(&self, name: &str) -> Result<Generation> {
    self.backend.create(name)?;
    Ok(Generation {
      backend: Arc::clone(&self.backend),
      name: name.to_string(),
    })
  }

  /// Delete a whole generation.
  pub fn delete(&self, name: &str) -> Result<bool> {
    self.backend.delete(name)
  }

  pub fn list_names(&self) -> Result<Vec<String>> {
    self.backend.list_names()
  }

  /// Look an identity up across all generations, `preferred` first.
  ///
  /// A generation that disappears between listing and reading counts as a miss.
  pub fn match_request(
    &self,
    preferred: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<StoredEntry>> {
    if let Some(entry) = self.backend.get(preferred, identity)? {
      return Ok(Some(entry));
    }

    for name in self.backend.list_names()? {
      if name == preferred {
        continue;
      }
      if let Some(entry) = self.backend.get(&name, identity)? {
        return Ok(Some(entry));
      }
    }

    Ok(None)
  }
}

/// Handle to one opened generation.
#[derive(Clone)]
pub struct Generation {
  backend: Arc<dyn ContentStore>,
  name: String,
}

impl Generation {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, identity: &RequestIdentity) -> Result<Option<StoredEntry>> {
    self.backend.get(&self.name, identity)
  }

  pub fn put(&self, identity: &RequestIdentity, entry: &StoredEntry) -> Result<()> {
    self.backend.put(&self.name, identity, entry)
  }

  pub fn identities(&self) -> Result<Vec<RequestIdentity>> {
    self.backend.identities(&self.name)
  }
}
