//! In-memory content store, used in ephemeral mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::{RelayError, Result};

use super::traits::{ContentStore, RequestIdentity, StoredEntry};

type Generation = HashMap<RequestIdentity, StoredEntry>;

/// Content store kept entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
  // (creation sequence, entries) keyed by generation name
  generations: RwLock<BTreeMap<String, (u64, Generation)>>,
  next_seq: std::sync::atomic::AtomicU64,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn seq(&self) -> u64 {
    self
      .next_seq
      .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
  }
}

fn poisoned<E: std::fmt::Display>(e: E) -> RelayError {
  RelayError::StoreUnavailable(format!("Lock poisoned: {}", e))
}

impl ContentStore for MemoryStore {
  fn create(&self, generation: &str) -> Result<()> {
    let mut generations = self.generations.write().map_err(poisoned)?;
    if !generations.contains_key(generation) {
      generations.insert(generation.to_string(), (self.seq(), Generation::new()));
    }
    Ok(())
  }

  fn get(&self, generation: &str, identity: &RequestIdentity) -> Result<Option<StoredEntry>> {
    let generations = self.generations.read().map_err(poisoned)?;
    Ok(
      generations
        .get(generation)
        .and_then(|(_, entries)| entries.get(identity))
        .cloned(),
    )
  }

  fn put(&self, generation: &str, identity: &RequestIdentity, entry: &StoredEntry) -> Result<()> {
    let mut generations = self.generations.write().map_err(poisoned)?;
    let (_, entries) = generations
      .entry(generation.to_string())
      .or_insert_with(|| (self.seq(), Generation::new()));
    entries.insert(identity.clone(), entry.clone());
    Ok(())
  }

  fn identities(&self, generation: &str) -> Result<Vec<RequestIdentity>> {
    let generations = self.generations.read().map_err(poisoned)?;
    let mut identities: Vec<RequestIdentity> = generations
      .get(generation)
      .map(|(_, entries)| entries.keys().cloned().collect())
      .unwrap_or_default();
    identities.sort();
    Ok(identities)
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let mut generations = self.generations.write().map_err(poisoned)?;
    Ok(generations.remove(generation).is_some())
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let generations = self.generations.read().map_err(poisoned)?;
    let mut names: Vec<(u64, &String)> = generations
      .iter()
      .map(|(name, (seq, _))| (*seq, name))
      .collect();
    names.sort();
    Ok(names.into_iter().map(|(_, name)| name.clone()).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;
  use reqwest::header::HeaderMap;
  use url::Url;

  fn identity(path: &str) -> RequestIdentity {
    RequestIdentity::get(&Url::parse("https://fatslim.test").unwrap().join(path).unwrap())
  }

  fn entry(body: &'static str) -> StoredEntry {
    StoredEntry::capture(200, &HeaderMap::new(), Bytes::from_static(body.as_bytes()))
  }

  #[test]
  fn test_names_keep_creation_order() {
    let store = MemoryStore::new();
    store.create("v9").unwrap();
    store.put("v10", &identity("/"), &entry("x")).unwrap();
    store.create("v9").unwrap();

    assert_eq!(store.list_names().unwrap(), vec!["v9", "v10"]);
  }

  #[test]
  fn test_missing_generation_is_a_miss() {
    let store = MemoryStore::new();
    assert!(store.get("gone", &identity("/")).unwrap().is_none());
    assert!(store.identities("gone").unwrap().is_empty());
    assert!(!store.delete("gone").unwrap());
  }

  #[test]
  fn test_put_overwrites() {
    let store = MemoryStore::new();
    store.put("v1", &identity("/a.js"), &entry("1")).unwrap();
    store.put("v1", &identity("/a.js"), &entry("2")).unwrap();

    let found = store.get("v1", &identity("/a.js")).unwrap().unwrap();
    assert_eq!(found.body, Bytes::from_static(b"2"));
  }
}
