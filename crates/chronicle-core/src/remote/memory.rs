use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{PLACEHOLDER, RemoteError, SnapshotStore, is_placeholder};

/// In-process store. Identifiers are `mem-1`, `mem-2`, ...
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Raw content under `id`, placeholder included.
    #[must_use]
    pub fn raw(&self, id: &str) -> Option<String> {
        self.objects().get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }
}

impl SnapshotStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn create(&self) -> Result<String, RemoteError> {
        let mut objects = self.objects();
        let id = format!("mem-{}", objects.len() + 1);
        objects.insert(id.clone(), PLACEHOLDER.to_string());
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<String, RemoteError> {
        self.objects()
            .get(id)
            .filter(|content| !is_placeholder(content))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound { id: id.to_string() })
    }

    fn put(&self, id: &str, token: &str) -> Result<(), RemoteError> {
        let mut objects = self.objects();
        let slot = objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound { id: id.to_string() })?;
        token.clone_into(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_object_reads_as_not_found() {
        let store = MemoryStore::new();
        let id = store.create().expect("create");
        assert_eq!(store.raw(&id).as_deref(), Some(PLACEHOLDER));
        assert_eq!(
            store.get(&id),
            Err(RemoteError::NotFound { id: id.clone() })
        );
    }

    #[test]
    fn put_overwrites() {
        let store = MemoryStore::new();
        let id = store.create().expect("create");
        store.put(&id, "one").expect("put");
        store.put(&id, "two").expect("put");
        assert_eq!(store.get(&id).expect("get"), "two");
    }

    #[test]
    fn put_to_unknown_id_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.put("mem-9", "x"),
            Err(RemoteError::NotFound { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn ids_are_distinct() {
        let store = MemoryStore::new();
        let a = store.create().expect("a");
        let b = store.create().expect("b");
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }
}
