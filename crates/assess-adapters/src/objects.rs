//! Object storage en memoria. La "firma" de URLs es sintética; alcanza para
//! que el motor ejercite el flujo de descarga.

use std::collections::HashMap;
use std::sync::Mutex;

use assess_core::{EngineError, ObjectStore};

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().map(|o| o.contains_key(key)).unwrap_or(false)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, EngineError> {
        self.objects
            .lock()
            .map_err(|_| EngineError::Infrastructure("object store envenenado".into()))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), EngineError> {
        self.lock()?.insert(key.to_string(), bytes);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, EngineError> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("objeto '{key}'")))
    }

    fn copy(&self, from: &str, to: &str) -> Result<(), EngineError> {
        let mut objects = self.lock()?;
        let bytes = objects
            .get(from)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("objeto '{from}'")))?;
        objects.insert(to.to_string(), bytes);
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<(), EngineError> {
        let mut objects = self.lock()?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn signed_url(&self, key: &str) -> Result<String, EngineError> {
        let objects = self.lock()?;
        if !objects.contains_key(key) {
            return Err(EngineError::NotFound(format!("objeto '{key}'")));
        }
        Ok(format!("memory://{key}?signed=1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_duplicates_without_consuming() {
        let store = MemoryObjectStore::new();
        store.put("a", b"doc".to_vec()).unwrap();
        store.copy("a", "b").unwrap();
        assert_eq!(store.get("a").unwrap(), b"doc");
        assert_eq!(store.get("b").unwrap(), b"doc");
    }

    #[test]
    fn signed_url_requires_existing_object() {
        let store = MemoryObjectStore::new();
        assert!(matches!(store.signed_url("nope"), Err(EngineError::NotFound(_))));
    }
}
