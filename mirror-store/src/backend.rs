//! The four-operation storage backend contract.
//!
//! Concrete adapters (local folder, FTP, ...) live outside this workspace;
//! this module defines the contract they implement plus an in-memory
//! backend for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mirror_types::{DeviceId, RemoteObjectName};

use crate::error::StoreError;

/// A dumb remote object store.
///
/// All the synchronizer requires of a backend: `get` of an absent object
/// fails with the distinguishable [`StoreError::NotFound`], `put`/`delete`
/// report success or failure, and `post` assigns a fresh opaque name.
#[async_trait]
pub trait Backend: Send + Sync {
    /// One-time initialization when the provider is activated.
    async fn init(&self, device: &DeviceId) -> Result<(), StoreError>;

    /// Store new content under a backend-assigned name.
    async fn post(&self, content: &[u8]) -> Result<RemoteObjectName, StoreError>;

    /// Create or overwrite the object at `object`.
    async fn put(&self, object: &RemoteObjectName, content: &[u8]) -> Result<(), StoreError>;

    /// Retrieve the object at `object`.
    async fn get(&self, object: &RemoteObjectName) -> Result<Vec<u8>, StoreError>;

    /// Delete the object at `object`.
    async fn delete(&self, object: &RemoteObjectName) -> Result<(), StoreError>;
}

/// In-memory backend for tests.
///
/// Objects live in a mutex-guarded map, so GET/SET are serialized exactly
/// like a real single remote would serialize them. Clones share state.
/// Failure injection knobs let tests exercise the retry paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryBackendInner>>,
}

#[derive(Debug, Default)]
struct MemoryBackendInner {
    objects: HashMap<String, Vec<u8>>,
    next_object: u64,
    init_devices: Vec<DeviceId>,
    fail_next_get: Option<String>,
    fail_next_put: Option<String>,
    fail_next_post: Option<String>,
    fail_next_delete: Option<String>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().objects.len()
    }

    /// Whether the backend holds no objects.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().objects.is_empty()
    }

    /// Whether an object exists, without going through `get`.
    pub fn contains(&self, object: &RemoteObjectName) -> bool {
        self.inner
            .lock()
            .unwrap()
            .objects
            .contains_key(object.as_str())
    }

    /// Devices that called `init`.
    pub fn init_devices(&self) -> Vec<DeviceId> {
        self.inner.lock().unwrap().init_devices.clone()
    }

    /// Cause the next `get` to fail with the given error.
    pub fn fail_next_get(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_get = Some(error.to_string());
    }

    /// Cause the next `put` to fail with the given error.
    pub fn fail_next_put(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_put = Some(error.to_string());
    }

    /// Cause the next `post` to fail with the given error.
    pub fn fail_next_post(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_post = Some(error.to_string());
    }

    /// Cause the next `delete` to fail with the given error.
    pub fn fail_next_delete(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_delete = Some(error.to_string());
    }
}

impl Clone for MemoryBackend {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn init(&self, device: &DeviceId) -> Result<(), StoreError> {
        self.inner.lock().unwrap().init_devices.push(*device);
        Ok(())
    }

    async fn post(&self, content: &[u8]) -> Result<RemoteObjectName, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_post.take() {
            return Err(StoreError::Backend(error));
        }

        let name = format!("obj-{}", inner.next_object);
        inner.next_object += 1;
        inner.objects.insert(name.clone(), content.to_vec());
        Ok(RemoteObjectName::new(name))
    }

    async fn put(&self, object: &RemoteObjectName, content: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_put.take() {
            return Err(StoreError::Backend(error));
        }

        inner
            .objects
            .insert(object.as_str().to_string(), content.to_vec());
        Ok(())
    }

    async fn get(&self, object: &RemoteObjectName) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_get.take() {
            return Err(StoreError::Backend(error));
        }

        inner
            .objects
            .get(object.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                object: object.as_str().to_string(),
            })
    }

    async fn delete(&self, object: &RemoteObjectName) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_delete.take() {
            return Err(StoreError::Backend(error));
        }

        inner.objects.remove(object.as_str());
        Ok(())
    }
}
