// medflow-orders/src/services/object_store.rs

use crate::errors::{AppError, Result as AppResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, instrument};

/// Where payment proofs end up. Uploading to an existing key overwrites it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
  /// Stores `bytes` under `key` and returns the public URL.
  async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> AppResult<String>;
}

fn checked_key(key: &str) -> AppResult<&Path> {
  let path = Path::new(key);
  let safe = !key.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
  if safe {
    Ok(path)
  } else {
    Err(AppError::Storage(format!("invalid object key '{}'", key)))
  }
}

/// Writes objects below a directory served at `public_url`.
pub struct LocalObjectStore {
  root: PathBuf,
  public_url: String,
}

impl LocalObjectStore {
  pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
    Self {
      root: root.into(),
      public_url: public_url.into().trim_end_matches('/').to_string(),
    }
  }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
  #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
  async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> AppResult<String> {
    let relative = checked_key(key)?;
    let target = self.root.join(relative);
    if let Some(parent) = target.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| AppError::Storage(format!("creating {}: {}", parent.display(), e)))?;
    }
    // Readers only ever see a complete file.
    let staging = target.with_extension(format!("upload-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&staging, bytes)
      .await
      .map_err(|e| AppError::Storage(format!("writing {}: {}", staging.display(), e)))?;
    tokio::fs::rename(&staging, &target)
      .await
      .map_err(|e| AppError::Storage(format!("moving into {}: {}", target.display(), e)))?;

    info!(%key, "Object stored on local disk.");
    Ok(format!("{}/{}", self.public_url, key))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
  pub bytes: Vec<u8>,
  pub content_type: String,
}

/// Keeps objects in memory. Can be told to fail the next uploads.
#[derive(Default)]
pub struct MemoryObjectStore {
  objects: Mutex<HashMap<String, StoredObject>>,
  uploads: AtomicUsize,
  failures_left: AtomicUsize,
}

impl MemoryObjectStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_next(&self, count: usize) {
    self.failures_left.store(count, Ordering::SeqCst);
  }

  /// Successful uploads so far, overwrites included.
  pub fn upload_count(&self) -> usize {
    self.uploads.load(Ordering::SeqCst)
  }

  pub fn get(&self, key: &str) -> Option<StoredObject> {
    self.objects.lock().get(key).cloned()
  }

  pub fn len(&self) -> usize {
    self.objects.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.objects.lock().is_empty()
  }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
  async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> AppResult<String> {
    checked_key(key)?;
    let should_fail = self
      .failures_left
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if should_fail {
      return Err(AppError::Storage(format!("simulated upload failure for '{}'", key)));
    }
    self.objects.lock().insert(
      key.to_string(),
      StoredObject {
        bytes: bytes.to_vec(),
        content_type: content_type.to_string(),
      },
    );
    self.uploads.fetch_add(1, Ordering::SeqCst);
    Ok(format!("memory://{}", key))
  }
}
