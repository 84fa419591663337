//! Local filesystem backend, used by tests and file:// targets.

use object_store::local::LocalFileSystem;
use object_store::ObjectStore;
use snafu::prelude::*;
use std::path::Path;
use std::sync::Arc;

use crate::error::{LocalConfigSnafu, StorageError};

use super::StorageProvider;

impl StorageProvider {
    /// Create a provider rooted at a local directory.
    ///
    /// The directory stands in for a bucket; object keys map to file paths
    /// under it. `LocalFileSystem` does not implement `MultipartStore`, so
    /// streamed commits fall back to single puts.
    pub fn local(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        let store = LocalFileSystem::new_with_prefix(root).with_context(|_| LocalConfigSnafu {
            root: root.display().to_string(),
        })?;

        let object_store: Arc<dyn ObjectStore> = Arc::new(store);
        let canonical_url = format!("file://{}", root.display());

        Ok(Self::new(object_store, None, canonical_url))
    }
}
