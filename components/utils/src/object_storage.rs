// Copyright 2026 kagefs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Handles to the remote chunk pool.
//!
//! The pool is opaque to the overlay: anything that can durably `put` and
//! `get` named objects works. Tests use the in-memory store; a deployment
//! points the local-filesystem store (or an S3-compatible one) at the real
//! pool location.

use std::{path::Path, sync::Arc};

use object_store::ObjectStore;

pub type ObjectStorage = Arc<dyn ObjectStore>;

pub type ObjectStorageError = object_store::Error;

pub type ObjectStoragePath = object_store::path::Path;

pub fn is_not_found_error(e: &ObjectStorageError) -> bool {
    matches!(e, ObjectStorageError::NotFound { .. })
}

pub fn new_memory_object_store() -> ObjectStorage {
    Arc::new(object_store::memory::InMemory::new())
}

pub fn new_local_object_store<P: AsRef<Path>>(
    path: P,
) -> Result<ObjectStorage, ObjectStorageError> {
    let path = path.as_ref();
    std::fs::create_dir_all(path).map_err(|source| ObjectStorageError::Generic {
        store: "LocalFileSystem",
        source: Box::new(source),
    })?;
    Ok(Arc::new(object_store::local::LocalFileSystem::new_with_prefix(path)?))
}
