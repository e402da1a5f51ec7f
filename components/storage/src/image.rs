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

//! The mounted overlay image and its shared per-chunk state.
//!
//! An [`Image`] owns the modified/uploaded bitmaps and the two aggregate
//! counters that foreground writers, the resize path and the uploader all
//! mutate. Every bitmap transition, counter move, and uploaded-marker file
//! operation happens under one state lock, so the components observe
//! linearizable per-chunk transitions; the chunk file *bytes* are not
//! protected, and the mark-before-transmit ordering in the uploader is what
//! keeps a racing write from being silently uploaded-over.

use std::{
    fs,
    fs::File,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use kage_types::{
    bitmap::{BitmapDelta, ChunkBitmap},
    chunk::marker_path,
    total_chunks, ChunkIndex, DEFAULT_CHUNK_SIZE, KAGE_DEBUG_OVERLAY_ROOT,
};
use kage_utils::{object_storage::ObjectStorage, readable_size::ReadableSize, runtime};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::sync::broadcast;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    err::{MarkerSnafu, Result},
    uploader::{Uploader, DEFAULT_UPLOAD_IDLE_INTERVAL},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Fixed chunk size of the image, in bytes.
    pub chunk_size: u64,
    /// Logical image size at mount time, in bytes.
    pub initial_size: u64,
    /// Root of the sharded overlay layout.
    pub storage_root: PathBuf,
    /// Target upload rate in bytes per second; zero means unthrottled.
    /// Ignored in checkin mode.
    pub upload_rate: ReadableSize,
    /// Final flush before shutdown: upload as fast as possible.
    pub checkin: bool,
    /// How long the uploader rests between two full sweeps.
    pub upload_idle_interval: Duration,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            initial_size: 0,
            storage_root: PathBuf::from(KAGE_DEBUG_OVERLAY_ROOT),
            upload_rate: ReadableSize::mb(1),
            checkin: false,
            upload_idle_interval: DEFAULT_UPLOAD_IDLE_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub(crate) struct BitState {
    pub(crate) modified: ChunkBitmap,
    pub(crate) uploaded: ChunkBitmap,
}

/// A mounted copy-on-write overlay image.
#[derive(Debug)]
pub struct Image {
    config: ImageConfig,
    pool: ObjectStorage,
    state: Mutex<BitState>,
    chunks_modified: AtomicU64,
    chunks_modified_not_uploaded: AtomicU64,
    cancel_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl Image {
    /// Mount the overlay: create the storage root if needed and rebuild the
    /// in-memory state from whatever is physically present.
    pub fn mount(config: ImageConfig, pool: ObjectStorage) -> Result<Arc<Image>> {
        assert!(config.chunk_size > 0, "chunk size must be non-zero");
        let chunks = total_chunks(config.initial_size, config.chunk_size);
        let img = Arc::new(Image {
            config,
            pool,
            state: Mutex::new(BitState {
                modified: ChunkBitmap::new(chunks + 1),
                uploaded: ChunkBitmap::new(chunks + 1),
            }),
            chunks_modified: AtomicU64::new(0),
            chunks_modified_not_uploaded: AtomicU64::new(0),
            cancel_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        });
        img.recover()?;
        Ok(img)
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn pool(&self) -> &ObjectStorage {
        &self.pool
    }

    /// Number of chunks currently held by the overlay.
    pub fn chunks_modified(&self) -> u64 {
        self.chunks_modified.load(Ordering::Acquire)
    }

    /// Number of modified chunks the pool has not durably received yet.
    pub fn chunks_modified_not_uploaded(&self) -> u64 {
        self.chunks_modified_not_uploaded.load(Ordering::Acquire)
    }

    pub fn is_modified(&self, chunk: ChunkIndex) -> bool {
        self.state().modified.test(chunk)
    }

    pub fn is_uploaded(&self, chunk: ChunkIndex) -> bool {
        self.state().uploaded.test(chunk)
    }

    pub fn subscribe_modified(&self) -> broadcast::Receiver<BitmapDelta> {
        self.state().modified.subscribe()
    }

    pub fn subscribe_uploaded(&self) -> broadcast::Receiver<BitmapDelta> {
        self.state().uploaded.subscribe()
    }

    /// Start the background uploader on the global runtime.
    pub fn spawn_uploader(self: &Arc<Self>) {
        let uploader = Uploader::new(self.clone());
        self.task_tracker
            .spawn_on(uploader.run(self.cancel_token.clone()), &runtime::handle());
    }

    /// Stop the uploader and wait for it to exit. An in-flight upload may be
    /// lost; the next mount retries it since its marker never got committed
    /// into an uploaded bit observed by anyone.
    pub async fn close(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, BitState> {
        self.state.lock().expect("image state lock poisoned")
    }
}

// ===== per-chunk state transitions
//
// These are the only places the bitmaps, counters, and marker files move.
// Counter updates are one increment or decrement per transition; only the
// recovery scanner builds them up from scratch.
impl Image {
    /// Record a successful byte write to `chunk`.
    pub(crate) fn note_chunk_written(&self, chunk: ChunkIndex) -> Result<()> {
        let mut st = self.state();
        if !st.modified.test(chunk) {
            st.modified.set(chunk);
            self.chunks_modified.fetch_add(1, Ordering::AcqRel);
            self.chunks_modified_not_uploaded
                .fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        let marker = marker_path(&self.config.storage_root, chunk);
        if st.uploaded.test(chunk) {
            // the pool copy is stale now
            fs::remove_file(&marker).context(MarkerSnafu {
                path: marker.clone(),
            })?;
            st.uploaded.clear(chunk);
            self.chunks_modified_not_uploaded
                .fetch_add(1, Ordering::AcqRel);
        } else if marker.exists() {
            // an upload is in flight; pulling its marker guarantees the chunk
            // ends the sweep as not-uploaded instead of this write being
            // silently uploaded-over
            fs::remove_file(&marker).context(MarkerSnafu {
                path: marker.clone(),
            })?;
        }
        Ok(())
    }

    /// Persist the uploaded flag for `chunk` before its bytes travel.
    /// Returns false when the chunk is already flagged.
    pub(crate) fn begin_upload(&self, chunk: ChunkIndex) -> Result<bool> {
        let _st = self.state();
        let marker = marker_path(&self.config.storage_root, chunk);
        if marker.exists() {
            return Ok(false);
        }
        File::create(&marker).context(MarkerSnafu {
            path: marker.clone(),
        })?;
        Ok(true)
    }

    /// Commit a successful upload. Returns false when a concurrent write (or
    /// a shrink) pulled the marker while the transfer was in flight, in which
    /// case the chunk stays not-uploaded.
    pub(crate) fn finish_upload(&self, chunk: ChunkIndex) -> bool {
        let mut st = self.state();
        let marker = marker_path(&self.config.storage_root, chunk);
        if !marker.exists() {
            return false;
        }
        if st.uploaded.set(chunk) {
            self.chunks_modified_not_uploaded
                .fetch_sub(1, Ordering::AcqRel);
        }
        true
    }

    /// Back out of an upload that failed: drop the marker so the next sweep
    /// retries the chunk.
    pub(crate) fn abort_upload(&self, chunk: ChunkIndex) {
        let _st = self.state();
        let marker = marker_path(&self.config.storage_root, chunk);
        if marker.exists() {
            if let Err(e) = fs::remove_file(&marker) {
                tracing::warn!(
                    "couldn't drop uploaded marker {} after failed upload: {}",
                    marker.display(),
                    e
                );
            }
        }
    }

    /// Record a chunk materialized (zero-filled) by a resize grow.
    pub(crate) fn note_chunk_materialized(&self, chunk: ChunkIndex) {
        let mut st = self.state();
        if st.modified.set(chunk) {
            self.chunks_modified.fetch_add(1, Ordering::AcqRel);
            self.chunks_modified_not_uploaded
                .fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Delete a trailing chunk during a shrink and retire its state. Chunks
    /// that were never modified have nothing on disk and are skipped.
    pub(crate) fn drop_trailing_chunk(&self, chunk: ChunkIndex) -> Result<()> {
        use kage_types::chunk::chunk_path;

        let mut st = self.state();
        if !st.modified.test(chunk) {
            return Ok(());
        }
        let path = chunk_path(&self.config.storage_root, chunk);
        let marker = marker_path(&self.config.storage_root, chunk);
        fs::remove_file(&path).context(crate::err::RemoveChunkSnafu { path: path.clone() })?;
        if marker.exists() {
            fs::remove_file(&marker).context(MarkerSnafu {
                path: marker.clone(),
            })?;
        }
        if st.uploaded.test(chunk) {
            // already in the pool, so it was not pending
            st.uploaded.clear(chunk);
        } else {
            self.chunks_modified_not_uploaded
                .fetch_sub(1, Ordering::AcqRel);
        }
        st.modified.clear(chunk);
        self.chunks_modified.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Adopt a chunk found on disk by the recovery scanner.
    pub(crate) fn note_recovered_chunk(&self, chunk: ChunkIndex, uploaded: bool) {
        let mut st = self.state();
        st.modified.set(chunk);
        self.chunks_modified.fetch_add(1, Ordering::AcqRel);
        if uploaded {
            st.uploaded.set(chunk);
        } else {
            self.chunks_modified_not_uploaded
                .fetch_add(1, Ordering::AcqRel);
        }
    }
}
