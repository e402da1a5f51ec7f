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

//! The background uploader.
//!
//! Sweeps the sharded layout for chunks whose uploaded marker is absent and
//! pushes them to the remote pool. The marker is persisted *before* the
//! bytes travel: a write racing in afterwards finds "already uploaded" and
//! pulls the marker back, so the worst case is a redundant re-upload, never
//! a silently missed update. Between sweeps the task idles until either the
//! interval elapses or the image is closed.

use std::{fs, sync::Arc, time::Duration};

use bytes::Bytes;
use kage_types::{
    chunk::{chunk_path, parse_decimal, parse_shard_entry, pool_object_key, ShardEntry},
    ChunkIndex,
};
use kage_utils::object_storage::ObjectStoragePath;
use snafu::ResultExt;
use tokio::{select, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    err::{PoolUploadSnafu, ReadChunkSnafu, Result},
    image::{Image, ImageConfig},
};

pub const DEFAULT_UPLOAD_IDLE_INTERVAL: Duration = Duration::from_secs(5);

pub struct Uploader {
    img: Arc<Image>,
}

impl Uploader {
    pub fn new(img: Arc<Image>) -> Self {
        Self { img }
    }

    pub(crate) async fn run(self, cancel_token: CancellationToken) {
        debug!("uploader is started");
        loop {
            self.sweep().await;
            select! {
                _ = cancel_token.cancelled() => {
                    debug!("uploader is cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.img.config().upload_idle_interval) => {}
            }
        }
    }

    /// One full pass over every shard. A chunk that fails to upload keeps no
    /// marker and is simply attempted again next sweep; per-chunk errors
    /// never end the loop.
    pub async fn sweep(&self) {
        let limiter = RateLimiter::new(self.img.config());
        for chunk in self.pending_chunks() {
            let started = Instant::now();
            match self.upload_chunk(chunk).await {
                Ok(bytes) => limiter.pace(bytes, started).await,
                Err(e) => warn!("upload of chunk {} failed, will retry: {}", chunk, e),
            }
        }
    }

    /// Chunks present on disk without an uploaded marker, in index order.
    /// The layout, not the bitmaps, is what gets walked: the files are the
    /// authoritative record.
    fn pending_chunks(&self) -> Vec<ChunkIndex> {
        let root = &self.img.config().storage_root;
        let mut shards: Vec<u64> = Vec::new();
        match fs::read_dir(root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if let Some(shard) = entry.file_name().to_str().and_then(parse_decimal) {
                        shards.push(shard);
                    }
                }
            }
            Err(e) => {
                warn!("couldn't scan overlay root {}: {}", root.display(), e);
                return Vec::new();
            }
        }
        shards.sort_unstable();

        let mut pending = Vec::new();
        for shard in shards {
            let dir = root.join(shard.to_string());
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("couldn't scan shard {}: {}", dir.display(), e);
                    continue;
                }
            };
            let mut chunks = Vec::new();
            let mut flagged = std::collections::HashSet::new();
            for entry in entries.flatten() {
                match entry.file_name().to_str().and_then(parse_shard_entry) {
                    Some(ShardEntry::Chunk(chunk)) => chunks.push(chunk),
                    Some(ShardEntry::UploadedMarker(chunk)) => {
                        flagged.insert(chunk);
                    }
                    None => {}
                }
            }
            chunks.sort_unstable();
            pending.extend(chunks.into_iter().filter(|c| !flagged.contains(c)));
        }
        pending
    }

    /// Flag, read, and push one chunk. Returns the number of bytes moved,
    /// zero when there was nothing to do.
    async fn upload_chunk(&self, chunk: ChunkIndex) -> Result<u64> {
        if !self.img.begin_upload(chunk)? {
            return Ok(0);
        }
        match self.transfer(chunk).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                self.img.abort_upload(chunk);
                Err(e)
            }
        }
    }

    async fn transfer(&self, chunk: ChunkIndex) -> Result<u64> {
        let path = chunk_path(&self.img.config().storage_root, chunk);
        let data = fs::read(&path).context(ReadChunkSnafu { path })?;
        let bytes = data.len() as u64;
        let key = ObjectStoragePath::from(pool_object_key(chunk));
        self.img
            .pool()
            .put(&key, Bytes::from(data))
            .await
            .context(PoolUploadSnafu { chunk })?;
        if self.img.finish_upload(chunk) {
            debug!("uploaded chunk {} ({} bytes)", chunk, bytes);
        } else {
            debug!("chunk {} was rewritten mid-upload, leaving it pending", chunk);
        }
        Ok(bytes)
    }
}

/// Paces uploads toward a target byte rate on the monotonic clock. Checkin
/// mode and a zero rate both disable throttling.
struct RateLimiter {
    rate: u64,
}

impl RateLimiter {
    fn new(config: &ImageConfig) -> Self {
        let rate = if config.checkin {
            0
        } else {
            config.upload_rate.as_bytes()
        };
        Self { rate }
    }

    /// Sleep needed after moving `bytes` in `elapsed` so the effective rate
    /// approaches the target.
    fn delay_for(&self, bytes: u64, elapsed: Duration) -> Duration {
        if self.rate == 0 || bytes == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / self.rate as f64).saturating_sub(elapsed)
    }

    async fn pace(&self, bytes: u64, started: Instant) {
        let delay = self.delay_for(bytes, started.elapsed());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
