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

//! Startup recovery: rebuild the bitmaps and counters from the sharded
//! on-disk layout. The layout is the single source of truth; the in-memory
//! state is a cache of it, so after recovery the store is in exactly the
//! state it would be in had the process never restarted.
//!
//! Parsing is strict and total. Any entry that doesn't parse, is out of
//! range, is misplaced relative to its shard, or has the wrong size means
//! someone else wrote into the overlay root; that is corruption, not noise,
//! and mounting aborts.

use std::{collections::HashSet, fs, path::Path, time::Instant};

use kage_types::{
    chunk::{parse_decimal, parse_shard_entry, shard_of, ShardEntry, CHUNKS_PER_SHARD},
    total_chunks, ChunkIndex,
};
use snafu::ResultExt;
use tracing::debug;

use crate::{
    err::{CreateDirSnafu, InvalidCacheSnafu, Result, ScanCacheSnafu},
    image::Image,
};

impl Image {
    pub(crate) fn recover(&self) -> Result<()> {
        let start = Instant::now();
        let root = self.config().storage_root.clone();
        fs::create_dir_all(&root).context(CreateDirSnafu { path: root.clone() })?;

        let chunk_limit = total_chunks(self.config().initial_size, self.config().chunk_size);
        for entry in fs::read_dir(&root).context(ScanCacheSnafu { path: root.clone() })? {
            let entry = entry.context(ScanCacheSnafu { path: root.clone() })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                return InvalidCacheSnafu {
                    path: entry.path(),
                    detail: "non-UTF-8 name in overlay root",
                }
                .fail();
            };
            let shard = match parse_decimal(name) {
                Some(shard) if shard % CHUNKS_PER_SHARD == 0 => shard,
                _ => {
                    return InvalidCacheSnafu {
                        path: entry.path(),
                        detail: "not a shard directory name",
                    }
                    .fail()
                }
            };
            let is_dir = entry
                .file_type()
                .context(ScanCacheSnafu { path: entry.path() })?
                .is_dir();
            if !is_dir {
                return InvalidCacheSnafu {
                    path: entry.path(),
                    detail: "shard entry is not a directory",
                }
                .fail();
            }
            self.recover_shard(&entry.path(), shard, chunk_limit)?;
        }

        debug!(
            "recovered overlay at {}: {} chunks, {} pending upload, cost: {:?}",
            root.display(),
            self.chunks_modified(),
            self.chunks_modified_not_uploaded(),
            start.elapsed()
        );
        Ok(())
    }

    fn recover_shard(&self, path: &Path, shard: u64, chunk_limit: u64) -> Result<()> {
        let chunk_size = self.config().chunk_size;
        let mut found: Vec<ChunkIndex> = Vec::new();
        let mut markers: HashSet<ChunkIndex> = HashSet::new();

        for entry in fs::read_dir(path).context(ScanCacheSnafu { path: path.to_path_buf() })? {
            let entry = entry.context(ScanCacheSnafu { path: path.to_path_buf() })?;
            let name = entry.file_name();
            let parsed = name.to_str().and_then(parse_shard_entry);
            let Some(parsed) = parsed else {
                return InvalidCacheSnafu {
                    path: entry.path(),
                    detail: "unrecognized entry in shard directory",
                }
                .fail();
            };
            let chunk = match parsed {
                ShardEntry::Chunk(chunk) | ShardEntry::UploadedMarker(chunk) => chunk,
            };
            if chunk > chunk_limit {
                return InvalidCacheSnafu {
                    path: entry.path(),
                    detail: "chunk beyond the image, should have been deleted",
                }
                .fail();
            }
            if shard_of(chunk) != shard {
                return InvalidCacheSnafu {
                    path: entry.path(),
                    detail: "chunk filed under the wrong shard",
                }
                .fail();
            }
            let meta = entry
                .metadata()
                .context(ScanCacheSnafu { path: entry.path() })?;
            if !meta.is_file() {
                return InvalidCacheSnafu {
                    path: entry.path(),
                    detail: "shard entry is not a regular file",
                }
                .fail();
            }
            match parsed {
                ShardEntry::Chunk(chunk) => {
                    if meta.len() != chunk_size {
                        return InvalidCacheSnafu {
                            path: entry.path(),
                            detail: format!(
                                "chunk file is {} bytes, expected {}",
                                meta.len(),
                                chunk_size
                            ),
                        }
                        .fail();
                    }
                    found.push(chunk);
                }
                ShardEntry::UploadedMarker(chunk) => {
                    markers.insert(chunk);
                }
            }
        }

        for chunk in found {
            self.note_recovered_chunk(chunk, markers.remove(&chunk));
        }
        if let Some(orphan) = markers.iter().next() {
            return InvalidCacheSnafu {
                path: path.join(format!("{}.uploaded", orphan)),
                detail: "uploaded marker without its chunk file",
            }
            .fail();
        }
        Ok(())
    }
}
