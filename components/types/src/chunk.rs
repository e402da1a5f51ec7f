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

//! Chunk addressing for the sharded on-disk overlay layout.
//!
//! A chunk with index `c` lives at `<root>/<shard_of(c)>/<c>`, where a shard
//! groups [`CHUNKS_PER_SHARD`] consecutive chunks so no directory ever holds
//! more than that many chunk files. The on-disk names are the authoritative
//! record of which chunks exist, so parsing is strict: only canonical decimal
//! names (and their `.uploaded` markers) are recognized.

use std::path::{Path, PathBuf};

use crate::ChunkIndex;

/// How many consecutive chunks share one shard directory.
pub const CHUNKS_PER_SHARD: u64 = 4096;

/// Suffix of the durable per-chunk uploaded marker file.
pub const UPLOADED_MARKER_SUFFIX: &str = "uploaded";

/// The shard a chunk belongs to, named by its first chunk index.
pub fn shard_of(chunk: ChunkIndex) -> u64 {
    chunk / CHUNKS_PER_SHARD * CHUNKS_PER_SHARD
}

pub fn shard_dir(root: &Path, chunk: ChunkIndex) -> PathBuf {
    root.join(shard_of(chunk).to_string())
}

pub fn chunk_path(root: &Path, chunk: ChunkIndex) -> PathBuf {
    shard_dir(root, chunk).join(chunk.to_string())
}

/// Path of the marker file recording that `chunk` has been uploaded.
pub fn marker_path(root: &Path, chunk: ChunkIndex) -> PathBuf {
    shard_dir(root, chunk).join(format!("{}.{}", chunk, UPLOADED_MARKER_SUFFIX))
}

/// Key of the chunk object in the remote pool.
pub fn pool_object_key(chunk: ChunkIndex) -> String {
    format!("chunks/{}", chunk)
}

/// An entry of a shard directory, as recognized by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardEntry {
    Chunk(ChunkIndex),
    UploadedMarker(ChunkIndex),
}

/// Parse a canonical decimal u64: digits only, no leading zero unless the
/// value is exactly "0". Rejecting non-canonical spellings means every chunk
/// has exactly one valid on-disk name.
pub fn parse_decimal(name: &str) -> Option<u64> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Parse a shard directory entry name, `None` if it is unrecognized.
pub fn parse_shard_entry(name: &str) -> Option<ShardEntry> {
    match name.split_once('.') {
        None => parse_decimal(name).map(ShardEntry::Chunk),
        Some((stem, suffix)) if suffix == UPLOADED_MARKER_SUFFIX => {
            parse_decimal(stem).map(ShardEntry::UploadedMarker)
        }
        Some(_) => None,
    }
}
