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

//! Logical image resizing.
//!
//! Resizing is not atomic across chunks: a failure aborts mid-way and leaves
//! the chunks already transitioned in place, each individually
//! invariant-preserving.

use std::{fs, fs::OpenOptions};

use kage_types::{
    chunk::{chunk_path, shard_dir},
    total_chunks, ChunkIndex,
};
use snafu::ResultExt;

use crate::{
    err::{CreateDirSnafu, OpenChunkSnafu, ResizeChunkSnafu, Result},
    image::Image,
};

impl Image {
    /// Grow or shrink the logical image from `current_size` to `new_size`.
    ///
    /// When shrinking off a chunk boundary, the chunk containing the new end
    /// of the image must already be modified; otherwise a later expansion
    /// could reveal data that was logically truncated away.
    pub fn set_size(&self, current_size: u64, new_size: u64) -> Result<()> {
        let chunk_size = self.config().chunk_size;
        assert!(
            new_size >= current_size
                || new_size % chunk_size == 0
                || self.is_modified(new_size / chunk_size),
            "shrink boundary chunk {} is not modified",
            new_size / chunk_size
        );

        let old_chunks = total_chunks(current_size, chunk_size);
        let new_chunks = total_chunks(new_size, chunk_size);
        if new_size > current_size {
            self.grow(old_chunks, new_chunks)
        } else if new_size < current_size {
            self.shrink(new_size, new_chunks, old_chunks)
        } else {
            Ok(())
        }
    }

    /// Materialize every newly covered chunk as a zero-filled file of the
    /// fixed chunk size, modified and not uploaded.
    fn grow(&self, old_chunks: ChunkIndex, new_chunks: ChunkIndex) -> Result<()> {
        let chunk_size = self.config().chunk_size;
        for chunk in old_chunks..new_chunks {
            let dir = shard_dir(&self.config().storage_root, chunk);
            fs::create_dir_all(&dir).context(CreateDirSnafu { path: dir })?;
            let path = chunk_path(&self.config().storage_root, chunk);
            let file = fs::File::create(&path).context(OpenChunkSnafu { path: path.clone() })?;
            file.set_len(chunk_size).context(ResizeChunkSnafu { path })?;
            self.note_chunk_materialized(chunk);
        }
        Ok(())
    }

    fn shrink(&self, new_size: u64, new_chunks: ChunkIndex, old_chunks: ChunkIndex) -> Result<()> {
        let chunk_size = self.config().chunk_size;
        let partial = new_size % chunk_size;
        if partial != 0 {
            // Zero the cut-away tail of the chunk straddling the new end:
            // truncate to the surviving prefix, then restore the fixed file
            // size. The re-extended range reads back as zeros.
            let boundary = new_size / chunk_size;
            let path = chunk_path(&self.config().storage_root, boundary);
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .context(OpenChunkSnafu { path: path.clone() })?;
            file.set_len(partial)
                .context(ResizeChunkSnafu { path: path.clone() })?;
            file.set_len(chunk_size).context(ResizeChunkSnafu { path })?;
            // zeroing the tail changed the chunk's bytes; an uploaded boundary
            // chunk must go stale like any other rewrite
            self.note_chunk_written(boundary)?;
        }
        for chunk in new_chunks..old_chunks {
            self.drop_trailing_chunk(chunk)?;
        }
        Ok(())
    }
}
