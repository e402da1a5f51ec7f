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

//! Foreground chunk reads and writes.
//!
//! Callers are the filesystem dispatch layer, which only ever reads chunks it
//! has already verified are in the overlay; precondition violations are
//! caller bugs and fail fast. A chunk file, once it exists, is always exactly
//! `chunk_size` bytes; trimming the last partial chunk to the logical image
//! size is the read path's job upstream.

use std::{
    cmp::min,
    fs,
    fs::OpenOptions,
    os::unix::fs::FileExt,
};

use kage_types::{
    chunk::{chunk_path, shard_dir},
    ChunkIndex,
};
use snafu::ResultExt;

use crate::{
    err::{CreateDirSnafu, OpenChunkSnafu, ReadChunkSnafu, ResizeChunkSnafu, Result, WriteChunkSnafu},
    image::Image,
};

impl Image {
    /// Read `buf.len()` bytes at `offset` within a modified chunk.
    ///
    /// The chunk file is guaranteed to exist by invariant; failure to open or
    /// read it is a cache-consistency fault surfaced to the caller.
    pub fn read_chunk(
        &self,
        image_size: u64,
        chunk: ChunkIndex,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        let chunk_size = self.config().chunk_size;
        let length = buf.len() as u64;
        assert!(self.is_modified(chunk), "read of unmodified chunk {}", chunk);
        assert!(offset < chunk_size);
        assert!(offset + length <= chunk_size);
        assert!(chunk * chunk_size + offset + length <= image_size);

        let path = chunk_path(&self.config().storage_root, chunk);
        let file = fs::File::open(&path).context(OpenChunkSnafu { path: path.clone() })?;
        file.read_exact_at(buf, offset)
            .context(ReadChunkSnafu { path })
    }

    /// Write `data` at `offset` within a chunk.
    ///
    /// The first write to a chunk must cover its entire valid extent, so a
    /// never-before-seen chunk file can't be left holding unspecified bytes
    /// while marked modified; the tail beyond a partial last chunk's valid
    /// extent is zero-filled up to the fixed file size. Bits and counters
    /// only move once the byte write has succeeded.
    pub fn write_chunk(
        &self,
        image_size: u64,
        chunk: ChunkIndex,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let chunk_size = self.config().chunk_size;
        let length = data.len() as u64;
        let first_write = !self.is_modified(chunk);
        let valid_extent = min(chunk_size, image_size.saturating_sub(chunk * chunk_size));
        assert!(
            !first_write || (offset == 0 && length == valid_extent),
            "first write to chunk {} must cover its full valid extent",
            chunk
        );
        assert!(offset < chunk_size);
        assert!(offset + length <= chunk_size);
        assert!(chunk * chunk_size + offset + length <= image_size);

        let dir = shard_dir(&self.config().storage_root, chunk);
        fs::create_dir_all(&dir).context(CreateDirSnafu { path: dir })?;
        let path = chunk_path(&self.config().storage_root, chunk);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)
            .context(OpenChunkSnafu { path: path.clone() })?;
        file.write_all_at(data, offset)
            .context(WriteChunkSnafu { path: path.clone() })?;
        if first_write && length < chunk_size {
            file.set_len(chunk_size).context(ResizeChunkSnafu { path })?;
        }
        self.note_chunk_written(chunk)
    }
}

#[cfg(test)]
mod tests {
    use kage_types::chunk::{chunk_path, marker_path};

    use crate::image::test_util::temp_image;

    const CS: u64 = 4096;

    #[test]
    fn write_then_read_roundtrip() {
        let (_dir, img) = temp_image(CS, CS * 8);
        let data = vec![0xabu8; CS as usize];
        img.write_chunk(CS * 8, 3, 0, &data).unwrap();

        let mut buf = vec![0u8; 100];
        img.read_chunk(CS * 8, 3, 200, &mut buf).unwrap();
        assert_eq!(buf, vec![0xabu8; 100]);

        assert_eq!(img.chunks_modified(), 1);
        assert_eq!(img.chunks_modified_not_uploaded(), 1);
        assert!(img.is_modified(3));
        assert!(!img.is_uploaded(3));
    }

    #[test]
    fn overwrite_keeps_counters_stable() {
        let (_dir, img) = temp_image(CS, CS * 2);
        img.write_chunk(CS * 2, 0, 0, &vec![1u8; CS as usize]).unwrap();
        img.write_chunk(CS * 2, 0, 17, &[9u8; 5]).unwrap();
        assert_eq!(img.chunks_modified(), 1);
        assert_eq!(img.chunks_modified_not_uploaded(), 1);

        let mut buf = [0u8; 7];
        img.read_chunk(CS * 2, 0, 16, &mut buf).unwrap();
        assert_eq!(buf, [1, 9, 9, 9, 9, 9, 1]);
    }

    #[test]
    fn first_write_to_partial_last_chunk_is_padded() {
        // image ends 100 bytes into chunk 1
        let size = CS + 100;
        let (_dir, img) = temp_image(CS, size);
        img.write_chunk(size, 1, 0, &[5u8; 100]).unwrap();

        let path = chunk_path(&img.config().storage_root, 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), CS);
    }

    #[test]
    #[should_panic(expected = "full valid extent")]
    fn partial_first_write_is_rejected() {
        let (_dir, img) = temp_image(CS, CS * 4);
        let _ = img.write_chunk(CS * 4, 2, 10, &[1u8; 16]);
    }

    #[test]
    #[should_panic(expected = "read of unmodified chunk")]
    fn read_of_unmodified_chunk_is_rejected() {
        let (_dir, img) = temp_image(CS, CS * 4);
        let mut buf = [0u8; 16];
        let _ = img.read_chunk(CS * 4, 1, 0, &mut buf);
    }

    #[test]
    fn rewrite_of_uploaded_chunk_goes_stale_again() {
        let (_dir, img) = temp_image(CS, CS * 4);
        img.write_chunk(CS * 4, 0, 0, &vec![1u8; CS as usize]).unwrap();
        assert!(img.begin_upload(0).unwrap());
        assert!(img.finish_upload(0));
        assert!(img.is_uploaded(0));
        assert_eq!(img.chunks_modified_not_uploaded(), 0);

        img.write_chunk(CS * 4, 0, 64, &[2u8; 8]).unwrap();
        assert!(!img.is_uploaded(0));
        assert_eq!(img.chunks_modified_not_uploaded(), 1);
        assert!(!marker_path(&img.config().storage_root, 0).exists());
    }

    #[test]
    fn write_during_inflight_upload_pulls_the_marker() {
        let (_dir, img) = temp_image(CS, CS * 4);
        img.write_chunk(CS * 4, 0, 0, &vec![1u8; CS as usize]).unwrap();
        // uploader flagged the chunk but has not finished the transfer
        assert!(img.begin_upload(0).unwrap());

        img.write_chunk(CS * 4, 0, 0, &[2u8; 8]).unwrap();
        assert!(!marker_path(&img.config().storage_root, 0).exists());
        assert_eq!(img.chunks_modified_not_uploaded(), 1);

        // the transfer lands afterwards and must not mark the chunk uploaded
        assert!(!img.finish_upload(0));
        assert!(!img.is_uploaded(0));
        assert_eq!(img.chunks_modified_not_uploaded(), 1);
    }
}
