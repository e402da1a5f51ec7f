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

pub mod bitmap;
pub mod chunk;

pub const KAGE: &str = "kage";
pub const KAGE_DEBUG_OVERLAY_ROOT: &str = "/tmp/kage.overlay";
pub const KAGE_DEBUG_CHUNK_POOL: &str = "/tmp/kage.pool";

/// Default logical chunk size of an overlay image.
pub const DEFAULT_CHUNK_SIZE: u64 = 128 << 10; // 128 KiB

pub type ChunkIndex = u64;

/// Number of whole or partial chunks needed to cover `size` bytes.
pub fn total_chunks(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size)
}
