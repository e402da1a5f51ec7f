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

//! Per-chunk bit-sets with change notification.
//!
//! Every observed bit transition publishes a [`BitmapDelta`] on a broadcast
//! channel so external statistics streams can follow the modified/uploaded
//! populations live. Publishing never blocks and never fails a mutation;
//! observers that fall behind simply miss events (they can re-read
//! [`ChunkBitmap::count_ones`]).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ChunkIndex;

const WORD_BITS: u64 = 64;
const DELTA_CHANNEL_CAPACITY: usize = 1024;

/// A single bit transition, as seen by observers (and streamed to external
/// statistics consumers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapDelta {
    pub chunk: ChunkIndex,
    /// +1 for a set, -1 for a clear.
    pub delta: i64,
}

/// A growable bit-set indexed by chunk.
///
/// Not internally synchronized; the owning image guards it with its state
/// lock. Indices beyond the current capacity read as unset, and `set` grows
/// the backing words on demand.
#[derive(Debug)]
pub struct ChunkBitmap {
    words: Vec<u64>,
    ones: u64,
    delta_tx: broadcast::Sender<BitmapDelta>,
}

impl ChunkBitmap {
    pub fn new(chunks: u64) -> Self {
        let (delta_tx, _) = broadcast::channel(DELTA_CHANNEL_CAPACITY);
        Self {
            words: vec![0; chunks.div_ceil(WORD_BITS) as usize],
            ones: 0,
            delta_tx,
        }
    }

    pub fn test(&self, chunk: ChunkIndex) -> bool {
        let word = (chunk / WORD_BITS) as usize;
        match self.words.get(word) {
            Some(w) => w & (1 << (chunk % WORD_BITS)) != 0,
            None => false,
        }
    }

    /// Set the bit, growing the backing store if needed.
    /// Returns whether the bit actually changed.
    pub fn set(&mut self, chunk: ChunkIndex) -> bool {
        let word = (chunk / WORD_BITS) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1 << (chunk % WORD_BITS);
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.ones += 1;
        self.notify(chunk, 1);
        true
    }

    /// Clear the bit. Returns whether the bit actually changed.
    pub fn clear(&mut self, chunk: ChunkIndex) -> bool {
        let word = (chunk / WORD_BITS) as usize;
        if word >= self.words.len() {
            return false;
        }
        let mask = 1 << (chunk % WORD_BITS);
        if self.words[word] & mask == 0 {
            return false;
        }
        self.words[word] &= !mask;
        self.ones -= 1;
        self.notify(chunk, -1);
        true
    }

    pub fn count_ones(&self) -> u64 {
        self.ones
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BitmapDelta> {
        self.delta_tx.subscribe()
    }

    fn notify(&self, chunk: ChunkIndex, delta: i64) {
        // send only errors when there is no receiver, which is fine
        let _ = self.delta_tx.send(BitmapDelta { chunk, delta });
    }
}
