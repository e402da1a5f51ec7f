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

//! The copy-on-write overlay store for a network-backed virtual disk image.
//!
//! Locally modified chunks are persisted under a sharded directory layout,
//! an uploaded marker per chunk records which of them the remote pool has
//! durably received, and a background [`Uploader`] pushes the rest.

pub mod err;
mod image;
mod recover;
mod resize;
mod store;
mod uploader;

pub use err::{Error, Result};
pub use image::{Image, ImageConfig};
pub use uploader::{Uploader, DEFAULT_UPLOAD_IDLE_INTERVAL};
