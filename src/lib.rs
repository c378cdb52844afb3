//
// imbatch - a multithreaded batched image-ingest pipeline in Rust
//
// Copyright (c) 2018 Brion Vibber
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.
//

//! Decodes, resizes, crops and color-augments a batch of image files onto
//! host (and optionally device) tensors using a persistent pool of worker
//! threads, so the cost of one batch overlaps with the caller's previous
//! batch of GPU work.
//!
//! The entry point is [`Dispatcher::call`], modeled on the two-phase
//! prefetch/fetch `call()` a training loop makes once per step. Decoding
//! itself is left to an [`ImageReader`] the embedder supplies (a reference
//! decoder backed by the `image` crate is available under the `image-io`
//! feature); this crate owns scheduling, resize/crop/color kernels, and the
//! shared batch state those workers coordinate through.

pub mod alloc;
pub mod buffer_pool;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod item;
pub mod kernels;
pub mod pack;
pub mod plan;
pub mod queue;
pub mod reader;
pub mod rng;
pub mod worker;

pub use config::{BrightnessMatrix, Config, CropLocation, Packing, ResizeMode};
pub use coordinator::{BatchOutput, ItemResult};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use reader::{ImageReader, ImageReaderFactory, Shape};
