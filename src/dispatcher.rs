//
// imbatch - dispatcher.rs - top-level call entry point
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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alloc::{Allocator, DefaultAllocator};
use crate::config::Config;
use crate::coordinator::{BatchCoordinator, BatchOutput};
use crate::device::{DeviceStreamFactory, NullDeviceStreamFactory};
use crate::error::Result;
use crate::reader::{FakeReader, ImageReaderFactory};
use crate::worker::WorkerPool;

#[cfg(feature = "image-io")]
use crate::reader::fs::FsImageReaderFactory;

/// Owns the coordinator and the current worker pool and implements the
/// five-step `call` entry point (§4.H). One dispatcher instance is meant to
/// live for the lifetime of a process's batch-loading use: rebuilding the
/// pool is expensive enough that it only happens when the requested thread
/// count actually changes.
pub struct Dispatcher {
    coordinator: BatchCoordinator,
    pool: Option<WorkerPool>,
    pool_size: usize,
}

impl Dispatcher {
    pub fn new(
        reader_factory: Arc<dyn ImageReaderFactory>,
        allocator: Arc<dyn Allocator>,
        stream_factory: Arc<dyn DeviceStreamFactory>,
    ) -> Dispatcher {
        Dispatcher {
            coordinator: BatchCoordinator::new(reader_factory, allocator, stream_factory),
            pool: None,
            pool_size: 0,
        }
    }

    /// A dispatcher backed by the real decoder (`image` crate), default
    /// allocator, and host-simulated stream. Available under `image-io`.
    #[cfg(feature = "image-io")]
    pub fn with_image_io() -> Dispatcher {
        Dispatcher::new(
            Arc::new(FsImageReaderFactory),
            Arc::new(DefaultAllocator),
            Arc::new(NullDeviceStreamFactory),
        )
    }

    /// A dispatcher backed by the fake in-memory reader, for tests and the
    /// CLI's `--no-image-io` mode.
    pub fn with_fake_reader() -> Dispatcher {
        Dispatcher::new(
            Arc::new(FakeReader::new()),
            Arc::new(DefaultAllocator),
            Arc::new(NullDeviceStreamFactory),
        )
    }

    /// Runs one batch call (§4.H):
    ///
    /// 1. Validate the config; rebuild the worker pool if the requested
    ///    thread count changed.
    /// 2. If the filename list matches what's already registered, skip
    ///    straight to step 4 - this is the no-redecode reuse path.
    /// 3. Otherwise clear the previous batch and register the new names.
    /// 4. Prefetch (derive plans, allocate buffers, kick off fetch).
    /// 5. If `config.prefetch()`, return `None` without waiting; otherwise
    ///    sync and relinquish the finished batch.
    pub fn call(&mut self, config: Config, filenames: &[PathBuf]) -> Result<Option<BatchOutput>> {
        config.validate()?;

        if config.num_threads() != self.pool_size {
            self.rebuild_pool(config.num_threads());
        }

        let reusing = self.coordinator.registered_names() == filenames;
        *self.coordinator.config_mut() = config.clone();

        if !reusing {
            log::info!(
                "dispatcher: filename list changed, clearing batch ({} -> {} items)",
                self.coordinator.registered_names().len(),
                filenames.len()
            );
            self.coordinator.clear();
            *self.coordinator.config_mut() = config.clone();
            for name in filenames {
                self.coordinator.register_item(name.clone());
            }
            self.coordinator.prefetch()?;
        }

        if config.prefetch() {
            return Ok(None);
        }

        self.coordinator.sync()?;
        Ok(Some(self.coordinator.relinquish()))
    }

    /// Convenience wrapper taking `&Path` filenames.
    pub fn call_paths(&mut self, config: Config, filenames: &[&Path]) -> Result<Option<BatchOutput>> {
        let owned: Vec<PathBuf> = filenames.iter().map(|p| p.to_path_buf()).collect();
        self.call(config, &owned)
    }

    fn rebuild_pool(&mut self, n: usize) {
        log::info!("dispatcher: worker count changing {} -> {}", self.pool_size, n);
        if let Some(pool) = self.pool.take() {
            self.coordinator.queue().finalize();
            pool.join();
        }
        self.coordinator.reset_queue();
        let pool = WorkerPool::new(
            n,
            self.coordinator.queue(),
            self.coordinator.context_handle(),
            self.coordinator.reader_factory(),
        );
        self.pool = Some(pool);
        self.pool_size = n;
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            self.coordinator.queue().finalize();
            pool.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Packing, ResizeMode};

    fn names(list: &[&str]) -> Vec<PathBuf> {
        list.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn call_with_no_prefetch_returns_ready_output() {
        let mut dispatcher = Dispatcher::with_fake_reader();
        let mut cfg = Config::new();
        cfg.set_num_threads(2).unwrap();
        let files = names(&["a.jpg", "b.jpg"]);
        let output = dispatcher.call(cfg, &files).unwrap();
        match output {
            Some(BatchOutput::Individual(results)) => {
                assert_eq!(results.len(), 2);
                for r in &results {
                    assert!(r.error.is_none());
                    assert!(r.tensor.is_some());
                }
            }
            _ => panic!("expected individual output"),
        }
    }

    #[test]
    fn repeated_call_with_same_filenames_reuses_the_batch() {
        let mut dispatcher = Dispatcher::with_fake_reader();
        let mut cfg = Config::new();
        cfg.set_num_threads(2).unwrap();
        let files = names(&["a.jpg", "b.jpg"]);

        let first = dispatcher.call(cfg.clone(), &files).unwrap();
        match first {
            Some(BatchOutput::Individual(results)) => {
                for r in &results {
                    assert!(r.tensor.is_some());
                }
            }
            _ => panic!("expected individual output"),
        }

        // Second call with identical filenames should also complete
        // (second sync returns immediately since items are still ready)
        // and must still hand back populated tensors, not the first call's
        // now-consumed ones.
        let second = dispatcher.call(cfg, &files).unwrap();
        match second {
            Some(BatchOutput::Individual(results)) => {
                assert_eq!(results.len(), 2);
                for r in &results {
                    assert!(r.error.is_none());
                    assert!(r.tensor.is_some());
                }
            }
            _ => panic!("expected individual output"),
        }
        assert_eq!(dispatcher.coordinator.registered_names(), files.as_slice());
    }

    #[test]
    fn prefetch_only_call_returns_none() {
        let mut dispatcher = Dispatcher::with_fake_reader();
        let mut cfg = Config::new();
        cfg.set_num_threads(1).unwrap();
        cfg.set_prefetch(true).unwrap();
        let files = names(&["a.jpg"]);
        let output = dispatcher.call(cfg, &files).unwrap();
        assert!(output.is_none());
    }

    #[test]
    fn packed_mode_produces_a_single_host_buffer() {
        let mut dispatcher = Dispatcher::with_fake_reader();
        let mut cfg = Config::new();
        cfg.set_num_threads(2).unwrap();
        cfg.set_packing(Packing::Packed).unwrap();
        cfg.set_resize(ResizeMode::Fixed(8, 8)).unwrap();
        let files = names(&["a.jpg", "b.jpg", "c.jpg"]);
        let output = dispatcher.call(cfg, &files).unwrap();
        match output {
            Some(BatchOutput::Packed { host, shape, results, .. }) => {
                assert_eq!(shape, (8, 8, 3, 3));
                assert_eq!(host.len(), 8 * 8 * 3 * 3);
                assert_eq!(results.len(), 3);
            }
            _ => panic!("expected packed output"),
        }
    }

    #[test]
    fn invalid_config_is_rejected_before_touching_workers() {
        let mut dispatcher = Dispatcher::with_fake_reader();
        let mut cfg = Config::new();
        cfg.set_packing(Packing::Packed).unwrap();
        cfg.set_resize(ResizeMode::ShortestSide(32)).unwrap();
        let files = names(&["a.jpg"]);
        assert!(dispatcher.call(cfg, &files).is_err());
    }

    #[test]
    fn changing_filenames_triggers_a_fresh_decode() {
        let mut dispatcher = Dispatcher::with_fake_reader();
        let mut cfg = Config::new();
        cfg.set_num_threads(2).unwrap();
        dispatcher.call(cfg.clone(), &names(&["a.jpg"])).unwrap();
        let output = dispatcher.call(cfg, &names(&["b.jpg", "c.jpg"])).unwrap();
        match output {
            Some(BatchOutput::Individual(results)) => assert_eq!(results.len(), 2),
            _ => panic!("expected individual output"),
        }
    }
}
