//
// imbatch - worker.rs - persistent worker threads
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

use std::sync::{Arc, Mutex};
use std::thread;

use crate::buffer_pool::BufferPool;
use crate::config::Packing;
use crate::coordinator::BatchContext;
use crate::item::{Item, ItemState};
use crate::kernels::{apply_color_augmentation, resize_horizontal, resize_vertical};
use crate::queue::BatchQueue;
use crate::reader::ImageReader;
use crate::reader::ImageReaderFactory;

/// A fixed-size pool of persistent OS threads, created once at dispatcher
/// init and rebuilt only when the requested worker count changes (§4.H,
/// §5 "Scheduling model" - a deliberate departure from a task-stealing
/// pool: these threads live across calls rather than being spawned per
/// job, to amortize thread creation the way the source's global pool
/// does).
pub struct WorkerPool {
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        n: usize,
        queue: Arc<BatchQueue>,
        context: Arc<Mutex<BatchContext>>,
        reader_factory: Arc<dyn ImageReaderFactory>,
    ) -> WorkerPool {
        log::info!("worker pool: spawning {} worker(s)", n);
        let handles = (0..n)
            .map(|id| {
                let queue = queue.clone();
                let context = context.clone();
                let reader_factory = reader_factory.clone();
                thread::Builder::new()
                    .name(format!("imbatch-worker-{}", id))
                    .spawn(move || run(queue, context, reader_factory))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit. The caller must have already called
    /// `queue.finalize()` so `borrow_next` starts returning `None`.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run(queue: Arc<BatchQueue>, context: Arc<Mutex<BatchContext>>, reader_factory: Arc<dyn ImageReaderFactory>) {
    let mut reader = reader_factory.build();
    let mut buffers = BufferPool::new();

    while let Some(mut item) = queue.borrow_next() {
        // §4.G step 1: a real GPU backend would adopt the batch's device
        // here if it differed from the one this thread last used. The
        // host-simulated stream has no device identity to adopt.
        let ctx = context.lock().unwrap().clone();

        if !item.has_failed() {
            match item.state {
                ItemState::Probe => probe(&mut item, reader.as_mut()),
                ItemState::Fetch => fetch(&mut item, reader.as_mut(), &mut buffers, &ctx),
                ItemState::Ready => {}
            }
        }

        queue.return_item(item, move |returned| {
            if ctx.packing == Packing::Packed && ctx.gpu {
                if let (Some(pack), Some(stream), Some(device_pack)) =
                    (&ctx.pack, &ctx.stream, &ctx.device_pack)
                {
                    if let Err(e) = stream.copy_from_host_async(device_pack, pack.as_slice()) {
                        log::error!("device upload failed for item {}: {}", returned.index, e);
                        returned.fail(e);
                    }
                }
            }
        });
    }
}

fn probe(item: &mut Item, reader: &mut dyn ImageReader) {
    match reader.probe_shape(&item.name) {
        Ok(shape) => {
            log::trace!("item {} ({:?}): probe -> {:?}", item.index, item.name, shape);
            item.input_shape = Some(shape);
        }
        Err(e) => {
            log::error!("probe failed for {:?}: {}", item.name, e);
            item.fail(e);
        }
    }
}

fn fetch(item: &mut Item, reader: &mut dyn ImageReader, buffers: &mut BufferPool, ctx: &BatchContext) {
    let plan = match item.plan {
        Some(p) => p,
        None => return,
    };

    let decode_buf = buffers.get(0, 0);
    let shape = match reader.decode_pixels(&item.name, decode_buf) {
        Ok(s) => s,
        Err(e) => {
            log::error!("decode failed for {:?}: {}", item.name, e);
            item.fail(e);
            return;
        }
    };

    let (buf0, buf1) = buffers.split_mut();
    buf1.resize(plan.out_h as usize * shape.w as usize * plan.out_c as usize, 0.0);
    resize_vertical(
        buf1,
        buf0,
        plan.out_h,
        shape.h,
        shape.w,
        shape.c,
        plan.out_c,
        plan.crop_h,
        plan.crop_y,
    );

    let avg = ctx.avg;

    match (ctx.packing, &ctx.pack) {
        (Packing::Packed, Some(pack)) => {
            let dest = pack.slab_mut(item.index);
            resize_horizontal(
                dest,
                buf1,
                plan.out_w,
                shape.w,
                plan.out_h,
                plan.out_c,
                plan.crop_w,
                plan.crop_x,
                plan.flip,
            );
            apply_color_augmentation(
                dest,
                plan.out_h,
                plan.out_w,
                plan.out_c,
                avg,
                plan.brightness_shift,
                plan.contrast_shift,
                plan.saturation_shift,
            );
        }
        _ => {
            {
                let dest = item
                    .host_tensor
                    .as_mut()
                    .expect("individual mode allocates host_tensor before fetch")
                    .as_mut_slice();
                resize_horizontal(
                    dest,
                    buf1,
                    plan.out_w,
                    shape.w,
                    plan.out_h,
                    plan.out_c,
                    plan.crop_w,
                    plan.crop_x,
                    plan.flip,
                );
                apply_color_augmentation(
                    dest,
                    plan.out_h,
                    plan.out_w,
                    plan.out_c,
                    avg,
                    plan.brightness_shift,
                    plan.contrast_shift,
                    plan.saturation_shift,
                );
            }
            if let (Some(device_tensor), Some(stream)) = (item.device_tensor.clone(), &ctx.stream) {
                let result = {
                    let host_slice = item.host_tensor.as_ref().unwrap().as_slice();
                    stream.copy_from_host_async(&device_tensor, host_slice)
                };
                if let Err(e) = result {
                    log::error!("device upload failed for {:?}: {}", item.name, e);
                    item.fail(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Allocator;
    use crate::config::{Packing, ResizeMode};
    use crate::coordinator::BatchCoordinator;
    use crate::plan;
    use crate::rng::BatchRng;

    #[test]
    fn single_worker_drains_probe_then_fetch() {
        let coordinator = BatchCoordinator::with_fake_reader();
        let queue = coordinator.queue();
        let context = coordinator.context_handle();
        let reader_factory = coordinator.reader_factory();

        queue.register("a.jpg");
        queue.register("b.jpg");

        let pool = WorkerPool::new(2, queue.clone(), context, reader_factory);

        queue.sync();
        queue.with_items(|items| {
            for item in items.iter().flatten() {
                assert!(item.input_shape.is_some());
            }
        });

        queue.begin_phase(|item| {
            item.state = ItemState::Fetch;
            let batch_rng = BatchRng::new(Some(1));
            let mut rng = batch_rng.item_rng(item.index);
            let cfg = crate::config::Config::new();
            item.plan = Some(plan::derive(&cfg, item.input_shape.unwrap(), &mut rng));
            item.host_tensor = Some(crate::alloc::DefaultAllocator.alloc_host(
                (item.plan.unwrap().out_h * item.plan.unwrap().out_w * item.plan.unwrap().out_c)
                    as usize,
            ));
        });
        queue.sync();
        queue.with_items(|items| {
            for item in items.iter().flatten() {
                assert!(item.host_tensor.is_some());
                assert!(!item.has_failed());
            }
        });

        queue.finalize();
        pool.join();
    }

    #[test]
    fn worker_records_missing_file_error_without_blocking_others() {
        use crate::reader::FakeReader;

        let reader = FakeReader::new().with_failure("missing.jpg");
        let coordinator = BatchCoordinator::new(
            Arc::new(reader),
            Arc::new(crate::alloc::DefaultAllocator),
            Arc::new(crate::device::NullDeviceStreamFactory),
        );
        let queue = coordinator.queue();
        let context = coordinator.context_handle();
        let reader_factory = coordinator.reader_factory();

        queue.register("a.jpg");
        queue.register("missing.jpg");
        let pool = WorkerPool::new(2, queue.clone(), context, reader_factory);
        queue.sync();

        queue.with_items(|items| {
            let a = items[0].as_ref().unwrap();
            let missing = items[1].as_ref().unwrap();
            assert!(!a.has_failed());
            assert!(missing.has_failed());
        });

        queue.finalize();
        pool.join();
        let _ = Packing::Individual;
        let _ = ResizeMode::None;
    }
}
