//
// imbatch - queue.rs - the shared batch queue
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

use std::path::PathBuf;
use std::sync::{Condvar, Mutex};

use crate::item::{Item, ItemState};

struct QueueInner {
    slots: Vec<Option<Item>>,
    cursor: usize,
    returned_count: usize,
    quit: bool,
}

/// The shared item list, dispatch cursor, and completion counter (§4.D/E).
/// A slot is `None` exactly while a worker holds that item; this stands in
/// for a redundant `borrowed` flag on the item and makes `clear()`'s wait
/// condition "no slot is `None`", which is invariant 1 expressed
/// structurally.
pub struct BatchQueue {
    inner: Mutex<QueueInner>,
    work_available: Condvar,
    item_completed: Condvar,
}

impl Default for BatchQueue {
    fn default() -> BatchQueue {
        BatchQueue::new()
    }
}

impl BatchQueue {
    pub fn new() -> BatchQueue {
        BatchQueue {
            inner: Mutex::new(QueueInner {
                slots: Vec::new(),
                cursor: 0,
                returned_count: 0,
                quit: false,
            }),
            work_available: Condvar::new(),
            item_completed: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a new item in *probe* state; wakes waiting workers.
    pub fn register(&self, name: impl Into<PathBuf>) {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.slots.len();
        inner.slots.push(Some(Item::new(name, index)));
        drop(inner);
        self.work_available.notify_all();
    }

    /// Blocks until an item is available or the queue is shutting down.
    pub fn borrow_next(&self) -> Option<Item> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.cursor < inner.slots.len() {
                let idx = inner.cursor;
                inner.cursor += 1;
                let item = inner.slots[idx]
                    .take()
                    .expect("queue slot double-borrowed");
                return Some(item);
            }
            if inner.quit {
                return None;
            }
            inner = self.work_available.wait(inner).unwrap();
        }
    }

    /// Returns a borrowed item to its slot, marking it *ready*. If this was
    /// the last return of a fetch phase, `on_last_fetch` runs against the
    /// returning item before it is placed back (used to gate the
    /// packed-mode device upload and attach any copy error, §4.D).
    pub fn return_item<F>(&self, mut item: Item, on_last_fetch: F)
    where
        F: FnOnce(&mut Item),
    {
        let mut inner = self.inner.lock().unwrap();
        let was_fetch = item.state == ItemState::Fetch;
        item.state = ItemState::Ready;
        let idx = item.index;
        inner.slots[idx] = Some(item);
        inner.returned_count += 1;
        let is_last = inner.returned_count == inner.slots.len();
        if is_last && was_fetch {
            on_last_fetch(inner.slots[idx].as_mut().unwrap());
        }
        drop(inner);
        self.item_completed.notify_all();
    }

    /// Blocks until every item has returned this phase.
    pub fn sync(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.returned_count < inner.slots.len() {
            inner = self.item_completed.wait(inner).unwrap();
        }
    }

    /// Mutates every item in place (used by the coordinator between phases,
    /// when no worker owns any item) then restarts the dispatch cursor and
    /// wakes every waiter, per "work_available broadcast ... after a phase
    /// promotion" (§4.D signals).
    pub fn begin_phase<F>(&self, mut mutate: F)
    where
        F: FnMut(&mut Item),
    {
        let mut inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter_mut() {
            if let Some(item) = slot.as_mut() {
                mutate(item);
            }
        }
        inner.cursor = 0;
        inner.returned_count = 0;
        drop(inner);
        self.work_available.notify_all();
    }

    /// Read-only access to the current items, for the coordinator and the
    /// dispatcher between phases.
    pub fn with_items<R>(&self, f: impl FnOnce(&[Option<Item>]) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        f(&inner.slots)
    }

    /// Mutable access to the current items without draining them, for
    /// `relinquish`: extracting tensor ownership out of ready items while
    /// leaving them registered for reuse detection on the next call.
    pub fn with_items_mut<R>(&self, f: impl FnOnce(&mut [Option<Item>]) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.slots)
    }

    /// Stops further handouts, waits for every borrowed item to come back,
    /// then drains and returns all items, resetting counters.
    pub fn clear(&self) -> Vec<Item> {
        let mut inner = self.inner.lock().unwrap();
        inner.cursor = inner.slots.len();
        while inner.slots.iter().any(Option::is_none) {
            inner = self.item_completed.wait(inner).unwrap();
        }
        let items: Vec<Item> = inner.slots.drain(..).map(|s| s.unwrap()).collect();
        inner.cursor = 0;
        inner.returned_count = 0;
        items
    }

    /// `clear()` then sets `quit` and wakes every waiter so workers can exit.
    pub fn finalize(&self) -> Vec<Item> {
        let items = self.clear();
        let mut inner = self.inner.lock().unwrap();
        inner.quit = true;
        drop(inner);
        self.work_available.notify_all();
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn register_then_borrow_then_return_round_trips() {
        let queue = BatchQueue::new();
        queue.register("a.jpg");
        queue.register("b.jpg");
        let a = queue.borrow_next().unwrap();
        assert_eq!(a.index, 0);
        queue.return_item(a, |_| {});
        let b = queue.borrow_next().unwrap();
        queue.return_item(b, |_| {});
        queue.sync();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn last_fetch_return_runs_hook_exactly_once() {
        let queue = BatchQueue::new();
        queue.register("a.jpg");
        queue.register("b.jpg");
        queue.begin_phase(|item| item.state = ItemState::Fetch);

        let hits = Arc::new(Mutex::new(0));
        let a = queue.borrow_next().unwrap();
        let b = queue.borrow_next().unwrap();
        let hits_a = hits.clone();
        queue.return_item(a, move |_| *hits_a.lock().unwrap() += 1);
        let hits_b = hits.clone();
        queue.return_item(b, move |_| *hits_b.lock().unwrap() += 1);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn clear_waits_for_borrowed_items() {
        let queue = Arc::new(BatchQueue::new());
        queue.register("a.jpg");
        let item = queue.borrow_next().unwrap();

        let clearer = {
            let queue = queue.clone();
            thread::spawn(move || queue.clear())
        };

        thread::sleep(std::time::Duration::from_millis(20));
        queue.return_item(item, |_| {});
        let items = clearer.join().unwrap();
        assert_eq!(items.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn finalize_wakes_blocked_workers_with_none() {
        let queue = Arc::new(BatchQueue::new());
        let worker = {
            let queue = queue.clone();
            thread::spawn(move || queue.borrow_next())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.finalize();
        assert!(worker.join().unwrap().is_none());
    }
}
