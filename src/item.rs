//
// imbatch - item.rs - per-item state machine and transform plan
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

use crate::alloc::HostBuffer;
use crate::device::DeviceBuffer;
use crate::error::Error;
use crate::reader::Shape;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ItemState {
    Probe,
    Fetch,
    Ready,
}

/// Precomputed per-item output dimensions, crop rectangle, flip bit, and
/// color-augmentation parameters, derived once by the coordinator between
/// the probe and fetch phases.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Plan {
    pub out_h: u32,
    pub out_w: u32,
    pub out_c: u32,
    pub crop_h: u32,
    pub crop_w: u32,
    pub crop_x: u32,
    pub crop_y: u32,
    pub flip: bool,
    pub brightness_shift: [f32; 3],
    pub contrast_shift: f32,
    pub saturation_shift: f32,
}

/// Metadata and buffers for one image within a batch. Ownership of an item
/// transfers to whichever worker is currently processing it; the queue's
/// `Vec<Option<Item>>` slot representation is what makes that transfer, not
/// a `borrowed` flag on the item itself.
///
/// `host_tensor`/`device_tensor` are populated only in individual packing;
/// in packed mode an item's pixels live at offset `index * out_h*out_w*3`
/// of the batch's shared pack tensor instead, and these stay `None`.
pub struct Item {
    pub name: PathBuf,
    pub index: usize,
    pub state: ItemState,
    pub input_shape: Option<Shape>,
    pub plan: Option<Plan>,
    pub host_tensor: Option<HostBuffer>,
    pub device_tensor: Option<DeviceBuffer>,
    pub error: Option<Error>,
}

impl Item {
    pub fn new(name: impl Into<PathBuf>, index: usize) -> Item {
        Item {
            name: name.into(),
            index,
            state: ItemState::Probe,
            input_shape: None,
            plan: None,
            host_tensor: None,
            device_tensor: None,
            error: None,
        }
    }

    /// Record an error, keeping the first one if called more than once. A
    /// non-success error makes subsequent stages skip the item (§3).
    pub fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn fail_keeps_first_error() {
        let mut item = Item::new("a.jpg", 0);
        item.fail(Error::read("a.jpg", "first"));
        item.fail(Error::read("a.jpg", "second"));
        match item.error {
            Some(Error::Read { ref message, .. }) => assert_eq!(message, "first"),
            _ => panic!("expected a Read error"),
        }
    }

    #[test]
    fn new_item_starts_in_probe_state() {
        let item = Item::new("a.jpg", 3);
        assert_eq!(item.state, ItemState::Probe);
        assert_eq!(item.index, 3);
        assert!(!item.has_failed());
    }
}
