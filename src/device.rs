//
// imbatch - device.rs - the external GPU stream collaborator
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

use crate::error::{Error, Result};

/// A device-resident buffer. The default implementation backs it with a
/// plain `Vec<f32>` behind a mutex, since no real accelerator is available
/// here; a real backend would instead hold a device pointer and rely on the
/// stream's ordering to make the mutex unnecessary.
#[derive(Clone)]
pub struct DeviceBuffer {
    data: Arc<Mutex<Vec<f32>>>,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the current contents out. Exists for tests and for a caller that
    /// wants to read device memory back without a full ownership transfer.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.lock().unwrap().clone()
    }

    /// Transfer ownership out to the caller, per §3's "relinquish" handle.
    pub fn relinquish(self) -> Vec<f32> {
        match Arc::try_unwrap(self.data) {
            Ok(mutex) => mutex.into_inner().unwrap(),
            Err(shared) => shared.lock().unwrap().clone(),
        }
    }
}

/// An asynchronous device-side command queue (§GLOSSARY). All per-batch
/// device copies share one instance, giving them implicit ordering (§5).
pub trait DeviceStream: Send + Sync {
    fn alloc(&self, len: usize) -> DeviceBuffer;
    fn copy_from_host_async(&self, dst: &DeviceBuffer, src: &[f32]) -> Result<()>;
    fn synchronize(&self) -> Result<()>;
}

/// Builds a batch's stream lazily, "with non-blocking flag" (§4.F).
pub trait DeviceStreamFactory: Send + Sync {
    fn create(&self) -> Box<dyn DeviceStream>;
}

/// Host-simulated stream: copies happen synchronously under the lock, so
/// `synchronize` is a no-op. Stands in for the real GPU stream primitives,
/// which are an external collaborator per §1.
#[derive(Default)]
pub struct NullDeviceStream;

impl DeviceStream for NullDeviceStream {
    fn alloc(&self, len: usize) -> DeviceBuffer {
        DeviceBuffer {
            data: Arc::new(Mutex::new(vec![0.0; len])),
        }
    }

    fn copy_from_host_async(&self, dst: &DeviceBuffer, src: &[f32]) -> Result<()> {
        let mut guard = dst.data.lock().unwrap();
        if guard.len() != src.len() {
            return Err(Error::device(format!(
                "host->device copy size mismatch: dst={} src={}",
                guard.len(),
                src.len()
            )));
        }
        guard.copy_from_slice(src);
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NullDeviceStreamFactory;

impl DeviceStreamFactory for NullDeviceStreamFactory {
    fn create(&self) -> Box<dyn DeviceStream> {
        Box::new(NullDeviceStream)
    }
}
