//
// imbatch - buffer_pool.rs - per-worker scratch buffers
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

/// Two reusable scratch buffers owned by one worker's stack frame (§4.A).
/// `get` grows a buffer (discarding contents) when the requested length
/// exceeds current capacity; it never shrinks. The allocation pattern is
/// append-only within a phase, avoiding per-item allocator churn across
/// decode and the two resize passes.
#[derive(Default)]
pub struct BufferPool {
    buffers: [Vec<f32>; 2],
}

impl BufferPool {
    pub fn new() -> BufferPool {
        BufferPool::default()
    }

    /// Returns buffer `i` sized to exactly `n` elements. `Vec::resize` only
    /// reallocates when `n` exceeds current capacity, which is exactly the
    /// growth policy this pool needs.
    pub fn get(&mut self, i: usize, n: usize) -> &mut Vec<f32> {
        let buf = &mut self.buffers[i];
        buf.resize(n, 0.0);
        buf
    }

    /// Raw access to both buffers at once, for passing one as a read source
    /// while writing the other (decode -> vertical resize -> horizontal
    /// resize, each stage reading the previous buffer's current contents).
    pub fn split_mut(&mut self) -> (&mut Vec<f32>, &mut Vec<f32>) {
        let (a, b) = self.buffers.split_at_mut(1);
        (&mut a[0], &mut b[0])
    }
}
