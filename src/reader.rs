//
// imbatch - reader.rs - the external image-decode collaborator
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

use std::path::Path;

use crate::error::{Error, Result};

/// Shape of a decoded image: height, width, channel count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shape {
    pub h: u32,
    pub w: u32,
    pub c: u32,
}

/// JPEG/PNG decoding is explicitly out of scope for the core pipeline (§1);
/// this trait is the seam an embedder plugs a real decoder into. Each worker
/// owns its own `ImageReader` instance (§4.G) - implementations need not be
/// `Sync`, only `Send`.
pub trait ImageReader: Send {
    /// Read just enough of the file to report its shape.
    fn probe_shape(&mut self, path: &Path) -> Result<Shape>;

    /// Decode the full image into planar float32 layout, channel-major:
    /// `out[c * h * w + y * w + x]`. `out` is a scratch buffer owned by the
    /// caller (the worker's buffer pool); `decode_pixels` must resize it to
    /// exactly `h * w * c` elements before returning.
    fn decode_pixels(&mut self, path: &Path, out: &mut Vec<f32>) -> Result<Shape>;
}

/// Constructs a worker's private reader. Kept as a trait object factory so a
/// batch can be configured with a reader kind once and have each worker
/// build its own instance, matching "not shared" in §4.G.
pub trait ImageReaderFactory: Send + Sync {
    fn build(&self) -> Box<dyn ImageReader>;
}

/// A fake reader for tests and for exercising the pipeline without real
/// image files: "decodes" a procedurally generated gradient image whose
/// dimensions are derived from the path, except for paths registered via
/// `fail`, which always error (used to model S3's MISSING file).
#[derive(Clone, Default)]
pub struct FakeReader {
    shapes: std::collections::HashMap<String, Shape>,
    failures: std::collections::HashSet<String>,
}

impl FakeReader {
    pub fn new() -> FakeReader {
        FakeReader::default()
    }

    pub fn with_shape(mut self, name: impl Into<String>, shape: Shape) -> FakeReader {
        self.shapes.insert(name.into(), shape);
        self
    }

    pub fn with_failure(mut self, name: impl Into<String>) -> FakeReader {
        self.failures.insert(name.into());
        self
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn shape_for(&self, path: &Path) -> Shape {
        let key = Self::key(path);
        self.shapes.get(&key).copied().unwrap_or(Shape {
            h: 48,
            w: 64,
            c: 3,
        })
    }
}

impl ImageReader for FakeReader {
    fn probe_shape(&mut self, path: &Path) -> Result<Shape> {
        let key = Self::key(path);
        if self.failures.contains(&key) {
            return Err(Error::read(path, "no such file or directory"));
        }
        Ok(self.shape_for(path))
    }

    fn decode_pixels(&mut self, path: &Path, out: &mut Vec<f32>) -> Result<Shape> {
        let key = Self::key(path);
        if self.failures.contains(&key) {
            return Err(Error::read(path, "no such file or directory"));
        }
        let shape = self.shape_for(path);
        let (h, w, c) = (shape.h as usize, shape.w as usize, shape.c as usize);
        out.clear();
        out.resize(h * w * c, 0.0);
        for ch in 0..c {
            for y in 0..h {
                for x in 0..w {
                    let v = ((x + y + ch) % 256) as f32 / 255.0;
                    out[ch * h * w + y * w + x] = v;
                }
            }
        }
        Ok(shape)
    }
}

impl ImageReaderFactory for FakeReader {
    fn build(&self) -> Box<dyn ImageReader> {
        Box::new(self.clone())
    }
}

#[cfg(feature = "image-io")]
pub mod fs {
    use super::*;
    use image::GenericImageView;

    /// Reference `ImageReader` backed by the `image` crate, for real files
    /// on disk. Reads the whole file twice on a probe-then-fetch sequence
    /// (no partial-header shortcut); that tradeoff is acceptable here since
    /// decoding is explicitly the caller's concern, not this crate's.
    #[derive(Default)]
    pub struct FsImageReader;

    impl ImageReader for FsImageReader {
        fn probe_shape(&mut self, path: &Path) -> Result<Shape> {
            let img = image::open(path).map_err(|e| Error::read(path, e.to_string()))?;
            let (w, h) = img.dimensions();
            let c = img.color().channel_count() as u32;
            Ok(Shape { h, w, c: c.min(3) })
        }

        fn decode_pixels(&mut self, path: &Path, out: &mut Vec<f32>) -> Result<Shape> {
            let img = image::open(path).map_err(|e| Error::read(path, e.to_string()))?;
            let c = (img.color().channel_count() as u32).min(3);
            let (hu, wu);
            if c == 1 {
                let gray = img.to_luma8();
                let (w, h) = gray.dimensions();
                hu = h as usize;
                wu = w as usize;
                out.clear();
                out.resize(hu * wu, 0.0);
                for (x, y, pixel) in gray.enumerate_pixels() {
                    out[y as usize * wu + x as usize] = pixel[0] as f32 / 255.0;
                }
                Ok(Shape { h, w, c: 1 })
            } else {
                let rgb = img.to_rgb8();
                let (w, h) = rgb.dimensions();
                hu = h as usize;
                wu = w as usize;
                out.clear();
                out.resize(hu * wu * 3, 0.0);
                for (x, y, pixel) in rgb.enumerate_pixels() {
                    let (x, y) = (x as usize, y as usize);
                    for ch in 0..3 {
                        out[ch * hu * wu + y * wu + x] = pixel[ch] as f32 / 255.0;
                    }
                }
                Ok(Shape { h, w, c: 3 })
            }
        }
    }

    #[derive(Default)]
    pub struct FsImageReaderFactory;

    impl ImageReaderFactory for FsImageReaderFactory {
        fn build(&self) -> Box<dyn ImageReader> {
            Box::new(FsImageReader)
        }
    }
}
