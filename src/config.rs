//
// imbatch - config.rs - per-batch configuration record
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

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ResizeMode {
    None,
    ShortestSide(u32),
    Fixed(u32, u32),
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Packing {
    #[default]
    Individual,
    Packed,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CropLocation {
    Center,
    Random,
}

/// Column-major 3x3 brightness deviation matrix, `B[i + 3*j]`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BrightnessMatrix(pub [f32; 9]);

impl BrightnessMatrix {
    pub fn zero() -> BrightnessMatrix {
        BrightnessMatrix([0.0; 9])
    }

    pub fn scalar(v: f32) -> BrightnessMatrix {
        let mut m = [0.0; 9];
        m[0] = v;
        m[4] = v;
        m[8] = v;
        BrightnessMatrix(m)
    }

    pub fn diagonal(v: [f32; 3]) -> BrightnessMatrix {
        let mut m = [0.0; 9];
        m[0] = v[0];
        m[4] = v[1];
        m[8] = v[2];
        BrightnessMatrix(m)
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.0[i + 3 * j]
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    num_threads: usize,
    prefetch: bool,
    resize: ResizeMode,
    packing: Packing,
    gpu: bool,
    subtract_average: [f32; 3],
    brightness: BrightnessMatrix,
    contrast_dev: f32,
    saturation_dev: f32,
    crop_anisotropy: (f32, f32),
    crop_size: (f32, f32),
    crop_location: CropLocation,
    flip: bool,
    verbose: u8,
    seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

impl Config {
    /// Reset to defaults: averages 0, no color deviation, crop=full-image,
    /// center crop, no flip, no resize, individual packing, CPU.
    pub fn new() -> Config {
        Config {
            num_threads: 1,
            prefetch: false,
            resize: ResizeMode::None,
            packing: Packing::Individual,
            gpu: false,
            subtract_average: [0.0; 3],
            brightness: BrightnessMatrix::zero(),
            contrast_dev: 0.0,
            saturation_dev: 0.0,
            crop_anisotropy: (0.0, 0.0),
            crop_size: (1.0, 1.0),
            crop_location: CropLocation::Center,
            flip: false,
            verbose: 0,
            seed: None,
        }
    }

    pub fn set_num_threads(&mut self, n: usize) -> Result<()> {
        // Coerced rather than rejected: testable property 5.
        if n < 1 {
            log::warn!("num_threads {} coerced to 1", n);
            self.num_threads = 1;
        } else {
            self.num_threads = n;
        }
        Ok(())
    }

    pub fn set_prefetch(&mut self, prefetch: bool) -> Result<()> {
        self.prefetch = prefetch;
        Ok(())
    }

    pub fn set_resize(&mut self, resize: ResizeMode) -> Result<()> {
        if let ResizeMode::ShortestSide(s) = resize {
            if s == 0 {
                return Err(Error::config("shortest-side resize must be > 0"));
            }
        }
        if let ResizeMode::Fixed(h, w) = resize {
            if h == 0 || w == 0 {
                return Err(Error::config("fixed resize dimensions must be > 0"));
            }
        }
        self.resize = resize;
        Ok(())
    }

    pub fn set_packing(&mut self, packing: Packing) -> Result<()> {
        self.packing = packing;
        Ok(())
    }

    pub fn set_gpu(&mut self, gpu: bool) -> Result<()> {
        self.gpu = gpu;
        Ok(())
    }

    pub fn set_subtract_average(&mut self, avg: [f32; 3]) -> Result<()> {
        self.subtract_average = avg;
        Ok(())
    }

    pub fn set_brightness(&mut self, brightness: BrightnessMatrix) -> Result<()> {
        self.brightness = brightness;
        Ok(())
    }

    pub fn set_contrast(&mut self, dev: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&dev) {
            return Err(Error::config("contrast deviation must be within [0, 1]"));
        }
        self.contrast_dev = dev;
        Ok(())
    }

    pub fn set_saturation(&mut self, dev: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&dev) {
            return Err(Error::config("saturation deviation must be within [0, 1]"));
        }
        self.saturation_dev = dev;
        Ok(())
    }

    pub fn set_crop_anisotropy(&mut self, min: f32, max: f32) -> Result<()> {
        if min < 0.0 || min > max {
            return Err(Error::config(
                "crop anisotropy range must satisfy 0 <= min <= max",
            ));
        }
        self.crop_anisotropy = (min, max);
        Ok(())
    }

    pub fn set_crop_size(&mut self, min: f32, max: f32) -> Result<()> {
        if min < 0.0 || min > max || max > 1.0 {
            return Err(Error::config(
                "crop size range must satisfy 0 <= min <= max <= 1",
            ));
        }
        self.crop_size = (min, max);
        Ok(())
    }

    pub fn set_crop_location(&mut self, location: CropLocation) -> Result<()> {
        self.crop_location = location;
        Ok(())
    }

    pub fn set_flip(&mut self, flip: bool) -> Result<()> {
        self.flip = flip;
        Ok(())
    }

    pub fn set_verbose(&mut self, level: u8) -> Result<()> {
        self.verbose = level;
        Ok(())
    }

    pub fn set_seed(&mut self, seed: Option<u64>) -> Result<()> {
        self.seed = seed;
        Ok(())
    }

    /// Run before any worker is touched. Packed mode requires a fixed-size
    /// resize (§3 constraint); everything else is already rejected at the
    /// individual setter.
    pub fn validate(&self) -> Result<()> {
        if self.packing == Packing::Packed && !matches!(self.resize, ResizeMode::Fixed(_, _)) {
            return Err(Error::config(
                "packed mode requires a fixed-size resize (pack needs a common H,W)",
            ));
        }
        Ok(())
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn prefetch(&self) -> bool {
        self.prefetch
    }

    pub fn resize(&self) -> ResizeMode {
        self.resize
    }

    pub fn packing(&self) -> Packing {
        self.packing
    }

    pub fn gpu(&self) -> bool {
        self.gpu
    }

    pub fn subtract_average(&self) -> [f32; 3] {
        self.subtract_average
    }

    pub fn brightness(&self) -> BrightnessMatrix {
        self.brightness
    }

    pub fn contrast_dev(&self) -> f32 {
        self.contrast_dev
    }

    pub fn saturation_dev(&self) -> f32 {
        self.saturation_dev
    }

    pub fn crop_anisotropy(&self) -> (f32, f32) {
        self.crop_anisotropy
    }

    pub fn crop_size(&self) -> (f32, f32) {
        self.crop_size
    }

    pub fn crop_location(&self) -> CropLocation {
        self.crop_location
    }

    pub fn flip(&self) -> bool {
        self.flip
    }

    pub fn verbose(&self) -> u8 {
        self.verbose
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_requires_fixed_resize() {
        let mut cfg = Config::new();
        cfg.set_packing(Packing::Packed).unwrap();
        cfg.set_resize(ResizeMode::ShortestSide(32)).unwrap();
        assert!(cfg.validate().is_err());

        cfg.set_resize(ResizeMode::Fixed(16, 16)).unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_threads_coerced_to_one() {
        let mut cfg = Config::new();
        cfg.set_num_threads(0).unwrap();
        assert_eq!(cfg.num_threads(), 1);
    }

    #[test]
    fn out_of_range_scalars_rejected() {
        let mut cfg = Config::new();
        assert!(cfg.set_contrast(1.5).is_err());
        assert!(cfg.set_saturation(-0.1).is_err());
        assert!(cfg.set_crop_anisotropy(2.0, 1.0).is_err());
        assert!(cfg.set_crop_size(0.0, 1.5).is_err());
    }
}
