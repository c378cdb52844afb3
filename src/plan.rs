//
// imbatch - plan.rs - per-item transform plan derivation
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

use crate::config::{Config, CropLocation, Packing, ResizeMode};
use crate::item::Plan;
use crate::reader::Shape;
use crate::rng::ItemRng;

/// Computed under no lock, touching only the owning item's RNG stream
/// (§4.F "Transform plan derivation").
pub fn derive(cfg: &Config, input: Shape, rng: &mut ItemRng) -> Plan {
    let (out_h, out_w) = output_dims(cfg.resize(), input);

    let (amin, amax) = cfg.crop_anisotropy();
    let anisotropy = if amin == 0.0 && amax == 0.0 {
        (out_w as f32 / out_h as f32) / (input.w as f32 / input.h as f32)
    } else {
        rng.uniform(amin, amax)
    };
    let mut crop_w = out_w as f32 * anisotropy;
    let mut crop_h = out_h as f32 / anisotropy;

    let scale = (input.w as f32 / crop_w).min(input.h as f32 / crop_h);
    let (smin, smax) = cfg.crop_size();
    let size = rng.uniform(smin, smax);
    crop_w = (crop_w * scale * size).round().clamp(1.0, input.w as f32);
    crop_h = (crop_h * scale * size).round().clamp(1.0, input.h as f32);
    let crop_w = crop_w as u32;
    let crop_h = crop_h as u32;

    let dx = input.w - crop_w;
    let dy = input.h - crop_h;
    let (crop_x, crop_y) = match cfg.crop_location() {
        CropLocation::Center => ((dx + 1) / 2, (dy + 1) / 2),
        CropLocation::Random => (rng.uniform_int(0, dx), rng.uniform_int(0, dy)),
    };

    let flip = cfg.flip() && rng.bit();

    let saturation_shift = 1.0 + cfg.saturation_dev() * rng.uniform(-1.0, 1.0);
    let contrast_shift = 1.0 + cfg.contrast_dev() * rng.uniform(-1.0, 1.0);

    let brightness = cfg.brightness();
    let mut brightness_shift = [0.0f32; 3];
    for (i, shift) in brightness_shift.iter_mut().enumerate() {
        let w_i = rng.standard_normal();
        let row_sum: f32 = (0..3).map(|j| brightness.get(i, j)).sum();
        *shift = row_sum * w_i;
    }

    let out_c = if cfg.packing() == Packing::Individual {
        input.c
    } else {
        3
    };

    Plan {
        out_h,
        out_w,
        out_c,
        crop_h,
        crop_w,
        crop_x,
        crop_y,
        flip,
        brightness_shift,
        contrast_shift,
        saturation_shift,
    }
}

fn output_dims(resize: ResizeMode, input: Shape) -> (u32, u32) {
    match resize {
        ResizeMode::None => (input.h, input.w),
        ResizeMode::Fixed(h, w) => (h, w),
        ResizeMode::ShortestSide(s) => {
            let scale = (s as f32 / input.h as f32).max(s as f32 / input.w as f32);
            let out_h = (input.h as f32 * scale).round().max(1.0) as u32;
            let out_w = (input.w as f32 * scale).round().max(1.0) as u32;
            (out_h, out_w)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rng::BatchRng;

    #[test]
    fn shortest_side_matches_worked_example() {
        let input = Shape { h: 64, w: 48, c: 3 };
        let (h, w) = output_dims(ResizeMode::ShortestSide(32), input);
        assert_eq!((h, w), (43, 32));
    }

    #[test]
    fn fixed_resize_ignores_input_shape() {
        let input = Shape { h: 64, w: 48, c: 3 };
        assert_eq!(output_dims(ResizeMode::Fixed(16, 16), input), (16, 16));
    }

    #[test]
    fn crop_rectangle_stays_inside_input() {
        let mut cfg = Config::new();
        cfg.set_resize(ResizeMode::Fixed(16, 16)).unwrap();
        cfg.set_crop_size(0.5, 1.0).unwrap();
        cfg.set_crop_anisotropy(0.5, 2.0).unwrap();
        cfg.set_crop_location(CropLocation::Random).unwrap();
        let batch_rng = BatchRng::new(Some(7));
        for idx in 0..20 {
            let input = Shape { h: 64, w: 48, c: 3 };
            let mut rng = batch_rng.item_rng(idx);
            let plan = derive(&cfg, input, &mut rng);
            assert!(plan.crop_x + plan.crop_w <= input.w);
            assert!(plan.crop_y + plan.crop_h <= input.h);
        }
    }

    #[test]
    fn center_crop_is_deterministic() {
        let mut cfg = Config::new();
        cfg.set_resize(ResizeMode::Fixed(16, 16)).unwrap();
        cfg.set_crop_size(0.5, 0.5).unwrap();
        let batch_rng = BatchRng::new(Some(1));
        let input = Shape { h: 64, w: 48, c: 3 };
        let mut r1 = batch_rng.item_rng(0);
        let mut r2 = batch_rng.item_rng(0);
        let p1 = derive(&cfg, input, &mut r1);
        let p2 = derive(&cfg, input, &mut r2);
        assert_eq!(p1.crop_x, p2.crop_x);
        assert_eq!(p1.crop_y, p2.crop_y);
    }
}
