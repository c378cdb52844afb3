//
// imbatch - kernels.rs - resize / crop / color numeric pipeline
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

// All buffers here are planar float32: channel-major, `buf[c*h*w + y*w + x]`.

//
// Using a runtime channel count in the inner loop slows things down;
// specialize for the two channel counts this crate ever produces (1 and 3),
// the same way an adjacent codec specializes its hot loop by bytes-per-pixel.
//
macro_rules! channel_specialize {
    ( $kernel:ident, $c:expr, $( $arg:expr ),* ) => {
        match $c {
            1 => $kernel::<1>($( $arg ),*),
            3 => $kernel::<3>($( $arg ),*),
            other => panic!("unsupported channel count {}, expected 1 or 3", other),
        }
    }
}

#[inline]
fn lerp_coords(dst_len: u32, crop_len: u32, crop_off: u32, dst_i: u32) -> (usize, usize, f32) {
    if crop_len <= 1 || dst_len <= 1 {
        return (crop_off as usize, crop_off as usize, 0.0);
    }
    let scale = crop_len as f32 / dst_len as f32;
    let src = crop_off as f32 + (dst_i as f32 + 0.5) * scale - 0.5;
    let lo_bound = crop_off as f32;
    let hi_bound = (crop_off + crop_len - 1) as f32;
    let src = src.max(lo_bound).min(hi_bound);
    let i0 = src.floor();
    let frac = src - i0;
    let i0 = i0 as u32;
    let i1 = (i0 + 1).min(crop_off + crop_len - 1);
    (i0 as usize, i1 as usize, frac)
}

/// Resamples the vertical slab `[crop_y, crop_y+crop_h)` of `src` (shape
/// `src_h x w x src_c`) into `dst_h` rows (shape `dst_h x w x dst_c`),
/// across all `w` columns. When `src_c == 1` and `dst_c == 3`, the single
/// input channel is read for all three output planes, performing the
/// grayscale broadcast for packed output at this stage rather than later in
/// color augmentation (§4.C "K=3, input_c=1" collapses to the ordinary
/// formula once every plane already holds the same values).
pub fn resize_vertical(
    dst: &mut [f32],
    src: &[f32],
    dst_h: u32,
    src_h: u32,
    w: u32,
    src_c: u32,
    dst_c: u32,
    crop_h: u32,
    crop_y: u32,
) {
    assert!(dst_c == src_c || (src_c == 1 && dst_c == 3));
    channel_specialize!(
        resize_vertical_impl,
        dst_c,
        dst,
        src,
        dst_h,
        src_h,
        w,
        src_c,
        crop_h,
        crop_y
    )
}

fn resize_vertical_impl<const DST_C: usize>(
    dst: &mut [f32],
    src: &[f32],
    dst_h: u32,
    src_h: u32,
    w: u32,
    src_c: u32,
    crop_h: u32,
    crop_y: u32,
) {
    let w = w as usize;
    let dst_hu = dst_h as usize;
    let src_hu = src_h as usize;
    let broadcast = src_c == 1 && DST_C == 3;

    for oy in 0..dst_h {
        let (y0, y1, frac) = lerp_coords(dst_h, crop_h, crop_y, oy);
        for oc in 0..DST_C {
            let ic = if broadcast { 0 } else { oc };
            let src_plane = &src[ic * src_hu * w..(ic + 1) * src_hu * w];
            let dst_plane = &mut dst[oc * dst_hu * w..(oc + 1) * dst_hu * w];
            let row0 = &src_plane[y0 * w..(y0 + 1) * w];
            let row1 = &src_plane[y1 * w..(y1 + 1) * w];
            let out_row = &mut dst_plane[(oy as usize) * w..(oy as usize + 1) * w];
            for x in 0..w {
                out_row[x] = row0[x] + (row1[x] - row0[x]) * frac;
            }
        }
    }
}

/// Resamples the horizontal slab `[crop_x, crop_x+crop_w)` of `src` (shape
/// `h x src_w x c`) into `dst_w` columns (shape `h x dst_w x c`), optionally
/// mirroring the output column order for a horizontal flip.
pub fn resize_horizontal(
    dst: &mut [f32],
    src: &[f32],
    dst_w: u32,
    src_w: u32,
    h: u32,
    c: u32,
    crop_w: u32,
    crop_x: u32,
    flip: bool,
) {
    channel_specialize!(
        resize_horizontal_impl,
        c,
        dst,
        src,
        dst_w,
        src_w,
        h,
        crop_w,
        crop_x,
        flip
    )
}

fn resize_horizontal_impl<const C: usize>(
    dst: &mut [f32],
    src: &[f32],
    dst_w: u32,
    src_w: u32,
    h: u32,
    crop_w: u32,
    crop_x: u32,
    flip: bool,
) {
    let h = h as usize;
    let src_wu = src_w as usize;
    let dst_wu = dst_w as usize;

    for ox in 0..dst_w {
        let (x0, x1, frac) = lerp_coords(dst_w, crop_w, crop_x, ox);
        let out_x = if flip { dst_w - 1 - ox } else { ox } as usize;
        for ch in 0..C {
            let src_plane = &src[ch * h * src_wu..(ch + 1) * h * src_wu];
            let dst_plane = &mut dst[ch * h * dst_wu..(ch + 1) * h * dst_wu];
            for y in 0..h {
                let a = src_plane[y * src_wu + x0];
                let b = src_plane[y * src_wu + x1];
                dst_plane[y * dst_wu + out_x] = a + (b - a) * frac;
            }
        }
    }
}

/// Color augmentation applied in place to an `(out_c, out_h, out_w)` planar
/// buffer (§4.C). Since `resize_vertical` already broadcasts a grayscale
/// input into all three planes when packing to 3 channels, the "input_c=1"
/// and "input_c=3" formulas in the spec collapse into one code path here:
/// by the time augmentation runs, every output plane already holds the
/// values the per-channel formula expects to read.
pub fn apply_color_augmentation(
    buf: &mut [f32],
    out_h: u32,
    out_w: u32,
    out_c: u32,
    avg: [f32; 3],
    brightness_shift: [f32; 3],
    contrast_shift: f32,
    saturation_shift: f32,
) {
    let n = out_h as usize * out_w as usize;
    let k = out_c as usize;
    let c = contrast_shift;
    let s = saturation_shift;

    let mut dv = [0f32; 3];
    for (ch, dv_ch) in dv.iter_mut().enumerate().take(k) {
        *dv_ch = (1.0 - 2.0 * c) * (avg[ch] + brightness_shift[ch]);
        if (c - 1.0).abs() > f32::EPSILON {
            let plane = &buf[ch * n..(ch + 1) * n];
            let mean: f32 = plane.iter().sum::<f32>() / n as f32;
            *dv_ch -= (1.0 - c) * mean;
        }
    }

    if k == 3 {
        let a = c * s;
        let b = c * (1.0 - s) / 3.0;
        for i in 0..n {
            let v0 = buf[i] + dv[0];
            let v1 = buf[n + i] + dv[1];
            let v2 = buf[2 * n + i] + dv[2];
            let mu = v0 + v1 + v2;
            buf[i] = a * v0 + b * mu;
            buf[n + i] = a * v1 + b * mu;
            buf[2 * n + i] = a * v2 + b * mu;
        }
    } else {
        for v in buf.iter_mut().take(n) {
            *v = c * (*v + dv[0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_vertical_identity_when_same_size() {
        // 1x1 channel, 4 rows -> 4 rows: should reproduce source exactly
        // at the sample points (scale == 1).
        let src = vec![0.0, 1.0, 2.0, 3.0];
        let mut dst = vec![0.0; 4];
        resize_vertical(&mut dst, &src, 4, 4, 1, 1, 1, 4, 0);
        assert_eq!(dst, src);
    }

    #[test]
    fn resize_vertical_broadcasts_grayscale_to_three_planes() {
        let src = vec![0.5, 0.5]; // 1 channel, 2 rows, 1 col
        let mut dst = vec![0.0; 3 * 2];
        resize_vertical(&mut dst, &src, 2, 2, 1, 1, 3, 2, 0);
        assert_eq!(dst, vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn resize_horizontal_flip_mirrors_output() {
        let src = vec![0.0, 1.0, 2.0, 3.0]; // 1 channel, 1 row, 4 cols
        let mut dst = vec![0.0; 4];
        resize_horizontal(&mut dst, &src, 4, 4, 1, 1, 4, 0, true);
        let mut expected = src.clone();
        expected.reverse();
        assert_eq!(dst, expected);
    }

    #[test]
    fn clamp_to_edge_on_crop_boundary() {
        // crop smaller than source; resampled output should stay within
        // [crop_y, crop_y+crop_h) sample range, never reading outside it.
        let src = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        let mut dst = vec![0.0; 3];
        resize_vertical(&mut dst, &src, 3, 5, 1, 1, 1, 2, 1);
        for v in &dst {
            assert!(*v >= 20.0 && *v <= 30.0);
        }
    }

    #[test]
    fn grayscale_and_broadcast_augmentation_formulas_agree() {
        // Once broadcast has happened at resize time, augmenting a 3-plane
        // buffer whose planes are all equal must keep them all equal.
        let mut buf = vec![0.2; 3 * 4];
        apply_color_augmentation(&mut buf, 2, 2, 3, [0.0; 3], [0.0; 3], 1.0, 0.5);
        let n = 4;
        assert_eq!(&buf[0..n], &buf[n..2 * n]);
        assert_eq!(&buf[n..2 * n], &buf[2 * n..3 * n]);
    }

    #[test]
    fn single_channel_augmentation_matches_formula() {
        let mut buf = vec![0.5];
        apply_color_augmentation(&mut buf, 1, 1, 1, [0.1, 0.0, 0.0], [0.0; 3], 0.5, 1.0);
        // dv[0] = (1-2*0.5)*(0.1+0) = 0, then minus (1-0.5)*mean(0.5) = 0.25
        // dv[0] = -0.25; out = 0.5*(0.5-0.25) = 0.125
        assert!((buf[0] - 0.125).abs() < 1e-6);
    }
}
