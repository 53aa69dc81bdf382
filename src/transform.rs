//! Inverse image transforms.
//!
//! A stream may carry up to four invertible transforms (predictor,
//! cross-colour, subtract-green, colour-indexing), each parameterised
//! per tile. The decoder applies their inverses in reverse order over
//! row bands: the first stage reads the raw decoded rows, later stages
//! run in place on the scratch band.

use alloc::vec;
use alloc::vec::Vec;

pub(crate) const NUM_TRANSFORMS: usize = 4;

const ARGB_BLACK: u32 = 0xff00_0000;

/// `ceil(size / 2^sampling_bits)` — dimension of a subsampled tile grid.
pub(crate) fn subsample_size(size: usize, sampling_bits: u32) -> usize {
    (size + (1 << sampling_bits) - 1) >> sampling_bits
}

/// Per-channel addition mod 256.
#[inline]
pub(crate) fn add_pixels(a: u32, b: u32) -> u32 {
    let alpha_and_green = (a & 0xff00_ff00).wrapping_add(b & 0xff00_ff00);
    let red_and_blue = (a & 0x00ff_00ff).wrapping_add(b & 0x00ff_00ff);
    (alpha_and_green & 0xff00_ff00) | (red_and_blue & 0x00ff_00ff)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransformType {
    Predictor,
    CrossColor,
    SubtractGreen,
    ColorIndexing,
}

impl TransformType {
    /// Decode the 2-bit type field.
    pub(crate) fn from_bits(bits: u32) -> TransformType {
        match bits & 3 {
            0 => TransformType::Predictor,
            1 => TransformType::CrossColor,
            2 => TransformType::SubtractGreen,
            _ => TransformType::ColorIndexing,
        }
    }

    pub(crate) fn bit(self) -> u32 {
        1 << match self {
            TransformType::Predictor => 0,
            TransformType::CrossColor => 1,
            TransformType::SubtractGreen => 2,
            TransformType::ColorIndexing => 3,
        }
    }
}

/// One parsed transform: type tag, the logical dimensions at its stage
/// of the chain, the tile-size exponent, and the owned payload (mode
/// image, multiplier image, or expanded colour map).
#[derive(Clone, Debug)]
pub(crate) struct Transform {
    pub ty: TransformType,
    pub xsize: usize,
    pub ysize: usize,
    pub bits: u32,
    pub data: Vec<u32>,
}

// ── Colour map expansion ────────────────────────────────────────────

/// Undo the delta encoding of a palette (per-channel prefix sum mod
/// 256) and expand it to `1 << (8 >> bits)` entries, zero-padded, so
/// any stored index is in range.
pub(crate) fn expand_color_map(num_colors: usize, bits: u32, data: &[u32]) -> Vec<u32> {
    let final_num_colors = 1usize << (8 >> bits);
    let mut new_map = vec![0u32; final_num_colors];
    new_map[0] = data[0];
    for i in 1..num_colors {
        new_map[i] = add_pixels(data[i], new_map[i - 1]);
    }
    new_map
}

// ── Predictor transform ─────────────────────────────────────────────

fn clip_255(v: i32) -> u32 {
    v.clamp(0, 255) as u32
}

#[inline]
fn average2(a: u32, b: u32) -> u32 {
    (((a ^ b) & 0xfefe_fefe) >> 1).wrapping_add(a & b)
}

fn sub3(a: i32, b: i32, c: i32) -> i32 {
    (b - c).abs() - (a - c).abs()
}

fn select(a: u32, b: u32, c: u32) -> u32 {
    let pa_minus_pb = sub3((a >> 24) as i32, (b >> 24) as i32, (c >> 24) as i32)
        + sub3(((a >> 16) & 0xff) as i32, ((b >> 16) & 0xff) as i32, ((c >> 16) & 0xff) as i32)
        + sub3(((a >> 8) & 0xff) as i32, ((b >> 8) & 0xff) as i32, ((c >> 8) & 0xff) as i32)
        + sub3((a & 0xff) as i32, (b & 0xff) as i32, (c & 0xff) as i32);
    if pa_minus_pb <= 0 { a } else { b }
}

fn clamped_add_subtract_full(c0: u32, c1: u32, c2: u32) -> u32 {
    let component = |shift: u32| {
        clip_255(((c0 >> shift) & 0xff) as i32 + ((c1 >> shift) & 0xff) as i32
            - ((c2 >> shift) & 0xff) as i32)
    };
    (component(24) << 24) | (component(16) << 16) | (component(8) << 8) | component(0)
}

fn clamped_add_subtract_half(c0: u32, c1: u32, c2: u32) -> u32 {
    let ave = average2(c0, c1);
    let component = |shift: u32| {
        let a = ((ave >> shift) & 0xff) as i32;
        let b = ((c2 >> shift) & 0xff) as i32;
        clip_255(a + (a - b) / 2)
    };
    (component(24) << 24) | (component(16) << 16) | (component(8) << 8) | component(0)
}

/// Prediction for one pixel. `top` aliases into the flat scratch, so
/// `top[x + 1]` at the right edge reads the current row's first pixel,
/// matching the scan-order semantics of the format.
fn predict(mode: u32, left: u32, data: &[u32], top_idx: usize) -> u32 {
    match mode {
        1 => left,
        2 => data[top_idx],
        3 => data[top_idx + 1],
        4 => data[top_idx - 1],
        5 => average2(average2(left, data[top_idx + 1]), data[top_idx]),
        6 => average2(left, data[top_idx - 1]),
        7 => average2(left, data[top_idx]),
        8 => average2(data[top_idx - 1], data[top_idx]),
        9 => average2(data[top_idx], data[top_idx + 1]),
        10 => average2(average2(left, data[top_idx - 1]), average2(data[top_idx], data[top_idx + 1])),
        11 => select(data[top_idx], left, data[top_idx - 1]),
        12 => clamped_add_subtract_full(left, data[top_idx], data[top_idx - 1]),
        13 => clamped_add_subtract_half(left, data[top_idx], data[top_idx - 1]),
        // 0 and the two reserved modes predict opaque black.
        _ => ARGB_BLACK,
    }
}

/// Add predictions back onto residuals, in place over the scratch.
/// `band_base` is the index of the band's first pixel; the row before
/// it holds the previous band's bottom row for top prediction.
fn predictor_inverse(t: &Transform, y_start: usize, y_end: usize, data: &mut [u32], band_base: usize) {
    let width = t.xsize;
    let mut row_off = band_base;
    let mut y = y_start;

    if y == 0 {
        // Top-left pixel is predicted from opaque black, the rest of
        // the first row from the left neighbour.
        data[row_off] = add_pixels(data[row_off], ARGB_BLACK);
        for x in 1..width {
            data[row_off + x] = add_pixels(data[row_off + x], data[row_off + x - 1]);
        }
        row_off += width;
        y += 1;
    }

    let tiles_per_row = subsample_size(width, t.bits);
    while y < y_end {
        let mode_row = &t.data[(y >> t.bits) * tiles_per_row..][..tiles_per_row];
        // First pixel of each row is predicted from the top neighbour.
        data[row_off] = add_pixels(data[row_off], data[row_off - width]);
        for x in 1..width {
            let mode = (mode_row[x >> t.bits] >> 8) & 0xf;
            let left = data[row_off + x - 1];
            let pred = predict(mode, left, data, row_off + x - width);
            data[row_off + x] = add_pixels(data[row_off + x], pred);
        }
        row_off += width;
        y += 1;
    }
}

// ── Cross-colour transform ──────────────────────────────────────────

#[derive(Clone, Copy, Default)]
struct Multipliers {
    green_to_red: i8,
    green_to_blue: i8,
    red_to_blue: i8,
}

impl Multipliers {
    fn from_code(color_code: u32) -> Self {
        Multipliers {
            green_to_red: (color_code & 0xff) as i8,
            green_to_blue: ((color_code >> 8) & 0xff) as i8,
            red_to_blue: ((color_code >> 16) & 0xff) as i8,
        }
    }
}

/// Signed 3.5 fixed-point scaling of a channel value.
#[inline]
fn color_transform_delta(pred: i8, color: i8) -> i32 {
    (i32::from(pred) * i32::from(color)) >> 5
}

fn transform_color_inverse(m: &Multipliers, pixels: &mut [u32]) {
    for px in pixels {
        let argb = *px;
        let green = (argb >> 8) as i8;
        let mut new_red = ((argb >> 16) & 0xff) as i32;
        let mut new_blue = (argb & 0xff) as i32;
        new_red += color_transform_delta(m.green_to_red, green);
        new_red &= 0xff;
        new_blue += color_transform_delta(m.green_to_blue, green);
        new_blue += color_transform_delta(m.red_to_blue, new_red as i8);
        new_blue &= 0xff;
        *px = (argb & 0xff00_ff00) | ((new_red as u32) << 16) | new_blue as u32;
    }
}

fn color_space_inverse(t: &Transform, y_start: usize, y_end: usize, data: &mut [u32], band_base: usize) {
    let width = t.xsize;
    let tiles_per_row = subsample_size(width, t.bits);
    let tile_width = 1usize << t.bits;
    let mut row_off = band_base;
    for y in y_start..y_end {
        let tile_row = &t.data[(y >> t.bits) * tiles_per_row..][..tiles_per_row];
        let row = &mut data[row_off..row_off + width];
        for (tile_x, chunk) in row.chunks_mut(tile_width).enumerate() {
            let m = Multipliers::from_code(tile_row[tile_x]);
            transform_color_inverse(&m, chunk);
        }
        row_off += width;
    }
}

// ── Subtract-green transform ────────────────────────────────────────

pub(crate) fn add_green_to_blue_and_red(pixels: &mut [u32]) {
    for px in pixels {
        let argb = *px;
        let green = (argb >> 8) & 0xff;
        let mut red_blue = argb & 0x00ff_00ff;
        red_blue = red_blue.wrapping_add((green << 16) | green);
        red_blue &= 0x00ff_00ff;
        *px = (argb & 0xff00_ff00) | red_blue;
    }
}

// ── Colour-indexing transform ───────────────────────────────────────

/// Map packed palette indices (carried in the green channel of `src`)
/// to full pixels. `src` rows have the subsampled width when indices
/// are packed several to a byte.
fn color_index_inverse(t: &Transform, y_start: usize, y_end: usize, src: &[u32], dst: &mut [u32]) {
    let width = t.xsize;
    let bits_per_pixel = 8 >> t.bits;
    let mut s = 0usize;
    let mut d = 0usize;
    if bits_per_pixel < 8 {
        let count_mask = (1usize << t.bits) - 1;
        let bit_mask = (1u32 << bits_per_pixel) - 1;
        for _y in y_start..y_end {
            let mut packed = 0u32;
            for x in 0..width {
                if x & count_mask == 0 {
                    packed = (src[s] >> 8) & 0xff;
                    s += 1;
                }
                dst[d] = t.data[(packed & bit_mask) as usize];
                d += 1;
                packed >>= bits_per_pixel;
            }
        }
    } else {
        for _ in 0..(y_end - y_start) * width {
            dst[d] = t.data[((src[s] >> 8) & 0xff) as usize];
            s += 1;
            d += 1;
        }
    }
}

/// In-place variant over the scratch band: the packed rows are first
/// moved to the tail of the unpacked region, then expanded front to
/// back. The forward walk never overwrites a packed byte before it is
/// read.
fn color_index_inverse_in_place(t: &Transform, y_start: usize, y_end: usize, band: &mut [u32]) {
    let width = t.xsize;
    let num_rows = y_end - y_start;
    if t.bits == 0 {
        // One index per pixel: expansion happens in place directly.
        for px in band[..num_rows * width].iter_mut() {
            *px = t.data[((*px >> 8) & 0xff) as usize];
        }
        return;
    }
    let out_stride = num_rows * width;
    let in_stride = num_rows * subsample_size(width, t.bits);
    let tail = out_stride - in_stride;
    band.copy_within(0..in_stride, tail);

    let bits_per_pixel = 8 >> t.bits;
    let count_mask = (1usize << t.bits) - 1;
    let bit_mask = (1u32 << bits_per_pixel) - 1;
    let mut s = tail;
    let mut d = 0usize;
    for _y in 0..num_rows {
        let mut packed = 0u32;
        for x in 0..width {
            if x & count_mask == 0 {
                packed = (band[s] >> 8) & 0xff;
                s += 1;
            }
            band[d] = t.data[(packed & bit_mask) as usize];
            d += 1;
            packed >>= bits_per_pixel;
        }
    }
}

/// 8-bit alpha variant: indices come straight from the packed bytes,
/// and the mapped value is the colour map entry's green channel.
pub(crate) fn color_index_inverse_alpha(t: &Transform, y_start: usize, y_end: usize, src: &[u8], dst: &mut [u8]) {
    let width = t.xsize;
    let bits_per_pixel = 8 >> t.bits;
    let mut s = 0usize;
    let mut d = 0usize;
    if bits_per_pixel < 8 {
        let count_mask = (1usize << t.bits) - 1;
        let bit_mask = (1u32 << bits_per_pixel) - 1;
        for _y in y_start..y_end {
            let mut packed = 0u32;
            for x in 0..width {
                if x & count_mask == 0 {
                    packed = u32::from(src[s]);
                    s += 1;
                }
                dst[d] = ((t.data[(packed & bit_mask) as usize] >> 8) & 0xff) as u8;
                d += 1;
                packed >>= bits_per_pixel;
            }
        }
    } else {
        for _ in 0..(y_end - y_start) * width {
            dst[d] = ((t.data[usize::from(src[s])] >> 8) & 0xff) as u8;
            s += 1;
            d += 1;
        }
    }
}

// ── Band application ────────────────────────────────────────────────

fn inverse_transform(
    t: &Transform,
    row_start: usize,
    row_end: usize,
    src_rows: Option<&[u32]>,
    cache: &mut [u32],
    band_base: usize,
) {
    let width = t.xsize;
    let num_rows = row_end - row_start;
    match t.ty {
        TransformType::SubtractGreen => {
            add_green_to_blue_and_red(&mut cache[band_base..band_base + num_rows * width]);
        }
        TransformType::Predictor => {
            predictor_inverse(t, row_start, row_end, cache, band_base);
            if row_end != t.ysize {
                // The band's bottom row becomes the top-prediction row
                // for the next band.
                let last = band_base + (num_rows - 1) * width;
                cache.copy_within(last..last + width, band_base - width);
            }
        }
        TransformType::CrossColor => {
            color_space_inverse(t, row_start, row_end, cache, band_base);
        }
        TransformType::ColorIndexing => match src_rows {
            Some(src) => {
                color_index_inverse(t, row_start, row_end, src, &mut cache[band_base..band_base + num_rows * width]);
            }
            None => {
                color_index_inverse_in_place(t, row_start, row_end, &mut cache[band_base..]);
            }
        },
    }
}

/// Run the whole transform chain, in reverse, over one band of rows.
///
/// `rows_in` are the raw decoded rows (at the post-transform reduced
/// width); `cache` is the scratch holding one top-prediction row
/// followed by the band, with the band starting at `band_base`.
pub(crate) fn apply_inverse_transforms(
    transforms: &[Transform],
    row_start: usize,
    row_end: usize,
    rows_in: &[u32],
    cache: &mut [u32],
    band_base: usize,
) {
    cache[band_base..band_base + rows_in.len()].copy_from_slice(rows_in);
    let mut first = true;
    for t in transforms.iter().rev() {
        inverse_transform(t, row_start, row_end, if first { Some(rows_in) } else { None }, cache, band_base);
        first = false;
    }
}
