mod common;

use common::*;
use enough::Never;
use zenvp8l::{
    decode, decode_to, decode_with_options, get_info, AlphaDecoder, ColorSpace, CropRect,
    DecodeOptions, Limits, PixelSink, RgbaOutput, Vp8lDecoder, Vp8lError, YuvaOutput,
};

// ── Stream builders ─────────────────────────────────────────────────

/// 1x1 image: a single literal with green=0x80, red=blue=0, alpha=0xFF.
fn single_pixel_stream() -> Vec<u8> {
    let mut bw = BitWriter::new();
    write_header(&mut bw, 1, 1, false);
    bw.write(0, 1); // no transforms
    bw.write(0, 1); // no color cache
    bw.write(0, 1); // one tree group
    write_trivial_group(&mut bw, 0x80, 0x00, 0x00, 0xFF);
    bw.finish()
}

/// 4x1 image through a two-colour palette; the four indices pack into
/// a single source pixel.
fn palette_stream() -> Vec<u8> {
    let mut bw = BitWriter::new();
    write_header(&mut bw, 4, 1, false);
    bw.write(1, 1); // a transform follows
    bw.write(3, 2); // colour indexing
    bw.write(1, 8); // two colours
    // Palette sub-stream (2x1): entries 0xFF000000 then delta 0x00FFFFFF.
    bw.write(0, 1); // no color cache
    write_pair_code(&mut bw, 0x00, 0xFF); // green
    write_pair_code(&mut bw, 0x00, 0xFF); // red
    write_pair_code(&mut bw, 0x00, 0xFF); // blue
    write_pair_code(&mut bw, 0x00, 0xFF); // alpha
    write_single_code(&mut bw, 0); // distance
    // First entry: g=0,r=0,b=0,a=0xFF; second: g=r=b=0xFF, a=0.
    bw.write(0, 1);
    bw.write(0, 1);
    bw.write(0, 1);
    bw.write(1, 1);
    bw.write(1, 1);
    bw.write(1, 1);
    bw.write(1, 1);
    bw.write(0, 1);
    bw.write(0, 1); // end of transforms
    bw.write(0, 1); // no color cache
    bw.write(0, 1); // one tree group
    // One packed literal: indices 1,0,1,0 stored LSB-first in green.
    write_trivial_group(&mut bw, 0b0101, 0x00, 0x00, 0xFF);
    bw.finish()
}

/// 4x1 image: one literal followed by a distance-1, length-3
/// back-reference (the overlap fast path).
fn backref_stream() -> Vec<u8> {
    let mut bw = BitWriter::new();
    write_header(&mut bw, 4, 1, false);
    bw.write(0, 1); // no transforms
    bw.write(0, 1); // no color cache
    bw.write(0, 1); // one tree group
    // Green alphabet holds the literal 0x42 and length symbol 258
    // (length 3).
    write_two_symbol_code(&mut bw, 0x42, 258, 280);
    write_single_code(&mut bw, 0); // red
    write_single_code(&mut bw, 0); // blue
    write_single_code(&mut bw, 0xFF); // alpha
    write_single_code(&mut bw, 1); // distance symbol 1: plane code 2 -> dist 1
    bw.write(0, 1); // literal
    bw.write(1, 1); // back-reference
    bw.finish()
}

/// 2x1 image: a literal then a colour-cache hit on the same pixel.
fn color_cache_stream() -> Vec<u8> {
    let pixel = 0xFF00_4200u32;
    let key = (pixel.wrapping_mul(0x1e35_a7bd) >> 31) as usize;
    let mut bw = BitWriter::new();
    write_header(&mut bw, 2, 1, false);
    bw.write(0, 1); // no transforms
    bw.write(1, 1); // color cache present
    bw.write(1, 4); // one bit of cache key
    bw.write(0, 1); // one tree group
    write_two_symbol_code(&mut bw, 0x42, 280 + key, 282);
    write_single_code(&mut bw, 0); // red
    write_single_code(&mut bw, 0); // blue
    write_single_code(&mut bw, 0xFF); // alpha
    write_single_code(&mut bw, 0); // distance
    bw.write(0, 1); // literal 0xFF004200
    bw.write(1, 1); // cache hit
    bw.finish()
}

/// 1x1 stream whose green code-length code is over-subscribed (three
/// one-bit codes).
fn oversubscribed_stream() -> Vec<u8> {
    let mut bw = BitWriter::new();
    write_header(&mut bw, 1, 1, false);
    bw.write(0, 1); // no transforms
    bw.write(0, 1); // no color cache
    bw.write(0, 1); // one tree group
    bw.write(0, 1); // green: code-length-code path
    bw.write(0, 4); // 4 codes: order prefix {17, 18, 0, 1}
    bw.write(1, 3); // 17 -> length 1
    bw.write(1, 3); // 18 -> length 1
    bw.write(1, 3); // 0 -> length 1 (one too many)
    bw.write(0, 3); // 1 -> absent
    bw.finish()
}

/// 2x2 solid mid-gray, all channels from trivial trees.
fn gray_stream() -> Vec<u8> {
    let mut bw = BitWriter::new();
    write_header(&mut bw, 2, 2, false);
    bw.write(0, 1);
    bw.write(0, 1);
    bw.write(0, 1);
    write_trivial_group(&mut bw, 0x80, 0x80, 0x80, 0xFF);
    bw.finish()
}

// ── Probe ───────────────────────────────────────────────────────────

#[test]
fn signature_probe() {
    let info = get_info(&[0x2f, 0x00, 0x00, 0x00, 0x00]).unwrap();
    assert_eq!(info.width, 1);
    assert_eq!(info.height, 1);
    assert!(!info.has_alpha);

    assert!(matches!(
        get_info(&[0x21, 0x00, 0x00, 0x00, 0x00]),
        Err(Vp8lError::SignatureInvalid(0x21))
    ));
}

// ── Literal decoding ────────────────────────────────────────────────

#[test]
fn single_green_literal_pixel() {
    let decoded = decode(&single_pixel_stream(), Never).unwrap();
    assert_eq!(decoded.width, 1);
    assert_eq!(decoded.height, 1);
    // BGRA bytes of the word 0xFF008000.
    assert_eq!(decoded.pixels(), &[0x00, 0x80, 0x00, 0xFF]);
}

#[test]
fn colorspace_conversions() {
    let stream = single_pixel_stream();
    let rgba = decode_to(&stream, ColorSpace::Rgba, Never).unwrap();
    assert_eq!(rgba.pixels(), &[0x00, 0x80, 0x00, 0xFF]);
    let argb = decode_to(&stream, ColorSpace::Argb, Never).unwrap();
    assert_eq!(argb.pixels(), &[0xFF, 0x00, 0x80, 0x00]);
    let rgb = decode_to(&stream, ColorSpace::Rgb, Never).unwrap();
    assert_eq!(rgb.pixels(), &[0x00, 0x80, 0x00]);
    let bgr = decode_to(&stream, ColorSpace::Bgr, Never).unwrap();
    assert_eq!(bgr.pixels(), &[0x00, 0x80, 0x00]);
}

// ── Transforms ──────────────────────────────────────────────────────

#[test]
fn two_color_palette_unpacks() {
    let decoded = decode(&palette_stream(), Never).unwrap();
    assert_eq!((decoded.width, decoded.height), (4, 1));
    #[rustfmt::skip]
    let expected = [
        0xFF, 0xFF, 0xFF, 0xFF, // white
        0x00, 0x00, 0x00, 0xFF, // black
        0xFF, 0xFF, 0xFF, 0xFF,
        0x00, 0x00, 0x00, 0xFF,
    ];
    assert_eq!(decoded.pixels(), &expected);
}

#[test]
fn crop_selects_middle_pixels() {
    let options = DecodeOptions {
        crop: Some(CropRect { left: 1, top: 0, right: 3, bottom: 1 }),
        ..DecodeOptions::default()
    };
    let decoded =
        decode_with_options(&palette_stream(), ColorSpace::Bgra, &options, Never).unwrap();
    assert_eq!((decoded.width, decoded.height), (2, 1));
    assert_eq!(
        decoded.pixels(),
        &[0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
    );
}

#[test]
fn scaling_box_averages() {
    let options = DecodeOptions { scale: Some((2, 1)), ..DecodeOptions::default() };
    let decoded =
        decode_with_options(&palette_stream(), ColorSpace::Bgra, &options, Never).unwrap();
    assert_eq!((decoded.width, decoded.height), (2, 1));
    // Each output pixel averages one white and one black pixel.
    assert_eq!(decoded.pixels(), &[0x80, 0x80, 0x80, 0xFF, 0x80, 0x80, 0x80, 0xFF]);
}

// ── Back-references and the colour cache ────────────────────────────

#[test]
fn overlapping_back_reference_replicates() {
    let decoded = decode(&backref_stream(), Never).unwrap();
    assert_eq!((decoded.width, decoded.height), (4, 1));
    let px = [0x00, 0x42, 0x00, 0xFF];
    let expected: Vec<u8> = px.iter().copied().cycle().take(16).collect();
    assert_eq!(decoded.pixels(), &expected[..]);
}

#[test]
fn color_cache_hit_repeats_pixel() {
    let decoded = decode(&color_cache_stream(), Never).unwrap();
    assert_eq!((decoded.width, decoded.height), (2, 1));
    assert_eq!(
        decoded.pixels(),
        &[0x00, 0x42, 0x00, 0xFF, 0x00, 0x42, 0x00, 0xFF]
    );
}

// ── Errors ──────────────────────────────────────────────────────────

#[test]
fn oversubscribed_huffman_is_rejected() {
    let result = decode(&oversubscribed_stream(), Never);
    assert!(matches!(result, Err(Vp8lError::InvalidBitstream(_))));
}

#[test]
fn out_of_range_back_reference_is_rejected() {
    // Same shape as `backref_stream`, but the distance symbol maps to
    // a pixel before the start of the image.
    let mut bw = BitWriter::new();
    write_header(&mut bw, 4, 1, false);
    bw.write(0, 1);
    bw.write(0, 1);
    bw.write(0, 1);
    write_two_symbol_code(&mut bw, 0x42, 258, 280);
    write_single_code(&mut bw, 0); // red
    write_single_code(&mut bw, 0); // blue
    write_single_code(&mut bw, 0xFF); // alpha
    write_single_code(&mut bw, 3); // distance symbol 3: plane code 4 -> dist 3
    bw.write(0, 1); // one literal at position 0
    bw.write(1, 1); // copy from three pixels back
    let result = decode(&bw.finish(), Never);
    assert!(matches!(result, Err(Vp8lError::InvalidBitstream(_))));
}

#[test]
fn out_of_range_cache_bits_are_rejected() {
    let mut bw = BitWriter::new();
    write_header(&mut bw, 1, 1, false);
    bw.write(0, 1); // no transforms
    bw.write(1, 1); // color cache present
    bw.write(15, 4); // 15 bits: above the maximum of 11
    let result = decode(&bw.finish(), Never);
    assert!(matches!(result, Err(Vp8lError::InvalidColorCacheBits(15))));
}

#[test]
fn truncated_stream_is_rejected_one_shot() {
    let stream = striped_column_stream();
    let result = decode(&stream[..stream.len() - 4], Never);
    assert!(matches!(result, Err(Vp8lError::UnexpectedEof)));
}

#[test]
fn decode_image_requires_header() {
    let mut dec = Vp8lDecoder::new();
    let mut buf = [0u8; 4];
    let mut sink = PixelSink::Rgba(RgbaOutput {
        colorspace: ColorSpace::Bgra,
        buf: &mut buf,
        stride: 4,
    });
    let result = dec.decode_image(&DecodeOptions::default(), &mut sink, &Never);
    assert!(matches!(result, Err(Vp8lError::InvalidParameter(_))));
}

#[test]
fn undersized_output_is_rejected() {
    let stream = palette_stream();
    let options = DecodeOptions::default();
    let mut dec = Vp8lDecoder::new();
    dec.decode_header(&stream, &options, &Never).unwrap();
    let mut buf = [0u8; 8]; // needs 16
    let mut sink = PixelSink::Rgba(RgbaOutput {
        colorspace: ColorSpace::Bgra,
        buf: &mut buf,
        stride: 16,
    });
    let result = dec.decode_image(&options, &mut sink, &Never);
    assert!(matches!(result, Err(Vp8lError::BufferTooSmall { needed: 16, .. })));
}

#[test]
fn limits_reject_large_images() {
    let options = DecodeOptions {
        limits: Limits { max_pixels: Some(2), ..Limits::default() },
        ..DecodeOptions::default()
    };
    let result = decode_with_options(&palette_stream(), ColorSpace::Bgra, &options, Never);
    assert!(matches!(result, Err(Vp8lError::LimitExceeded(_))));
}

// ── YUVA output ─────────────────────────────────────────────────────

#[test]
fn yuva_output_solid_gray() {
    let stream = gray_stream();
    let options = DecodeOptions::default();
    let mut dec = Vp8lDecoder::new();
    dec.decode_header(&stream, &options, &Never).unwrap();

    let mut y = [0u8; 4];
    let mut u = [0u8; 1];
    let mut v = [0u8; 1];
    let mut a = [0u8; 4];
    {
        let mut sink = PixelSink::Yuva(YuvaOutput {
            y: &mut y,
            y_stride: 2,
            u: &mut u,
            u_stride: 1,
            v: &mut v,
            v_stride: 1,
            a: Some(&mut a),
            a_stride: 2,
        });
        dec.decode_image(&options, &mut sink, &Never).unwrap();
    }
    assert!(y.iter().all(|&l| l == y[0]));
    assert!(y[0] > 120 && y[0] < 132);
    assert_eq!(u[0], 128);
    assert_eq!(v[0], 128);
    assert_eq!(a, [0xFF; 4]);
}

// ── Alpha fast path ─────────────────────────────────────────────────

/// Alpha stream (no frame header) with one colour-indexing transform:
/// eight 1-bit indices packed into one byte, palette alphas 0x11/0xEE.
fn alpha_palette_stream() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write(1, 1); // a transform follows
    bw.write(3, 2); // colour indexing
    bw.write(1, 8); // two entries
    // Palette sub-stream: alpha values live in the green channel,
    // delta-encoded (0x11 then +0xDD = 0xEE).
    bw.write(0, 1); // no color cache
    write_pair_code(&mut bw, 0x11, 0xDD); // green
    write_single_code(&mut bw, 0); // red
    write_single_code(&mut bw, 0); // blue
    write_single_code(&mut bw, 0); // alpha
    write_single_code(&mut bw, 0); // distance
    bw.write(0, 1); // entry 0: green 0x11
    bw.write(1, 1); // entry 1: delta 0xDD
    bw.write(0, 1); // end of transforms
    bw.write(0, 1); // no color cache
    bw.write(0, 1); // one tree group
    write_trivial_group(&mut bw, 0xA6, 0, 0, 0); // packed indices 0b10100110
    bw.finish()
}

#[test]
fn paletted_alpha_uses_byte_decode() {
    let stream = alpha_palette_stream();
    let mut alpha = AlphaDecoder::new(8, 1, &stream, Never).unwrap();
    assert_eq!(alpha.dimensions(), (8, 1));

    let mut plane = [0u8; 8];
    alpha.decode_rows(1, &mut plane, Never).unwrap();
    assert_eq!(plane, [0x11, 0xEE, 0xEE, 0x11, 0x11, 0xEE, 0x11, 0xEE]);

    // A second call is a no-op once the plane is complete.
    alpha.decode_rows(1, &mut plane, Never).unwrap();
    assert_eq!(plane, [0x11, 0xEE, 0xEE, 0x11, 0x11, 0xEE, 0x11, 0xEE]);
}

/// Alpha stream without a palette: plain literals, decoded through the
/// 32-bit path with green-channel extraction.
fn alpha_literal_stream() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write(0, 1); // no transforms
    bw.write(0, 1); // no color cache
    bw.write(0, 1); // one tree group
    write_pair_code(&mut bw, 0x10, 0x20); // green carries the alpha value
    write_single_code(&mut bw, 0); // red
    write_single_code(&mut bw, 0); // blue
    write_single_code(&mut bw, 0); // alpha
    write_single_code(&mut bw, 0); // distance
    for bit in [0u32, 1, 1, 0] {
        bw.write(bit, 1);
    }
    bw.finish()
}

#[test]
fn alpha_without_palette_uses_32bit_path() {
    let stream = alpha_literal_stream();
    let mut alpha = AlphaDecoder::new(2, 2, &stream, Never).unwrap();
    let mut plane = [0u8; 4];
    alpha.decode_rows(2, &mut plane, Never).unwrap();
    assert_eq!(plane, [0x10, 0x20, 0x20, 0x10]);
}
