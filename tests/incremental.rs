mod common;

use common::*;
use enough::Never;
use zenvp8l::{
    decode, ColorSpace, DecodeOptions, PixelSink, RgbaOutput, StreamStatus, Vp8lDecoder, Vp8lError,
};

fn incremental_options() -> DecodeOptions {
    DecodeOptions { incremental: true, ..DecodeOptions::default() }
}

#[test]
fn split_feed_matches_one_shot() {
    let full = striped_column_stream();
    let one_shot = decode(&full, Never).unwrap();
    assert_eq!(one_shot.pixels(), &striped_column_pixels()[..]);

    let options = incremental_options();
    let mut dec = Vp8lDecoder::new();
    // The first chunk holds the whole header and a few pixel rows.
    let status = dec.decode_header(&full[..12], &options, &Never).unwrap();
    assert_eq!(status, StreamStatus::Complete);
    assert_eq!((dec.width(), dec.height()), (1, 64));

    let mut buf = vec![0u8; 64 * 4];
    {
        let mut sink = PixelSink::Rgba(RgbaOutput {
            colorspace: ColorSpace::Bgra,
            buf: &mut buf,
            stride: 4,
        });
        let status = dec.decode_image(&options, &mut sink, &Never).unwrap();
        assert_eq!(status, StreamStatus::Suspended);
    }

    dec.set_data(&full).unwrap();
    {
        let mut sink = PixelSink::Rgba(RgbaOutput {
            colorspace: ColorSpace::Bgra,
            buf: &mut buf,
            stride: 4,
        });
        let status = dec.decode_image(&options, &mut sink, &Never).unwrap();
        assert_eq!(status, StreamStatus::Complete);
    }

    assert_eq!(&buf[..], one_shot.pixels());
}

#[test]
fn resume_in_many_small_steps() {
    let full = striped_column_stream();
    let one_shot = decode(&full, Never).unwrap();

    let options = incremental_options();
    let mut dec = Vp8lDecoder::new();
    dec.decode_header(&full[..12], &options, &Never).unwrap();

    let mut buf = vec![0u8; 64 * 4];
    let mut fed = 12;
    loop {
        let mut sink = PixelSink::Rgba(RgbaOutput {
            colorspace: ColorSpace::Bgra,
            buf: &mut buf,
            stride: 4,
        });
        match dec.decode_image(&options, &mut sink, &Never).unwrap() {
            StreamStatus::Complete => break,
            StreamStatus::Suspended => {
                assert!(fed < full.len(), "decoder still suspended with all data fed");
                fed = (fed + 1).min(full.len());
                dec.set_data(&full[..fed]).unwrap();
            }
        }
    }
    assert_eq!(&buf[..], one_shot.pixels());
}

#[test]
fn truncated_header_suspends_and_retries() {
    let full = striped_column_stream();
    let options = incremental_options();
    let mut dec = Vp8lDecoder::new();

    // Shorter than the fixed frame header.
    let status = dec.decode_header(&full[..3], &options, &Never).unwrap();
    assert_eq!(status, StreamStatus::Suspended);

    // Header present but the tree groups are cut off.
    let status = dec.decode_header(&full[..10], &options, &Never).unwrap();
    assert_eq!(status, StreamStatus::Suspended);

    let status = dec.decode_header(&full, &options, &Never).unwrap();
    assert_eq!(status, StreamStatus::Complete);
}

#[test]
fn shrinking_resume_data_is_rejected() {
    let full = striped_column_stream();
    let options = incremental_options();
    let mut dec = Vp8lDecoder::new();
    dec.decode_header(&full, &options, &Never).unwrap();
    let result = dec.set_data(&full[..4]);
    assert!(matches!(result, Err(Vp8lError::InvalidParameter(_))));
}
