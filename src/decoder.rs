//! VP8L decoder driver.
//!
//! Owns the recursive image-stream parser (transforms, colour cache,
//! meta-Huffman groups), the LZ77 pixel loop, row-block processing
//! (inverse transforms, crop, scale, colour conversion), and the
//! incremental checkpoint machinery.

use alloc::vec;
use alloc::vec::Vec;

use enough::Stop;

use crate::bitreader::BitReader;
use crate::color_cache::ColorCache;
use crate::error::Vp8lError;
use crate::huffman::{
    build_huffman_table, read_symbol, HuffmanCode, HUFFMAN_TABLE_BITS, LENGTHS_TABLE_BITS,
    LENGTHS_TABLE_MASK,
};
use crate::io::{DecodeOptions, IoWindow, PixelSink};
use crate::limits::Limits;
use crate::pixel::convert_from_bgra;
use crate::rescale::Rescaler;
use crate::transform::{
    apply_inverse_transforms, expand_color_map, subsample_size, Transform, TransformType,
    NUM_TRANSFORMS,
};
use crate::yuv::convert_to_yuva;

pub(crate) const VP8L_MAGIC_BYTE: u8 = 0x2f;
pub(crate) const FRAME_HEADER_SIZE: usize = 5;
const IMAGE_SIZE_BITS: u32 = 14;
const VERSION_BITS: u32 = 3;

pub(crate) const NUM_ARGB_CACHE_ROWS: usize = 16;
const SYNC_EVERY_N_ROWS: usize = 8;

pub(crate) const NUM_LITERAL_CODES: usize = 256;
pub(crate) const NUM_LENGTH_CODES: usize = 24;
const NUM_DISTANCE_CODES: usize = 40;
const MAX_CACHE_BITS: u32 = 11;

const NUM_CODE_LENGTH_CODES: usize = 19;
const CODE_LENGTH_LITERALS: usize = 16;
const CODE_LENGTH_REPEAT_CODE: usize = 16;
const CODE_LENGTH_EXTRA_BITS: [u32; 3] = [2, 3, 7];
const CODE_LENGTH_REPEAT_OFFSETS: [usize; 3] = [3, 3, 11];
const DEFAULT_CODE_LENGTH: u8 = 8;
const CODE_LENGTH_CODE_ORDER: [usize; NUM_CODE_LENGTH_CODES] =
    [17, 18, 0, 1, 2, 3, 4, 5, 16, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

/// Five Huffman codes per tree group.
pub(crate) const HUFFMAN_CODES_PER_META_CODE: usize = 5;
pub(crate) const GREEN: usize = 0;
pub(crate) const RED: usize = 1;
pub(crate) const BLUE: usize = 2;
pub(crate) const ALPHA: usize = 3;
pub(crate) const DIST: usize = 4;

const ALPHABET_SIZE: [usize; HUFFMAN_CODES_PER_META_CODE] = [
    NUM_LITERAL_CODES + NUM_LENGTH_CODES,
    NUM_LITERAL_CODES,
    NUM_LITERAL_CODES,
    NUM_LITERAL_CODES,
    NUM_DISTANCE_CODES,
];
/// Which of the five codes feed the trivial-literal test.
const LITERAL_MAP: [bool; HUFFMAN_CODES_PER_META_CODE] = [false, true, true, true, false];

/// Worst-case lookup entries for one tree group, by colour-cache bits.
/// Red, blue, alpha and distance tables are bounded by 630 and 410;
/// green grows with the cache size. Values computed with Mark Adler's
/// `enough` tool for an 8-bit first level.
const FIXED_TABLE_SIZE: usize = 630 * 3 + 410;
const TABLE_SIZES: [usize; 12] = [
    FIXED_TABLE_SIZE + 654,
    FIXED_TABLE_SIZE + 656,
    FIXED_TABLE_SIZE + 658,
    FIXED_TABLE_SIZE + 662,
    FIXED_TABLE_SIZE + 670,
    FIXED_TABLE_SIZE + 686,
    FIXED_TABLE_SIZE + 718,
    FIXED_TABLE_SIZE + 782,
    FIXED_TABLE_SIZE + 912,
    FIXED_TABLE_SIZE + 1168,
    FIXED_TABLE_SIZE + 1680,
    FIXED_TABLE_SIZE + 2704,
];

/// Short distances are transmitted as codes into this table, which
/// maps them back to 2D (row, column) offsets.
const CODE_TO_PLANE_CODES: usize = 120;
const CODE_TO_PLANE: [u8; CODE_TO_PLANE_CODES] = [
    0x18, 0x07, 0x17, 0x19, 0x28, 0x06, 0x27, 0x29, 0x16, 0x1a, 0x26, 0x2a, 0x38, 0x05, 0x37,
    0x39, 0x15, 0x1b, 0x36, 0x3a, 0x25, 0x2b, 0x48, 0x04, 0x47, 0x49, 0x14, 0x1c, 0x35, 0x3b,
    0x46, 0x4a, 0x24, 0x2c, 0x58, 0x45, 0x4b, 0x34, 0x3c, 0x03, 0x57, 0x59, 0x13, 0x1d, 0x56,
    0x5a, 0x23, 0x2d, 0x44, 0x4c, 0x55, 0x5b, 0x33, 0x3d, 0x68, 0x02, 0x67, 0x69, 0x12, 0x1e,
    0x66, 0x6a, 0x22, 0x2e, 0x54, 0x5c, 0x43, 0x4d, 0x65, 0x6b, 0x32, 0x3e, 0x78, 0x01, 0x77,
    0x79, 0x53, 0x5d, 0x11, 0x1f, 0x64, 0x6c, 0x42, 0x4e, 0x76, 0x7a, 0x21, 0x2f, 0x75, 0x7b,
    0x31, 0x3f, 0x63, 0x6d, 0x52, 0x5e, 0x00, 0x74, 0x7c, 0x41, 0x4f, 0x10, 0x20, 0x62, 0x6e,
    0x30, 0x73, 0x7d, 0x51, 0x5f, 0x40, 0x72, 0x7e, 0x61, 0x6f, 0x50, 0x71, 0x7f, 0x60, 0x70,
];

// ── Public probe types ──────────────────────────────────────────────

/// Image properties read from the stream header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
}

/// Outcome of a decode call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    /// All requested pixels were decoded and emitted.
    Complete,
    /// Incremental mode only: the input underran mid-frame; extend the
    /// data and call again to resume from the last checkpoint.
    Suspended,
}

/// Parse the 5-byte stream header without building a decoder.
pub fn get_info(data: &[u8]) -> Result<ImageInfo, Vp8lError> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(Vp8lError::UnexpectedEof);
    }
    let mut br = BitReader::new(data);
    let (width, height, has_alpha) = read_image_info(&mut br)?;
    Ok(ImageInfo {
        width: width as u32,
        height: height as u32,
        has_alpha,
    })
}

fn read_image_info(br: &mut BitReader<'_>) -> Result<(usize, usize, bool), Vp8lError> {
    let magic = br.read_bits(8) as u8;
    if magic != VP8L_MAGIC_BYTE {
        return Err(Vp8lError::SignatureInvalid(magic));
    }
    let width = br.read_bits(IMAGE_SIZE_BITS) as usize + 1;
    let height = br.read_bits(IMAGE_SIZE_BITS) as usize + 1;
    let has_alpha = br.read_bits(1) == 1;
    let version = br.read_bits(VERSION_BITS) as u8;
    if version != 0 {
        return Err(Vp8lError::VersionInvalid(version));
    }
    if br.eos() {
        return Err(Vp8lError::UnexpectedEof);
    }
    Ok((width, height, has_alpha))
}

// ── Metadata ────────────────────────────────────────────────────────

/// One tile's bundle of five Huffman codes, as offsets into the shared
/// table arena.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct HTreeGroup {
    pub htrees: [usize; HUFFMAN_CODES_PER_META_CODE],
    /// Red, blue and alpha each decode to a single symbol.
    pub is_trivial_literal: bool,
    /// Pre-combined `(alpha<<24)|(red<<16)|blue` for the trivial case.
    pub literal_arb: u32,
}

#[derive(Default)]
pub(crate) struct Metadata {
    pub color_cache_bits: u32,
    pub color_cache_size: usize,
    pub color_cache: Option<ColorCache>,
    pub saved_color_cache: Option<ColorCache>,
    pub huffman_image: Vec<u32>,
    pub huffman_subsample_bits: u32,
    pub huffman_xsize: usize,
    pub huffman_mask: usize,
    pub htree_groups: Vec<HTreeGroup>,
    /// Arena of lookup entries referenced by the groups.
    pub huffman_tables: Vec<HuffmanCode>,
}

fn get_meta_index(image: &[u32], xsize: usize, bits: u32, x: usize, y: usize) -> usize {
    if bits == 0 {
        return 0;
    }
    image[xsize * (y >> bits) + (x >> bits)] as usize
}

// ── Copy helpers ────────────────────────────────────────────────────

/// Overlap-safe backward copy of 32-bit pixels. Distance 1 and 2 are
/// replicated as patterns; non-overlapping spans are block copies.
fn copy_block_32b(data: &mut [u32], pos: usize, dist: usize, length: usize) {
    if dist == 1 {
        let v = data[pos - 1];
        data[pos..pos + length].fill(v);
    } else if dist == 2 && length >= 4 {
        let (before, after) = data.split_at_mut(pos);
        let pattern = &before[pos - 2..];
        for chunk in after[..length].chunks_mut(2) {
            for (out, &p) in chunk.iter_mut().zip(pattern.iter()) {
                *out = p;
            }
        }
    } else if dist >= length {
        data.copy_within(pos - dist..pos - dist + length, pos);
    } else {
        for i in 0..length {
            data[pos + i] = data[pos + i - dist];
        }
    }
}

/// Byte flavour used by the paletted-alpha fast path.
pub(crate) fn copy_block_8b(data: &mut [u8], pos: usize, dist: usize, length: usize) {
    if dist == 1 {
        let v = data[pos - 1];
        data[pos..pos + length].fill(v);
    } else if (dist == 2 || dist == 4) && length >= 8 {
        let (before, after) = data.split_at_mut(pos);
        let pattern = &before[pos - dist..];
        for chunk in after[..length].chunks_mut(dist) {
            for (out, &p) in chunk.iter_mut().zip(pattern.iter()) {
                *out = p;
            }
        }
    } else if dist >= length {
        data.copy_within(pos - dist..pos - dist + length, pos);
    } else {
        for i in 0..length {
            data[pos + i] = data[pos + i - dist];
        }
    }
}

fn plane_code_to_distance(xsize: usize, plane_code: usize) -> usize {
    if plane_code > CODE_TO_PLANE_CODES {
        plane_code - CODE_TO_PLANE_CODES
    } else {
        let dist_code = CODE_TO_PLANE[plane_code - 1] as isize;
        let yoffset = dist_code >> 4;
        let xoffset = 8 - (dist_code & 0xf);
        let dist = yoffset * xsize as isize + xoffset;
        // dist < 1 can happen when xsize is very small.
        dist.max(1) as usize
    }
}

// ── Row sinks ───────────────────────────────────────────────────────

/// Destination for completed row blocks during the pixel loop.
pub(crate) enum RowSink<'s, 'b> {
    /// Embedded sub-image: keep the raw plane, emit nothing.
    Discard,
    /// Full pipeline into the caller's output buffer.
    Output(&'s mut PixelSink<'b>),
    /// Alpha plane extraction (green channel) for the 32-bit alpha path.
    AlphaPlane(&'s mut [u8]),
}

// ── Decoder ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecodeState {
    ReadDim,
    ReadHdr,
    ReadData,
}

/// Lossless bitstream decoder. Create one, parse the header, then run
/// the image decode into an output sink; `'a` is the lifetime of the
/// input data.
pub struct Vp8lDecoder<'a> {
    pub(crate) br: BitReader<'a>,
    saved_br: BitReader<'a>,
    state: DecodeState,
    /// Dimensions of the decoded plane (width shrinks under a packed
    /// colour-indexing transform).
    pub(crate) width: usize,
    pub(crate) height: usize,
    /// Dimensions from the header, which the output pipeline sees.
    pub(crate) io_width: usize,
    pub(crate) io_height: usize,
    has_alpha: bool,
    pub(crate) mdata: Metadata,
    pub(crate) transforms: Vec<Transform>,
    transforms_seen: u32,
    pub(crate) pixels: Vec<u32>,
    pub(crate) pixels8: Vec<u8>,
    /// One top-prediction row followed by `NUM_ARGB_CACHE_ROWS` rows.
    argb_cache: Vec<u32>,
    final_width: usize,
    pub(crate) last_pixel: usize,
    saved_last_pixel: usize,
    pub(crate) last_row: usize,
    last_out_row: usize,
    pub(crate) incremental: bool,
    io: IoWindow,
    rescaler: Option<Rescaler>,
    pub(crate) limits: Limits,
}

impl Default for Vp8lDecoder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Vp8lDecoder<'a> {
    pub fn new() -> Vp8lDecoder<'a> {
        Vp8lDecoder {
            br: BitReader::new(&[]),
            saved_br: BitReader::new(&[]),
            state: DecodeState::ReadDim,
            width: 0,
            height: 0,
            io_width: 0,
            io_height: 0,
            has_alpha: false,
            mdata: Metadata::default(),
            transforms: Vec::new(),
            transforms_seen: 0,
            pixels: Vec::new(),
            pixels8: Vec::new(),
            argb_cache: Vec::new(),
            final_width: 0,
            last_pixel: 0,
            saved_last_pixel: 0,
            last_row: 0,
            last_out_row: 0,
            incremental: false,
            io: IoWindow::default(),
            rescaler: None,
            limits: Limits::default(),
        }
    }

    /// Release all decoder-owned buffers and reset to the initial
    /// state. Required after an error before the decoder is reused.
    pub fn clear(&mut self) {
        *self = Vp8lDecoder::new();
    }

    /// Width from the stream header.
    pub fn width(&self) -> u32 {
        self.io_width as u32
    }

    /// Height from the stream header.
    pub fn height(&self) -> u32 {
        self.io_height as u32
    }

    /// Alpha hint from the stream header.
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Final output dimensions for the given options.
    pub fn output_size(&self, options: &DecodeOptions) -> Result<(u32, u32), Vp8lError> {
        let io = IoWindow::from_options(self.io_width, self.io_height, options)?;
        let (w, h) = io.output_size();
        Ok((w as u32, h as u32))
    }

    /// Extend the input with a longer buffer whose prefix is the data
    /// already supplied; used to resume after [`StreamStatus::Suspended`].
    pub fn set_data(&mut self, data: &'a [u8]) -> Result<(), Vp8lError> {
        if data.len() < self.br.data_len() {
            return Err(Vp8lError::InvalidParameter(
                "resume data shorter than already-consumed input".into(),
            ));
        }
        self.br.set_buffer(data);
        self.saved_br.set_buffer(data);
        Ok(())
    }

    // ── Header ──────────────────────────────────────────────────────

    /// Parse the signature, dimensions, level-0 transforms and Huffman
    /// codes. In incremental mode a truncated header reports
    /// [`StreamStatus::Suspended`] after clearing the decoder; call
    /// again with more data to retry.
    pub fn decode_header(
        &mut self,
        data: &'a [u8],
        options: &DecodeOptions,
        stop: &dyn Stop,
    ) -> Result<StreamStatus, Vp8lError> {
        self.clear();
        self.incremental = options.incremental;
        self.limits = options.limits.clone();
        if data.len() < FRAME_HEADER_SIZE {
            if options.incremental {
                self.clear();
                return Ok(StreamStatus::Suspended);
            }
            return Err(Vp8lError::UnexpectedEof);
        }
        self.br = BitReader::new(data);
        match self.parse_header(stop) {
            Ok(()) => Ok(StreamStatus::Complete),
            Err(Vp8lError::UnexpectedEof) if options.incremental => {
                self.clear();
                Ok(StreamStatus::Suspended)
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn parse_header(&mut self, stop: &dyn Stop) -> Result<(), Vp8lError> {
        let (width, height, has_alpha) = read_image_info(&mut self.br)?;
        self.limits.check(width as u32, height as u32)?;
        self.width = width;
        self.height = height;
        self.io_width = width;
        self.io_height = height;
        self.has_alpha = has_alpha;
        self.decode_image_stream(width, height, true, stop)?;
        Ok(())
    }

    // ── Recursive stream descent ────────────────────────────────────

    /// Parse one image stream: transforms (level 0 only), colour-cache
    /// config, meta-Huffman image and tree groups, then — for embedded
    /// sub-images — the pixel payload, which is returned. At level 0
    /// the header state is kept on the decoder and the returned vector
    /// is empty.
    pub(crate) fn decode_image_stream(
        &mut self,
        xsize: usize,
        ysize: usize,
        is_level0: bool,
        stop: &dyn Stop,
    ) -> Result<Vec<u32>, Vp8lError> {
        let mut transform_xsize = xsize;
        let transform_ysize = ysize;

        if is_level0 {
            while self.br.read_bits(1) == 1 {
                self.read_transform(&mut transform_xsize, transform_ysize, stop)?;
            }
        }

        let mut color_cache_bits = 0u32;
        if self.br.read_bits(1) == 1 {
            color_cache_bits = self.br.read_bits(4);
            if !(1..=MAX_CACHE_BITS).contains(&color_cache_bits) {
                return Err(if self.br.eos() {
                    Vp8lError::UnexpectedEof
                } else {
                    Vp8lError::InvalidColorCacheBits(color_cache_bits)
                });
            }
        }

        self.read_huffman_codes(transform_xsize, transform_ysize, color_cache_bits, is_level0, stop)?;

        if color_cache_bits > 0 {
            self.mdata.color_cache_bits = color_cache_bits;
            self.mdata.color_cache_size = 1 << color_cache_bits;
            self.mdata.color_cache = Some(ColorCache::new(color_cache_bits));
        } else {
            self.mdata.color_cache_size = 0;
        }
        self.update_decoder(transform_xsize, transform_ysize);

        if is_level0 {
            self.state = DecodeState::ReadHdr;
            self.last_pixel = 0;
            return Ok(Vec::new());
        }

        let total = transform_xsize * transform_ysize;
        self.limits.check_memory(total * 4)?;
        let mut data = vec![0u32; total];
        let mut sink = RowSink::Discard;
        self.decode_image_data_32(&mut data, transform_xsize, transform_ysize, transform_ysize, &mut sink, stop)?;
        if self.br.eos() {
            return Err(Vp8lError::UnexpectedEof);
        }
        // Sub-stream metadata is temporary; the enclosing stream reads
        // its own.
        self.mdata = Metadata::default();
        self.last_pixel = 0;
        Ok(data)
    }

    fn read_transform(&mut self, xsize: &mut usize, ysize: usize, stop: &dyn Stop) -> Result<(), Vp8lError> {
        let ty = TransformType::from_bits(self.br.read_bits(2));
        if self.transforms_seen & ty.bit() != 0 {
            return Err(if self.br.eos() {
                Vp8lError::UnexpectedEof
            } else {
                Vp8lError::InvalidBitstream("duplicate transform")
            });
        }
        self.transforms_seen |= ty.bit();
        debug_assert!(self.transforms.len() < NUM_TRANSFORMS);
        let cur_xsize = *xsize;

        let transform = match ty {
            TransformType::Predictor | TransformType::CrossColor => {
                let bits = self.br.read_bits(3) + 2;
                let data = self.decode_image_stream(
                    subsample_size(cur_xsize, bits),
                    subsample_size(ysize, bits),
                    false,
                    stop,
                )?;
                Transform { ty, xsize: cur_xsize, ysize, bits, data }
            }
            TransformType::ColorIndexing => {
                let num_colors = self.br.read_bits(8) as usize + 1;
                let bits = if num_colors > 16 {
                    0
                } else if num_colors > 4 {
                    1
                } else if num_colors > 2 {
                    2
                } else {
                    3
                };
                *xsize = subsample_size(cur_xsize, bits);
                let palette = self.decode_image_stream(num_colors, 1, false, stop)?;
                let data = expand_color_map(num_colors, bits, &palette);
                Transform { ty, xsize: cur_xsize, ysize, bits, data }
            }
            TransformType::SubtractGreen => Transform {
                ty,
                xsize: cur_xsize,
                ysize,
                bits: 0,
                data: Vec::new(),
            },
        };
        self.transforms.push(transform);
        Ok(())
    }

    fn update_decoder(&mut self, width: usize, height: usize) {
        let num_bits = self.mdata.huffman_subsample_bits;
        self.width = width;
        self.height = height;
        self.mdata.huffman_xsize = subsample_size(width, num_bits);
        self.mdata.huffman_mask = if num_bits == 0 { usize::MAX } else { (1 << num_bits) - 1 };
    }

    // ── Huffman code parsing ────────────────────────────────────────

    fn read_huffman_codes(
        &mut self,
        xsize: usize,
        ysize: usize,
        color_cache_bits: u32,
        allow_recursion: bool,
        stop: &dyn Stop,
    ) -> Result<(), Vp8lError> {
        let mut num_htree_groups = 1usize;
        let mut huffman_image = Vec::new();
        let mut huffman_subsample_bits = 0u32;

        if allow_recursion && self.br.read_bits(1) == 1 {
            let huffman_precision = self.br.read_bits(3) + 2;
            let huffman_xsize = subsample_size(xsize, huffman_precision);
            let huffman_ysize = subsample_size(ysize, huffman_precision);
            huffman_image = self.decode_image_stream(huffman_xsize, huffman_ysize, false, stop)?;
            huffman_subsample_bits = huffman_precision;
            for px in huffman_image.iter_mut() {
                // The group index is stored in the red and green bytes.
                let group = (*px >> 8) & 0xffff;
                *px = group;
                if group as usize >= num_htree_groups {
                    num_htree_groups = group as usize + 1;
                }
            }
        }

        if self.br.eos() {
            return Err(Vp8lError::UnexpectedEof);
        }

        let table_size = TABLE_SIZES[color_cache_bits as usize];
        let max_alphabet_size =
            ALPHABET_SIZE[GREEN] + if color_cache_bits > 0 { 1usize << color_cache_bits } else { 0 };

        self.limits
            .check_memory(num_htree_groups * table_size * core::mem::size_of::<HuffmanCode>())?;
        let mut tables = vec![HuffmanCode::default(); num_htree_groups * table_size];
        let mut code_lengths = vec![0u8; max_alphabet_size];
        let mut groups = Vec::with_capacity(num_htree_groups);

        let mut next = 0usize;
        for _ in 0..num_htree_groups {
            stop.check()?;
            let mut group = HTreeGroup::default();
            let mut is_trivial_literal = true;
            for j in 0..HUFFMAN_CODES_PER_META_CODE {
                let mut alphabet_size = ALPHABET_SIZE[j];
                if j == GREEN && color_cache_bits > 0 {
                    alphabet_size += 1usize << color_cache_bits;
                }
                group.htrees[j] = next;
                let size = self.read_huffman_code(alphabet_size, &mut code_lengths, &mut tables[next..])?;
                if LITERAL_MAP[j] && is_trivial_literal {
                    is_trivial_literal = tables[next].bits == 0;
                }
                next += size;
            }
            group.is_trivial_literal = is_trivial_literal;
            if is_trivial_literal {
                let red = u32::from(tables[group.htrees[RED]].value);
                let blue = u32::from(tables[group.htrees[BLUE]].value);
                let alpha = u32::from(tables[group.htrees[ALPHA]].value);
                group.literal_arb = (alpha << 24) | (red << 16) | blue;
            }
            groups.push(group);
        }

        self.mdata.huffman_image = huffman_image;
        self.mdata.huffman_subsample_bits = huffman_subsample_bits;
        self.mdata.htree_groups = groups;
        self.mdata.huffman_tables = tables;
        Ok(())
    }

    /// Read one Huffman code and build its lookup table into `table`,
    /// returning the number of entries used.
    fn read_huffman_code(
        &mut self,
        alphabet_size: usize,
        code_lengths: &mut [u8],
        table: &mut [HuffmanCode],
    ) -> Result<usize, Vp8lError> {
        code_lengths[..alphabet_size].fill(0);

        if self.br.read_bits(1) == 1 {
            // Simple code: one or two symbols spelled out directly.
            let num_symbols = self.br.read_bits(1) + 1;
            let first_symbol_len_code = self.br.read_bits(1);
            // The first symbol is either a 1-bit or an 8-bit code.
            let symbol = self.br.read_bits(if first_symbol_len_code == 0 { 1 } else { 8 }) as usize;
            code_lengths[symbol] = 1;
            if num_symbols == 2 {
                let symbol = self.br.read_bits(8) as usize;
                code_lengths[symbol] = 1;
            }
        } else {
            let mut code_length_code_lengths = [0u8; NUM_CODE_LENGTH_CODES];
            let num_codes = self.br.read_bits(4) as usize + 4;
            if num_codes > NUM_CODE_LENGTH_CODES {
                return Err(if self.br.eos() {
                    Vp8lError::UnexpectedEof
                } else {
                    Vp8lError::InvalidBitstream("too many code length codes")
                });
            }
            for i in 0..num_codes {
                code_length_code_lengths[CODE_LENGTH_CODE_ORDER[i]] = self.br.read_bits(3) as u8;
            }
            self.read_huffman_code_lengths(&code_length_code_lengths, alphabet_size, code_lengths)?;
        }

        if self.br.eos() {
            return Err(Vp8lError::UnexpectedEof);
        }
        let size = build_huffman_table(table, HUFFMAN_TABLE_BITS, &code_lengths[..alphabet_size]);
        if size == 0 {
            return Err(Vp8lError::InvalidBitstream("invalid huffman code"));
        }
        Ok(size)
    }

    fn read_huffman_code_lengths(
        &mut self,
        code_length_code_lengths: &[u8; NUM_CODE_LENGTH_CODES],
        num_symbols: usize,
        code_lengths: &mut [u8],
    ) -> Result<(), Vp8lError> {
        let mut table = [HuffmanCode::default(); 1 << LENGTHS_TABLE_BITS];
        if build_huffman_table(&mut table, LENGTHS_TABLE_BITS, code_length_code_lengths) == 0 {
            return Err(if self.br.eos() {
                Vp8lError::UnexpectedEof
            } else {
                Vp8lError::InvalidBitstream("invalid code length code")
            });
        }

        let mut max_symbol = if self.br.read_bits(1) == 1 {
            let length_nbits = 2 + 2 * self.br.read_bits(3);
            let max_symbol = 2 + self.br.read_bits(length_nbits) as usize;
            if max_symbol > num_symbols {
                return Err(if self.br.eos() {
                    Vp8lError::UnexpectedEof
                } else {
                    Vp8lError::InvalidBitstream("max symbol out of range")
                });
            }
            max_symbol
        } else {
            num_symbols
        };

        let mut prev_code_len = DEFAULT_CODE_LENGTH;
        let mut symbol = 0usize;
        while symbol < num_symbols {
            if max_symbol == 0 {
                break;
            }
            max_symbol -= 1;
            self.br.fill_bit_window();
            let p = table[(self.br.prefetch_bits() & LENGTHS_TABLE_MASK) as usize];
            self.br.set_bit_pos(self.br.bit_pos() + u32::from(p.bits));
            let code_len = p.value as usize;
            if code_len < CODE_LENGTH_LITERALS {
                code_lengths[symbol] = code_len as u8;
                symbol += 1;
                if code_len != 0 {
                    prev_code_len = code_len as u8;
                }
            } else {
                let use_prev = code_len == CODE_LENGTH_REPEAT_CODE;
                let slot = code_len - CODE_LENGTH_LITERALS;
                let extra_bits = CODE_LENGTH_EXTRA_BITS[slot];
                let repeat_offset = CODE_LENGTH_REPEAT_OFFSETS[slot];
                let repeat = self.br.read_bits(extra_bits) as usize + repeat_offset;
                if symbol + repeat > num_symbols {
                    return Err(if self.br.eos() {
                        Vp8lError::UnexpectedEof
                    } else {
                        Vp8lError::InvalidBitstream("code length repeat out of range")
                    });
                }
                let length = if use_prev { prev_code_len } else { 0 };
                for _ in 0..repeat {
                    code_lengths[symbol] = length;
                    symbol += 1;
                }
            }
        }
        Ok(())
    }

    // ── LZ77 pixel loop ─────────────────────────────────────────────

    fn htree_group_for_pos(&self, x: usize, y: usize) -> HTreeGroup {
        let meta_index = get_meta_index(
            &self.mdata.huffman_image,
            self.mdata.huffman_xsize,
            self.mdata.huffman_subsample_bits,
            x,
            y,
        );
        self.mdata.htree_groups[meta_index]
    }

    fn get_copy_distance(&mut self, distance_symbol: usize) -> usize {
        if distance_symbol < 4 {
            return distance_symbol + 1;
        }
        let extra_bits = (distance_symbol as u32 - 2) >> 1;
        let offset = (2 + (distance_symbol & 1)) << extra_bits;
        offset + self.br.read_bits(extra_bits) as usize + 1
    }

    fn get_copy_length(&mut self, length_symbol: usize) -> usize {
        // Length and distance prefixes share one encoding.
        self.get_copy_distance(length_symbol)
    }

    fn save_state(&mut self, last_pixel: usize) {
        debug_assert!(self.incremental);
        self.saved_br = self.br;
        self.saved_last_pixel = last_pixel;
        if let (Some(cache), Some(saved)) =
            (self.mdata.color_cache.as_ref(), self.mdata.saved_color_cache.as_mut())
        {
            saved.copy_from(cache);
        }
    }

    fn restore_state(&mut self) {
        debug_assert!(self.br.eos());
        self.br = self.saved_br;
        self.last_pixel = self.saved_last_pixel;
        if let (Some(saved), Some(cache)) =
            (self.mdata.saved_color_cache.as_ref(), self.mdata.color_cache.as_mut())
        {
            cache.copy_from(saved);
        }
    }

    /// Decode pixels up to `last_row`, dispatching completed row blocks
    /// to `sink`. Resumes from `self.last_pixel`.
    pub(crate) fn decode_image_data_32(
        &mut self,
        data: &mut [u32],
        width: usize,
        height: usize,
        last_row: usize,
        sink: &mut RowSink<'_, '_>,
        stop: &dyn Stop,
    ) -> Result<(), Vp8lError> {
        let mut row = self.last_pixel / width;
        let mut col = self.last_pixel % width;
        let mut src = self.last_pixel;
        let mut last_cached = src;
        let src_end = width * height;
        let src_last = width * last_row;
        let len_code_limit = NUM_LITERAL_CODES + NUM_LENGTH_CODES;
        let color_cache_limit = len_code_limit + self.mdata.color_cache_size;
        let mut next_sync_row = if self.incremental { row } else { usize::MAX };
        let mask = self.mdata.huffman_mask;
        let mut group = self.htree_group_for_pos(col, row);
        debug_assert!(src < src_end);
        debug_assert!(last_row <= height);

        while src < src_last {
            if row >= next_sync_row {
                self.save_state(src);
                next_sync_row = row + SYNC_EVERY_N_ROWS;
            }
            // Only refresh the tree group when crossing a tile edge.
            if col & mask == 0 {
                group = self.htree_group_for_pos(col, row);
            }
            self.br.fill_bit_window();
            let code = read_symbol(&self.mdata.huffman_tables, group.htrees[GREEN], &mut self.br) as usize;
            if self.br.eos() {
                break;
            }
            if code < NUM_LITERAL_CODES {
                if group.is_trivial_literal {
                    data[src] = group.literal_arb | ((code as u32) << 8);
                } else {
                    let red = read_symbol(&self.mdata.huffman_tables, group.htrees[RED], &mut self.br);
                    self.br.fill_bit_window();
                    let blue = read_symbol(&self.mdata.huffman_tables, group.htrees[BLUE], &mut self.br);
                    let alpha = read_symbol(&self.mdata.huffman_tables, group.htrees[ALPHA], &mut self.br);
                    if self.br.eos() {
                        break;
                    }
                    data[src] = (alpha << 24) | (red << 16) | ((code as u32) << 8) | blue;
                }
                src += 1;
                col += 1;
                if col >= width {
                    col = 0;
                    row += 1;
                    if row % NUM_ARGB_CACHE_ROWS == 0 {
                        self.process_rows(row, data, sink, stop)?;
                    }
                    if let Some(cache) = self.mdata.color_cache.as_mut() {
                        while last_cached < src {
                            cache.insert(data[last_cached]);
                            last_cached += 1;
                        }
                    }
                }
            } else if code < len_code_limit {
                let length_sym = code - NUM_LITERAL_CODES;
                let length = self.get_copy_length(length_sym);
                let dist_symbol = read_symbol(&self.mdata.huffman_tables, group.htrees[DIST], &mut self.br) as usize;
                self.br.fill_bit_window();
                let dist_code = self.get_copy_distance(dist_symbol);
                let dist = plane_code_to_distance(width, dist_code);
                if self.br.eos() {
                    break;
                }
                if src < dist || src_end - src < length {
                    return Err(Vp8lError::InvalidBitstream("back-reference out of range"));
                }
                copy_block_32b(data, src, dist, length);
                src += length;
                col += length;
                while col >= width {
                    col -= width;
                    row += 1;
                    if row % NUM_ARGB_CACHE_ROWS == 0 {
                        self.process_rows(row, data, sink, stop)?;
                    }
                }
                if col & mask != 0 {
                    group = self.htree_group_for_pos(col, row);
                }
                if let Some(cache) = self.mdata.color_cache.as_mut() {
                    while last_cached < src {
                        cache.insert(data[last_cached]);
                        last_cached += 1;
                    }
                }
            } else if code < color_cache_limit {
                let key = code - len_code_limit;
                let pixel = match self.mdata.color_cache.as_mut() {
                    Some(cache) => {
                        while last_cached < src {
                            cache.insert(data[last_cached]);
                            last_cached += 1;
                        }
                        cache.lookup(key)
                    }
                    None => return Err(Vp8lError::InvalidBitstream("cache symbol without color cache")),
                };
                data[src] = pixel;
                src += 1;
                col += 1;
                if col >= width {
                    col = 0;
                    row += 1;
                    if row % NUM_ARGB_CACHE_ROWS == 0 {
                        self.process_rows(row, data, sink, stop)?;
                    }
                    if let Some(cache) = self.mdata.color_cache.as_mut() {
                        while last_cached < src {
                            cache.insert(data[last_cached]);
                            last_cached += 1;
                        }
                    }
                }
            } else {
                return Err(Vp8lError::InvalidBitstream("unreachable symbol"));
            }
        }

        if self.incremental && self.br.eos() && src < src_end {
            self.restore_state();
            Err(Vp8lError::UnexpectedEof)
        } else if !self.br.eos() {
            // Flush the rows of the final partial block.
            self.process_rows(row, data, sink, stop)?;
            self.last_pixel = src;
            Ok(())
        } else {
            Err(Vp8lError::UnexpectedEof)
        }
    }

    // ── Row-block processing ────────────────────────────────────────

    fn process_rows(
        &mut self,
        row: usize,
        data: &[u32],
        sink: &mut RowSink<'_, '_>,
        stop: &dyn Stop,
    ) -> Result<(), Vp8lError> {
        match sink {
            RowSink::Discard => Ok(()),
            RowSink::Output(out) => self.process_rows_output(row, data, out, stop),
            RowSink::AlphaPlane(plane) => {
                stop.check()?;
                self.extract_alpha_rows(row, data, plane);
                Ok(())
            }
        }
    }

    /// Inverse transforms, crop, optional rescale and colour-convert
    /// the rows decoded since the previous block.
    fn process_rows_output(
        &mut self,
        row: usize,
        data: &[u32],
        out: &mut PixelSink<'_>,
        stop: &dyn Stop,
    ) -> Result<(), Vp8lError> {
        let num_rows = row - self.last_row;
        if num_rows == 0 {
            return Ok(());
        }
        stop.check()?;

        let rows_in = &data[self.width * self.last_row..self.width * row];
        let band_base = self.final_width;
        apply_inverse_transforms(&self.transforms, self.last_row, row, rows_in, &mut self.argb_cache, band_base);

        if let Some(skip_rows) = self.io.set_crop_window(self.last_row, row) {
            let io_w = self.io.width;
            let mb_w = self.io.mb_w;
            let mb_h = self.io.mb_h;
            let band_start = band_base + skip_rows * io_w + self.io.crop_left;
            match out {
                PixelSink::Rgba(rgba) => {
                    let bpp = rgba.colorspace.bytes_per_pixel();
                    if let Some(rescaler) = self.rescaler.as_mut() {
                        for r in 0..mb_h {
                            let src_row = &self.argb_cache[band_start + r * io_w..band_start + r * io_w + mb_w];
                            rescaler.import_row(src_row);
                            while let Some(out_row) = rescaler.export_row() {
                                let off = self.last_out_row * rgba.stride;
                                convert_from_bgra(&out_row, rgba.colorspace, &mut rgba.buf[off..off + out_row.len() * bpp]);
                                self.last_out_row += 1;
                            }
                        }
                    } else {
                        for r in 0..mb_h {
                            let src_row = &self.argb_cache[band_start + r * io_w..band_start + r * io_w + mb_w];
                            let off = self.last_out_row * rgba.stride;
                            convert_from_bgra(src_row, rgba.colorspace, &mut rgba.buf[off..off + mb_w * bpp]);
                            self.last_out_row += 1;
                        }
                    }
                }
                PixelSink::Yuva(yuva) => {
                    if let Some(rescaler) = self.rescaler.as_mut() {
                        for r in 0..mb_h {
                            let src_row = &self.argb_cache[band_start + r * io_w..band_start + r * io_w + mb_w];
                            rescaler.import_row(src_row);
                            while let Some(out_row) = rescaler.export_row() {
                                convert_to_yuva(&out_row, self.last_out_row, yuva);
                                self.last_out_row += 1;
                            }
                        }
                    } else {
                        for r in 0..mb_h {
                            let src_row = &self.argb_cache[band_start + r * io_w..band_start + r * io_w + mb_w];
                            convert_to_yuva(src_row, self.last_out_row, yuva);
                            self.last_out_row += 1;
                        }
                    }
                }
            }
        }

        self.last_row = row;
        debug_assert!(self.last_row <= self.io_height);
        Ok(())
    }

    /// Alpha is carried in the green channel once the transforms have
    /// been undone.
    fn extract_alpha_rows(&mut self, row: usize, data: &[u32], plane: &mut [u8]) {
        let num_rows = row - self.last_row;
        if num_rows == 0 {
            return;
        }
        let rows_in = &data[self.width * self.last_row..self.width * row];
        let band_base = self.final_width;
        apply_inverse_transforms(&self.transforms, self.last_row, row, rows_in, &mut self.argb_cache, band_base);

        let width = self.io_width;
        let dst_off = width * self.last_row;
        let band = &self.argb_cache[band_base..band_base + width * num_rows];
        for (dst, &px) in plane[dst_off..dst_off + band.len()].iter_mut().zip(band.iter()) {
            *dst = (px >> 8) as u8;
        }
        self.last_row = row;
        self.last_out_row = row;
    }

    // ── Paletted-alpha fast path ────────────────────────────────────

    /// True when every group's red, blue and alpha trees are single
    /// symbols and there is no colour cache, so literals fit in one
    /// byte.
    pub(crate) fn is_8b_optimizable(&self) -> bool {
        if self.mdata.color_cache_size > 0 {
            return false;
        }
        for group in &self.mdata.htree_groups {
            for &j in &[RED, BLUE, ALPHA] {
                if self.mdata.huffman_tables[group.htrees[j]].bits > 0 {
                    return false;
                }
            }
        }
        true
    }

    pub(crate) fn extract_paletted_alpha_rows(&mut self, row: usize, data8: &[u8], plane: &mut [u8]) {
        let num_rows = row - self.last_row;
        if num_rows > 0 {
            let rows_in = &data8[self.width * self.last_row..self.width * row];
            let dst = &mut plane[self.io_width * self.last_row..];
            crate::transform::color_index_inverse_alpha(&self.transforms[0], self.last_row, row, rows_in, dst);
        }
        self.last_row = row;
        self.last_out_row = row;
    }

    /// Byte-per-pixel LZ77 loop: literals store the green-channel code
    /// directly and the colour-indexing inverse runs straight into the
    /// caller's alpha plane.
    pub(crate) fn decode_alpha_data_8b(
        &mut self,
        data: &mut [u8],
        width: usize,
        height: usize,
        last_row: usize,
        plane: &mut [u8],
        stop: &dyn Stop,
    ) -> Result<(), Vp8lError> {
        let mut row = self.last_pixel / width;
        let mut col = self.last_pixel % width;
        let mut pos = self.last_pixel;
        let end = width * height;
        let last = width * last_row;
        let len_code_limit = NUM_LITERAL_CODES + NUM_LENGTH_CODES;
        let mask = self.mdata.huffman_mask;
        let mut group = self.htree_group_for_pos(col, row);
        debug_assert!(pos < end);
        debug_assert!(last_row <= height);
        debug_assert!(self.is_8b_optimizable());

        let mut ok = true;
        while !self.br.eos() && pos < last {
            if col & mask == 0 {
                group = self.htree_group_for_pos(col, row);
            }
            self.br.fill_bit_window();
            let code = read_symbol(&self.mdata.huffman_tables, group.htrees[GREEN], &mut self.br) as usize;
            if code < NUM_LITERAL_CODES {
                data[pos] = code as u8;
                pos += 1;
                col += 1;
                if col >= width {
                    col = 0;
                    row += 1;
                    if row % NUM_ARGB_CACHE_ROWS == 0 {
                        stop.check()?;
                        self.extract_paletted_alpha_rows(row, data, plane);
                    }
                }
            } else if code < len_code_limit {
                let length_sym = code - NUM_LITERAL_CODES;
                let length = self.get_copy_length(length_sym);
                let dist_symbol = read_symbol(&self.mdata.huffman_tables, group.htrees[DIST], &mut self.br) as usize;
                self.br.fill_bit_window();
                let dist_code = self.get_copy_distance(dist_symbol);
                let dist = plane_code_to_distance(width, dist_code);
                if pos >= dist && end - pos >= length {
                    copy_block_8b(data, pos, dist, length);
                } else {
                    ok = false;
                    break;
                }
                pos += length;
                col += length;
                while col >= width {
                    col -= width;
                    row += 1;
                    if row % NUM_ARGB_CACHE_ROWS == 0 {
                        stop.check()?;
                        self.extract_paletted_alpha_rows(row, data, plane);
                    }
                }
                if pos < last && col & mask != 0 {
                    group = self.htree_group_for_pos(col, row);
                }
            } else {
                ok = false;
                break;
            }
        }
        if ok {
            // Flush the rows of the final partial block.
            self.extract_paletted_alpha_rows(row, data, plane);
        }

        if !ok || (self.br.eos() && pos < end) {
            Err(if self.br.eos() {
                Vp8lError::UnexpectedEof
            } else {
                Vp8lError::InvalidBitstream("invalid alpha data")
            })
        } else {
            self.last_pixel = pos;
            Ok(())
        }
    }

    // ── Buffers and the public image decode ─────────────────────────

    pub(crate) fn allocate_internal_buffers_32b(&mut self, final_width: usize) -> Result<(), Vp8lError> {
        let num_pixels = self.width * self.height;
        // One scratch row holds the top-prediction context between
        // row blocks.
        let cache_pixels = final_width * (NUM_ARGB_CACHE_ROWS + 1);
        self.limits.check_memory((num_pixels + cache_pixels) * 4)?;
        self.pixels = vec![0u32; num_pixels];
        self.argb_cache = vec![0u32; cache_pixels];
        self.final_width = final_width;
        Ok(())
    }

    pub(crate) fn allocate_internal_buffers_8b(&mut self) -> Result<(), Vp8lError> {
        let total = self.width * self.height;
        self.limits.check_memory(total)?;
        self.pixels8 = vec![0u8; total];
        Ok(())
    }

    fn validate_sink(&self, sink: &PixelSink<'_>) -> Result<(), Vp8lError> {
        let (out_w, out_h) = self.io.output_size();
        match sink {
            PixelSink::Rgba(rgba) => {
                let needed = (out_h - 1) * rgba.stride + out_w * rgba.colorspace.bytes_per_pixel();
                if rgba.buf.len() < needed {
                    return Err(Vp8lError::BufferTooSmall { needed, actual: rgba.buf.len() });
                }
            }
            PixelSink::Yuva(yuva) => {
                let uv_w = (out_w + 1) / 2;
                let uv_h = (out_h + 1) / 2;
                let y_needed = (out_h - 1) * yuva.y_stride + out_w;
                if yuva.y.len() < y_needed {
                    return Err(Vp8lError::BufferTooSmall { needed: y_needed, actual: yuva.y.len() });
                }
                let u_needed = (uv_h - 1) * yuva.u_stride + uv_w;
                if yuva.u.len() < u_needed {
                    return Err(Vp8lError::BufferTooSmall { needed: u_needed, actual: yuva.u.len() });
                }
                let v_needed = (uv_h - 1) * yuva.v_stride + uv_w;
                if yuva.v.len() < v_needed {
                    return Err(Vp8lError::BufferTooSmall { needed: v_needed, actual: yuva.v.len() });
                }
                if let Some(a) = yuva.a.as_deref() {
                    let a_needed = (out_h - 1) * yuva.a_stride + out_w;
                    if a.len() < a_needed {
                        return Err(Vp8lError::BufferTooSmall { needed: a_needed, actual: a.len() });
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the main pixel loop and emit rows into `sink`. Requires a
    /// successful [`decode_header`](Self::decode_header) first. In
    /// incremental mode an input underrun reports
    /// [`StreamStatus::Suspended`]; extend the data with
    /// [`set_data`](Self::set_data) and call again.
    pub fn decode_image(
        &mut self,
        options: &DecodeOptions,
        sink: &mut PixelSink<'_>,
        stop: &dyn Stop,
    ) -> Result<StreamStatus, Vp8lError> {
        match self.decode_image_inner(options, sink, stop) {
            Ok(()) => Ok(StreamStatus::Complete),
            Err(Vp8lError::UnexpectedEof) if self.incremental => Ok(StreamStatus::Suspended),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn decode_image_inner(
        &mut self,
        options: &DecodeOptions,
        sink: &mut PixelSink<'_>,
        stop: &dyn Stop,
    ) -> Result<(), Vp8lError> {
        if self.state == DecodeState::ReadDim {
            return Err(Vp8lError::InvalidParameter("header not decoded".into()));
        }

        if self.state != DecodeState::ReadData {
            self.io = IoWindow::from_options(self.io_width, self.io_height, options)?;
            self.validate_sink(sink)?;
            self.allocate_internal_buffers_32b(self.io_width)?;
            if self.io.use_scaling {
                let (out_w, out_h) = self.io.output_size();
                // Scratch rows inside the rescaler.
                self.limits.check_memory(out_w * 4 * 6)?;
                self.rescaler = Some(Rescaler::new(self.io.crop_width(), self.io.crop_height(), out_w, out_h));
            }
            if self.incremental && self.mdata.color_cache_size > 0 && self.mdata.saved_color_cache.is_none() {
                self.mdata.saved_color_cache = Some(ColorCache::new(self.mdata.color_cache_bits));
            }
            self.state = DecodeState::ReadData;
        }

        if self.last_pixel == self.width * self.height {
            return Ok(());
        }

        let mut pixels = core::mem::take(&mut self.pixels);
        let width = self.width;
        let height = self.height;
        let mut row_sink = RowSink::Output(sink);
        let result = self.decode_image_data_32(&mut pixels, width, height, height, &mut row_sink, stop);
        self.pixels = pixels;
        result
    }
}
