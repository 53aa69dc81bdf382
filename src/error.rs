use alloc::string::String;
use enough::StopReason;

/// Errors from VP8L decoding.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Vp8lError {
    #[error("invalid lossless signature: {0:#04x}")]
    SignatureInvalid(u8),

    #[error("invalid lossless version number: {0}")]
    VersionInvalid(u8),

    #[error("invalid color cache bits: {0}")]
    InvalidColorCacheBits(u32),

    /// Structural violation in the compressed stream: over- or
    /// under-subscribed Huffman code, duplicate transform, unreachable
    /// symbol, out-of-range back-reference, and similar.
    #[error("corrupt bitstream: {0}")]
    InvalidBitstream(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("output buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("operation cancelled")]
    Cancelled(StopReason),
}

impl From<StopReason> for Vp8lError {
    fn from(r: StopReason) -> Self {
        Vp8lError::Cancelled(r)
    }
}
