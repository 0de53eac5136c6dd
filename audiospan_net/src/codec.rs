//! Fixed-rate block codec seam for the compressed stream variant.
//!
//! The compressed path only needs one contract from its codec: a full period
//! of samples encodes to a block of a fixed, agreed size, and that block
//! decodes back to a full period. The shipped implementation wraps the
//! CELT-family codec of the `opus` crate in its restricted low-delay mode;
//! anything honoring the contract (hardware codecs, test doubles) plugs in
//! the same way.

use crate::Sample;

/// Errors of a block codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec rejected its configuration: {0}")]
    Config(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("codec produced a {got}-byte block, expected {expected}")]
    BlockSize { got: usize, expected: usize },
    #[error("compressed codec support not compiled in")]
    Unsupported,
}

/// A fixed-rate block encoder/decoder pair for one port.
pub trait BlockCodec: Send {
    /// Encodes exactly one period of samples, filling `block` completely.
    fn encode_block(&mut self, samples: &[Sample], block: &mut [u8]) -> Result<(), CodecError>;

    /// Decodes one block into exactly one period of samples.
    fn decode_block(&mut self, block: &[u8], samples: &mut [Sample]) -> Result<(), CodecError>;
}

/// CELT-family codec pair backed by the `opus` crate.
///
/// The bitrate is derived from the block size so that hard CBR fills the
/// reserved block exactly: `block_bytes * 8 * sample_rate / period` bits per
/// second. The period must be a frame size the codec accepts at the session
/// sample rate; others are rejected at construction, which refuses the
/// session before any audio flows.
#[cfg(feature = "opus")]
pub struct OpusBlockCodec {
    encoder: opus::Encoder,
    decoder: opus::Decoder,
}

#[cfg(feature = "opus")]
impl OpusBlockCodec {
    pub fn new(sample_rate: u32, period: u32, block_bytes: usize) -> Result<Self, CodecError> {
        let config = |e: opus::Error| CodecError::Config(e.to_string());

        let mut encoder =
            opus::Encoder::new(sample_rate, opus::Channels::Mono, opus::Application::LowDelay)
                .map_err(config)?;

        let bits_per_second = (block_bytes as u64 * 8)
            .saturating_mul(u64::from(sample_rate))
            .checked_div(u64::from(period))
            .unwrap_or(0);
        let bits_per_second = i32::try_from(bits_per_second)
            .map_err(|_| CodecError::Config(format!("bitrate out of range for {block_bytes}-byte blocks")))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(bits_per_second))
            .map_err(config)?;
        encoder.set_vbr(false).map_err(config)?;

        let decoder = opus::Decoder::new(sample_rate, opus::Channels::Mono).map_err(config)?;

        Ok(Self { encoder, decoder })
    }
}

#[cfg(feature = "opus")]
impl BlockCodec for OpusBlockCodec {
    fn encode_block(&mut self, samples: &[Sample], block: &mut [u8]) -> Result<(), CodecError> {
        let written = self
            .encoder
            .encode_float(samples, block)
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        // hard CBR fills the block exactly; anything else desynchronizes
        // the slice geometry on the receiving side
        if written != block.len() {
            return Err(CodecError::BlockSize {
                got: written,
                expected: block.len(),
            });
        }
        Ok(())
    }

    fn decode_block(&mut self, block: &[u8], samples: &mut [Sample]) -> Result<(), CodecError> {
        let decoded = self
            .decoder
            .decode_float(block, samples, false)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        if decoded != samples.len() {
            return Err(CodecError::Decode(format!(
                "decoded {decoded} samples, expected {}",
                samples.len()
            )));
        }
        Ok(())
    }
}
