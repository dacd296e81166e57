mod impact;
mod norms;
mod reader;
mod skip;
mod term_state;
mod writer;

use bytemuck::{Pod, Zeroable};

use crate::error::{CodecError, Result};

pub use impact::{CompetitiveImpactAccumulator, Impact};
pub use norms::{NoNorms, NormsRead};
pub use reader::{BlockDocsReader, BlockPositionsReader, BlockPostingsReader, PositionEntry};
pub use skip::{read_skip_blocks, BlockSkipWriter, SkipEntry, SkipWrite};
pub use term_state::{TermState, TermStateDecoder, TermStateEncoder};
pub use writer::{PostingsOutputs, PostingsWriter};

pub use crate::algorithm::BLOCK_SIZE;

bitflags::bitflags! {
    /// What a field records for each of its postings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IndexFeatures: u8 {
        const FREQS = 1 << 0;
        const POSITIONS = 1 << 1;
        const PAYLOADS = 1 << 2;
        const OFFSETS = 1 << 3;
    }
}

impl IndexFeatures {
    /// Rejects combinations whose data would have nowhere to go.
    pub fn validate(self) -> Result<Self> {
        if self.contains(Self::POSITIONS) && !self.contains(Self::FREQS) {
            return Err(CodecError::InvalidFeatures(
                "positions require freqs".to_string(),
            ));
        }
        if self.intersects(Self::PAYLOADS | Self::OFFSETS) && !self.contains(Self::POSITIONS) {
            return Err(CodecError::InvalidFeatures(
                "payloads and offsets require positions".to_string(),
            ));
        }
        Ok(self)
    }

    #[inline]
    pub fn has_freqs(self) -> bool {
        self.contains(Self::FREQS)
    }

    #[inline]
    pub fn has_positions(self) -> bool {
        self.contains(Self::POSITIONS)
    }

    #[inline]
    pub fn has_payloads(self) -> bool {
        self.contains(Self::PAYLOADS)
    }

    #[inline]
    pub fn has_offsets(self) -> bool {
        self.contains(Self::OFFSETS)
    }

    /// Whether anything goes to the payload stream.
    #[inline]
    pub fn has_payloads_or_offsets(self) -> bool {
        self.intersects(Self::PAYLOADS | Self::OFFSETS)
    }
}

/// Skip data for one full block of documents, written for every block that is
/// followed by more documents of the same term.
///
/// `pos_fp` and `pay_fp` point at the position and payload streams right after
/// the block's last document; `pos_buffer_upto` positions (and `payload_byte_upto`
/// payload bytes) of the block were still buffered at that point.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipBlock {
    pub pos_fp: u64,
    pub pay_fp: u64,
    pub min_norm: u64,
    pub last_doc: u32,
    pub doc_count: u32,
    pub pos_buffer_upto: u32,
    pub payload_byte_upto: u32,
    pub max_freq: u32,
    pub reserved: u32,
}

unsafe impl Zeroable for SkipBlock {}
unsafe impl Pod for SkipBlock {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_validate() {
        assert!(IndexFeatures::empty().validate().is_ok());
        assert!(IndexFeatures::FREQS.validate().is_ok());
        assert!(IndexFeatures::all().validate().is_ok());
        assert!(IndexFeatures::POSITIONS.validate().is_err());
        assert!((IndexFeatures::FREQS | IndexFeatures::OFFSETS)
            .validate()
            .is_err());
        assert!((IndexFeatures::FREQS | IndexFeatures::PAYLOADS)
            .validate()
            .is_err());
    }

    #[test]
    fn test_skip_block_layout() {
        assert_eq!(std::mem::size_of::<SkipBlock>(), 48);
        let block = SkipBlock {
            last_doc: 7,
            ..Default::default()
        };
        let bytes: &[u8] = bytemuck::bytes_of(&block);
        assert_eq!(&bytes[24..28], &7u32.to_le_bytes());
    }
}
