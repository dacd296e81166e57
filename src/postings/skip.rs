use super::{CompetitiveImpactAccumulator, IndexFeatures, SkipBlock};
use crate::{
    error::{CodecError, Result},
    store::{DataInput, DataOutput},
};

/// Writer state at the end of a full block of documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipEntry {
    pub last_doc: u32,
    /// Documents of the term up to and including this block.
    pub doc_count: u32,
    pub pos_fp: u64,
    pub pay_fp: u64,
    pub pos_buffer_upto: u32,
    pub payload_byte_upto: u32,
}

/// Receives one entry per full document block and writes them out when the
/// term is done.
pub trait SkipWrite {
    fn set_field(&mut self, features: IndexFeatures);

    /// Called when a new term starts.
    fn reset(&mut self);

    fn buffer_skip(&mut self, entry: SkipEntry, impacts: &CompetitiveImpactAccumulator);

    /// Writes the buffered entries and returns the file pointer they start at.
    fn write_skip<O: DataOutput + ?Sized>(&mut self, out: &mut O) -> Result<u64>;
}

/// Writes skip data as `vint(count)` followed by `count` raw [`SkipBlock`]s.
#[derive(Debug)]
pub struct BlockSkipWriter {
    features: IndexFeatures,
    blocks: Vec<SkipBlock>,
}

impl BlockSkipWriter {
    pub fn new(features: IndexFeatures) -> Self {
        Self {
            features,
            blocks: Vec::new(),
        }
    }
}

impl SkipWrite for BlockSkipWriter {
    fn set_field(&mut self, features: IndexFeatures) {
        self.features = features;
    }

    fn reset(&mut self) {
        self.blocks.clear();
    }

    fn buffer_skip(&mut self, entry: SkipEntry, impacts: &CompetitiveImpactAccumulator) {
        let mut block = SkipBlock {
            last_doc: entry.last_doc,
            doc_count: entry.doc_count,
            max_freq: impacts.max_freq(),
            min_norm: impacts.min_norm(),
            ..Default::default()
        };
        if self.features.has_positions() {
            block.pos_fp = entry.pos_fp;
            block.pos_buffer_upto = entry.pos_buffer_upto;
            if self.features.has_payloads_or_offsets() {
                block.pay_fp = entry.pay_fp;
            }
            if self.features.has_payloads() {
                block.payload_byte_upto = entry.payload_byte_upto;
            }
        }
        self.blocks.push(block);
    }

    fn write_skip<O: DataOutput + ?Sized>(&mut self, out: &mut O) -> Result<u64> {
        let skip_fp = out.file_pointer();
        let count = u32::try_from(self.blocks.len())
            .map_err(|_| CodecError::corruption("too many skip blocks"))?;
        out.write_vint(count)?;
        out.write_bytes(bytemuck::cast_slice(&self.blocks))?;
        Ok(skip_fp)
    }
}

/// Reads skip data written by [`BlockSkipWriter`], holding at most `max_count` blocks.
pub fn read_skip_blocks<I: DataInput + ?Sized>(
    input: &mut I,
    max_count: usize,
) -> Result<Vec<SkipBlock>> {
    let count = input.read_vint()? as usize;
    if count > max_count {
        return Err(CodecError::corruption(format!(
            "{count} skip blocks, expected at most {max_count}"
        )));
    }
    let mut blocks = vec![SkipBlock::default(); count];
    input.read_bytes(bytemuck::cast_slice_mut(&mut blocks))?;
    for pair in blocks.windows(2) {
        if pair[1].last_doc <= pair[0].last_doc || pair[1].doc_count <= pair[0].doc_count {
            return Err(CodecError::corruption("skip blocks out of order"));
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(i: u32) -> SkipEntry {
        SkipEntry {
            last_doc: 1000 * (i + 1),
            doc_count: 128 * (i + 1),
            pos_fp: 10 * u64::from(i),
            pay_fp: 20 * u64::from(i),
            pos_buffer_upto: i,
            payload_byte_upto: 2 * i,
        }
    }

    #[test]
    fn test_write_and_read() {
        let mut writer = BlockSkipWriter::new(IndexFeatures::all());
        let mut impacts = CompetitiveImpactAccumulator::new();
        impacts.add(3, 7);
        impacts.add(1, 2);
        for i in 0..3 {
            writer.buffer_skip(entry(i), &impacts);
        }

        let mut out: Vec<u8> = vec![0xAA; 5];
        let fp = writer.write_skip(&mut out).unwrap();
        assert_eq!(fp, 5);
        assert_eq!(out.len(), 5 + 1 + 3 * std::mem::size_of::<SkipBlock>());

        let blocks = read_skip_blocks(&mut &out[5..], 3).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].last_doc, 3000);
        assert_eq!(blocks[2].doc_count, 384);
        assert_eq!(blocks[2].pos_fp, 20);
        assert_eq!(blocks[2].pay_fp, 40);
        assert_eq!(blocks[2].pos_buffer_upto, 2);
        assert_eq!(blocks[2].payload_byte_upto, 4);
        assert_eq!(blocks[0].max_freq, 3);
        assert_eq!(blocks[0].min_norm, 2);
    }

    #[test]
    fn test_doc_only_field_drops_pointers() {
        let mut writer = BlockSkipWriter::new(IndexFeatures::all());
        writer.set_field(IndexFeatures::FREQS);
        writer.buffer_skip(entry(4), &CompetitiveImpactAccumulator::new());
        let mut out: Vec<u8> = Vec::new();
        writer.write_skip(&mut out).unwrap();
        let blocks = read_skip_blocks(&mut out.as_slice(), 1).unwrap();
        assert_eq!(blocks[0].pos_fp, 0);
        assert_eq!(blocks[0].pay_fp, 0);
        assert_eq!(blocks[0].last_doc, 5000);

        writer.reset();
        let mut out: Vec<u8> = Vec::new();
        writer.write_skip(&mut out).unwrap();
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut writer = BlockSkipWriter::new(IndexFeatures::FREQS);
        let impacts = CompetitiveImpactAccumulator::new();
        writer.buffer_skip(entry(1), &impacts);
        writer.buffer_skip(entry(0), &impacts);
        let mut out: Vec<u8> = Vec::new();
        writer.write_skip(&mut out).unwrap();
        assert!(matches!(
            read_skip_blocks(&mut out.as_slice(), 2),
            Err(CodecError::Corruption(_))
        ));
    }

    #[test]
    fn test_oversized_count_rejected() {
        let bytes = [0xffu8, 0xff, 0xff, 0xff, 0x0f];
        assert!(matches!(
            read_skip_blocks(&mut &bytes[..], 7),
            Err(CodecError::Corruption(_))
        ));

        // a count within bounds still needs the blocks behind it
        let bytes = [2u8, 0, 0];
        assert!(matches!(
            read_skip_blocks(&mut &bytes[..], 2),
            Err(CodecError::UnexpectedEof { .. })
        ));

        let mut writer = BlockSkipWriter::new(IndexFeatures::FREQS);
        let impacts = CompetitiveImpactAccumulator::new();
        writer.buffer_skip(entry(0), &impacts);
        writer.buffer_skip(entry(1), &impacts);
        let mut out: Vec<u8> = Vec::new();
        writer.write_skip(&mut out).unwrap();
        assert!(read_skip_blocks(&mut out.as_slice(), 1).is_err());
        assert_eq!(read_skip_blocks(&mut out.as_slice(), 2).unwrap().len(), 2);
    }
}
