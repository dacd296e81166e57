use log::trace;

use super::{read_skip_blocks, IndexFeatures, SkipBlock, TermState, BLOCK_SIZE};
use crate::{
    algorithm::PForUtil,
    error::{CodecError, Result},
    store::DataInput,
};

fn slice_from(data: &[u8], fp: u64) -> Result<&[u8]> {
    usize::try_from(fp)
        .ok()
        .and_then(|fp| data.get(fp..))
        .ok_or(CodecError::UnexpectedEof {
            needed: fp as usize,
            remaining: data.len(),
        })
}

fn to_doc_id(value: u64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| CodecError::corruption(format!("doc id {value} out of range")))
}

/// Iterates the documents and freqs of one term.
pub struct BlockDocsReader<'a> {
    input: &'a [u8],
    has_freqs: bool,
    pfor: PForUtil,
    skip_blocks: Vec<SkipBlock>,

    doc_freq: u32,
    total_term_freq: u64,
    singleton_doc_id: Option<u32>,

    doc_buffer: [u64; BLOCK_SIZE],
    freq_buffer: [u64; BLOCK_SIZE],
    buffer_upto: usize,
    buffer_len: usize,
    // documents loaded or skipped so far
    doc_upto: u32,
    // last document before the buffer
    accum: u64,

    doc: u32,
    freq: u32,
}

impl<'a> BlockDocsReader<'a> {
    /// `doc_data` is the whole doc stream; the term starts at `state.doc_start_fp`.
    pub fn new(doc_data: &'a [u8], features: IndexFeatures, state: &TermState) -> Result<Self> {
        let features = features.validate()?;
        if state.doc_freq == 0 {
            return Err(CodecError::corruption("term has no documents"));
        }
        if (state.doc_freq == 1) != state.singleton_doc_id.is_some() {
            return Err(CodecError::corruption(format!(
                "doc freq {} does not match singleton {:?}",
                state.doc_freq, state.singleton_doc_id
            )));
        }

        let input: &[u8] = if state.singleton_doc_id.is_some() {
            &[]
        } else {
            slice_from(doc_data, state.doc_start_fp)?
        };
        let skip_blocks = match state.skip_offset {
            Some(offset) => {
                let mut skip_input = slice_from(doc_data, state.doc_start_fp + offset)?;
                read_skip_blocks(&mut skip_input, (state.doc_freq as usize - 1) / BLOCK_SIZE)?
            }
            None => Vec::new(),
        };

        Ok(Self {
            input,
            has_freqs: features.has_freqs(),
            pfor: PForUtil::new(),
            skip_blocks,
            doc_freq: state.doc_freq,
            total_term_freq: state.total_term_freq,
            singleton_doc_id: state.singleton_doc_id,
            doc_buffer: [0; BLOCK_SIZE],
            freq_buffer: [0; BLOCK_SIZE],
            buffer_upto: 0,
            buffer_len: 0,
            doc_upto: 0,
            accum: 0,
            doc: 0,
            freq: 0,
        })
    }

    fn refill(&mut self) -> Result<()> {
        let left = (self.doc_freq - self.doc_upto) as usize;
        if left >= BLOCK_SIZE {
            self.pfor
                .decode_and_prefix_sum(&mut self.input, self.accum, &mut self.doc_buffer)?;
            to_doc_id(self.doc_buffer[BLOCK_SIZE - 1])?;
            if self.has_freqs {
                self.pfor.decode(&mut self.input, &mut self.freq_buffer)?;
            } else {
                self.freq_buffer.fill(1);
            }
            self.buffer_len = BLOCK_SIZE;
        } else if let Some(doc) = self.singleton_doc_id {
            self.doc_buffer[0] = u64::from(doc);
            self.freq_buffer[0] = self.total_term_freq;
            self.buffer_len = 1;
        } else {
            let mut doc = self.accum;
            for i in 0..left {
                let freq = if self.has_freqs {
                    let code = self.input.read_vlong()?;
                    doc += code >> 1;
                    if code & 1 != 0 {
                        1
                    } else {
                        self.input.read_vint()?
                    }
                } else {
                    doc += u64::from(self.input.read_vint()?);
                    1
                };
                to_doc_id(doc)?;
                self.doc_buffer[i] = doc;
                self.freq_buffer[i] = u64::from(freq);
            }
            self.buffer_len = left;
        }
        self.accum = self.doc_buffer[self.buffer_len - 1];
        self.doc_upto += self.buffer_len as u32;
        self.buffer_upto = 0;
        Ok(())
    }

    /// Moves to the next document, or returns `None` once the term is exhausted.
    pub fn next_doc(&mut self) -> Result<Option<u32>> {
        if self.buffer_upto == self.buffer_len {
            if self.doc_upto == self.doc_freq {
                return Ok(None);
            }
            self.refill()?;
        }
        self.doc = self.doc_buffer[self.buffer_upto] as u32;
        self.freq = u32::try_from(self.freq_buffer[self.buffer_upto])
            .map_err(|_| CodecError::corruption("term freq out of range"))?;
        self.buffer_upto += 1;
        Ok(Some(self.doc))
    }

    /// The skip entry of the next block when that whole block lies before `target`.
    /// Only available between blocks.
    pub fn pending_skip(&self, target: u32) -> Option<SkipBlock> {
        if self.buffer_upto < self.buffer_len {
            return None;
        }
        let block = self.skip_blocks.get(self.doc_upto as usize / BLOCK_SIZE)?;
        (block.last_doc < target).then_some(*block)
    }

    /// Jumps over the next block without decoding it.
    pub fn skip_block(&mut self, entry: &SkipBlock) -> Result<()> {
        if self.buffer_upto < self.buffer_len
            || u64::from(entry.doc_count) != u64::from(self.doc_upto) + BLOCK_SIZE as u64
        {
            return Err(CodecError::corruption(format!(
                "skip entry for {} docs does not match the next block after {} docs",
                entry.doc_count, self.doc_upto
            )));
        }
        self.pfor.skip(&mut self.input)?;
        if self.has_freqs {
            self.pfor.skip(&mut self.input)?;
        }
        trace!("skipped doc block ending at doc {}", entry.last_doc);
        self.doc_upto = entry.doc_count;
        self.accum = u64::from(entry.last_doc);
        self.doc = entry.last_doc;
        Ok(())
    }

    /// Moves to the first document at or after `target`, always past the current one.
    pub fn advance(&mut self, target: u32) -> Result<Option<u32>> {
        loop {
            while let Some(entry) = self.pending_skip(target) {
                self.skip_block(&entry)?;
            }
            match self.next_doc()? {
                Some(doc) if doc < target => {}
                other => return Ok(other),
            }
        }
    }

    pub fn doc(&self) -> u32 {
        self.doc
    }

    /// 1 when the field does not index freqs.
    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    pub fn skip_blocks(&self) -> &[SkipBlock] {
        &self.skip_blocks
    }
}

/// One occurrence of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionEntry<'a> {
    pub position: u32,
    /// Start and end offset, when the field indexes offsets.
    pub offsets: Option<(u32, u32)>,
    pub payload: Option<&'a [u8]>,
}

/// Iterates the positions of one term across its documents. The caller says
/// where documents begin, see [`BlockPostingsReader`].
pub struct BlockPositionsReader<'a> {
    pos_data: &'a [u8],
    pay_data: &'a [u8],
    pos_input: &'a [u8],
    pay_input: &'a [u8],
    features: IndexFeatures,
    pfor: PForUtil,

    total_term_freq: u64,
    // where the tail starts, if there is one
    last_pos_block_fp: Option<u64>,

    pos_delta_buffer: [u64; BLOCK_SIZE],
    payload_length_buffer: [u64; BLOCK_SIZE],
    offset_start_delta_buffer: [u64; BLOCK_SIZE],
    offset_length_buffer: [u64; BLOCK_SIZE],
    payload_bytes: Vec<u8>,
    buffer_upto: usize,
    buffer_len: usize,
    payload_byte_upto: usize,
    pending_skip: u64,

    position: u32,
    last_start_offset: u32,
}

impl<'a> BlockPositionsReader<'a> {
    /// `pay_data` may be empty when the field has neither payloads nor offsets.
    pub fn new(
        pos_data: &'a [u8],
        pay_data: &'a [u8],
        features: IndexFeatures,
        state: &TermState,
    ) -> Result<Self> {
        let features = features.validate()?;
        if !features.has_positions() {
            return Err(CodecError::InvalidFeatures(
                "field does not index positions".to_string(),
            ));
        }
        let ttf = state.total_term_freq;
        let last_pos_block_fp = if ttf < BLOCK_SIZE as u64 {
            Some(state.pos_start_fp)
        } else if ttf == BLOCK_SIZE as u64 {
            None
        } else {
            let offset = state.last_pos_block_offset.ok_or_else(|| {
                CodecError::corruption(format!("missing position tail offset for {ttf} positions"))
            })?;
            Some(state.pos_start_fp + offset)
        };
        let pay_input: &[u8] = if features.has_payloads_or_offsets() {
            slice_from(pay_data, state.pay_start_fp)?
        } else {
            &[]
        };

        Ok(Self {
            pos_data,
            pay_data,
            pos_input: slice_from(pos_data, state.pos_start_fp)?,
            pay_input,
            features,
            pfor: PForUtil::new(),
            total_term_freq: ttf,
            last_pos_block_fp,
            pos_delta_buffer: [0; BLOCK_SIZE],
            payload_length_buffer: [0; BLOCK_SIZE],
            offset_start_delta_buffer: [0; BLOCK_SIZE],
            offset_length_buffer: [0; BLOCK_SIZE],
            payload_bytes: Vec::new(),
            buffer_upto: 0,
            buffer_len: 0,
            payload_byte_upto: 0,
            pending_skip: 0,
            position: 0,
            last_start_offset: 0,
        })
    }

    fn pos_fp(&self) -> u64 {
        (self.pos_data.len() - self.pos_input.len()) as u64
    }

    fn refill(&mut self) -> Result<()> {
        if Some(self.pos_fp()) == self.last_pos_block_fp {
            self.refill_tail()?;
        } else {
            self.refill_block()?;
        }
        self.buffer_upto = 0;
        self.payload_byte_upto = 0;
        Ok(())
    }

    fn refill_block(&mut self) -> Result<()> {
        self.pfor
            .decode(&mut self.pos_input, &mut self.pos_delta_buffer)?;
        if self.features.has_payloads() {
            self.pfor
                .decode(&mut self.pay_input, &mut self.payload_length_buffer)?;
            let byte_count = self.pay_input.read_vint()? as usize;
            self.payload_bytes.resize(byte_count, 0);
            self.pay_input.read_bytes(&mut self.payload_bytes)?;
        }
        if self.features.has_offsets() {
            self.pfor
                .decode(&mut self.pay_input, &mut self.offset_start_delta_buffer)?;
            self.pfor
                .decode(&mut self.pay_input, &mut self.offset_length_buffer)?;
        }
        self.buffer_len = BLOCK_SIZE;
        Ok(())
    }

    fn refill_tail(&mut self) -> Result<()> {
        let count = (self.total_term_freq % BLOCK_SIZE as u64) as usize;
        if count == 0 {
            return Err(CodecError::corruption("read past the last position"));
        }
        let has_payloads = self.features.has_payloads();
        let has_offsets = self.features.has_offsets();
        self.payload_bytes.clear();
        let mut payload_length = 0;
        let mut offset_length = 0;
        for i in 0..count {
            if has_payloads {
                let code = self.pos_input.read_vlong()?;
                self.pos_delta_buffer[i] = code >> 1;
                if code & 1 != 0 {
                    payload_length = self.pos_input.read_vint()?;
                }
                self.payload_length_buffer[i] = u64::from(payload_length);
                if payload_length != 0 {
                    let start = self.payload_bytes.len();
                    self.payload_bytes.resize(start + payload_length as usize, 0);
                    self.pos_input.read_bytes(&mut self.payload_bytes[start..])?;
                }
            } else {
                self.pos_delta_buffer[i] = u64::from(self.pos_input.read_vint()?);
            }

            if has_offsets {
                let code = self.pos_input.read_vlong()?;
                self.offset_start_delta_buffer[i] = code >> 1;
                if code & 1 != 0 {
                    offset_length = self.pos_input.read_vint()?;
                }
                self.offset_length_buffer[i] = u64::from(offset_length);
            }
        }
        self.buffer_len = count;
        Ok(())
    }

    fn skip_pending(&mut self) -> Result<()> {
        while self.pending_skip > 0 {
            if self.buffer_upto == self.buffer_len {
                self.refill()?;
            }
            let n = (self.buffer_len - self.buffer_upto).min(self.pending_skip as usize);
            if self.features.has_payloads() {
                let bytes: u64 = self.payload_length_buffer[self.buffer_upto..self.buffer_upto + n]
                    .iter()
                    .sum();
                self.payload_byte_upto += bytes as usize;
            }
            self.buffer_upto += n;
            self.pending_skip -= n as u64;
        }
        Ok(())
    }

    /// Resets the per-document deltas. Call before the first position of every document.
    pub fn start_doc(&mut self) {
        self.position = 0;
        self.last_start_offset = 0;
    }

    /// Drops the next `count` positions without reading them. Only whole documents
    /// can be dropped since deltas are not accumulated.
    pub fn skip_positions(&mut self, count: u32) {
        self.pending_skip += u64::from(count);
    }

    /// Continues right after the block of documents `entry` describes.
    pub fn seek(&mut self, entry: &SkipBlock) -> Result<()> {
        self.pos_input = slice_from(self.pos_data, entry.pos_fp)?;
        if self.features.has_payloads_or_offsets() {
            self.pay_input = slice_from(self.pay_data, entry.pay_fp)?;
        }
        self.buffer_upto = 0;
        self.buffer_len = 0;
        self.payload_byte_upto = 0;
        // positions of the skipped documents still buffered by the writer
        self.pending_skip = u64::from(entry.pos_buffer_upto);
        Ok(())
    }

    pub fn next_position(&mut self) -> Result<PositionEntry<'_>> {
        self.skip_pending()?;
        if self.buffer_upto == self.buffer_len {
            self.refill()?;
        }
        let i = self.buffer_upto;
        self.buffer_upto += 1;

        self.position = u32::try_from(u64::from(self.position) + self.pos_delta_buffer[i])
            .map_err(|_| CodecError::corruption("position out of range"))?;

        let offsets = if self.features.has_offsets() {
            let start = u64::from(self.last_start_offset) + self.offset_start_delta_buffer[i];
            let end = start + self.offset_length_buffer[i];
            let (start, end) = u32::try_from(start)
                .ok()
                .zip(u32::try_from(end).ok())
                .ok_or_else(|| CodecError::corruption("offset out of range"))?;
            self.last_start_offset = start;
            Some((start, end))
        } else {
            None
        };

        let payload_length = if self.features.has_payloads() {
            self.payload_length_buffer[i] as usize
        } else {
            0
        };
        let payload = if payload_length > 0 {
            let start = self.payload_byte_upto;
            let end = start + payload_length;
            if end > self.payload_bytes.len() {
                return Err(CodecError::corruption(format!(
                    "payload ends at byte {} of {}",
                    end,
                    self.payload_bytes.len()
                )));
            }
            self.payload_byte_upto = end;
            Some(&self.payload_bytes[start..end])
        } else {
            None
        };

        Ok(PositionEntry {
            position: self.position,
            offsets,
            payload,
        })
    }
}

/// Documents of a term together with their positions.
pub struct BlockPostingsReader<'a> {
    docs: BlockDocsReader<'a>,
    positions: Option<BlockPositionsReader<'a>>,
    // positions of the current document not read yet
    pos_left_in_doc: u32,
}

impl<'a> BlockPostingsReader<'a> {
    /// The position and payload streams are only needed when `features` use them.
    pub fn new(
        doc_data: &'a [u8],
        pos_data: Option<&'a [u8]>,
        pay_data: Option<&'a [u8]>,
        features: IndexFeatures,
        state: &TermState,
    ) -> Result<Self> {
        let docs = BlockDocsReader::new(doc_data, features, state)?;
        let positions = if features.has_positions() {
            let pos_data = pos_data.ok_or_else(|| {
                CodecError::InvalidFeatures(
                    "positions are indexed but there is no position stream".to_string(),
                )
            })?;
            let pay_data: &[u8] = match pay_data {
                Some(pay_data) => pay_data,
                None if features.has_payloads_or_offsets() => {
                    return Err(CodecError::InvalidFeatures(
                        "payloads or offsets are indexed but there is no payload stream"
                            .to_string(),
                    ))
                }
                None => &[],
            };
            Some(BlockPositionsReader::new(pos_data, pay_data, features, state)?)
        } else {
            None
        };
        Ok(Self {
            docs,
            positions,
            pos_left_in_doc: 0,
        })
    }

    fn on_doc(&mut self, doc: Option<u32>) -> Option<u32> {
        if let (Some(_), Some(positions)) = (doc, self.positions.as_mut()) {
            positions.skip_positions(self.pos_left_in_doc);
            positions.start_doc();
            self.pos_left_in_doc = self.docs.freq();
        }
        doc
    }

    pub fn next_doc(&mut self) -> Result<Option<u32>> {
        let doc = self.docs.next_doc()?;
        Ok(self.on_doc(doc))
    }

    /// Moves to the first document at or after `target`, always past the current
    /// one. Whole blocks before `target` are skipped together with their positions.
    pub fn advance(&mut self, target: u32) -> Result<Option<u32>> {
        loop {
            while let Some(entry) = self.docs.pending_skip(target) {
                self.docs.skip_block(&entry)?;
                if let Some(positions) = self.positions.as_mut() {
                    positions.seek(&entry)?;
                }
                self.pos_left_in_doc = 0;
            }
            match self.next_doc()? {
                Some(doc) if doc < target => {}
                other => return Ok(other),
            }
        }
    }

    pub fn doc(&self) -> u32 {
        self.docs.doc()
    }

    pub fn freq(&self) -> u32 {
        self.docs.freq()
    }

    pub fn doc_freq(&self) -> u32 {
        self.docs.doc_freq()
    }

    pub fn skip_blocks(&self) -> &[SkipBlock] {
        self.docs.skip_blocks()
    }

    /// The next position of the current document; at most `freq()` per document.
    pub fn next_position(&mut self) -> Result<PositionEntry<'_>> {
        let positions = self.positions.as_mut().ok_or_else(|| {
            CodecError::InvalidFeatures("field does not index positions".to_string())
        })?;
        if self.pos_left_in_doc == 0 {
            return Err(CodecError::corruption(format!(
                "no positions left in doc {}",
                self.docs.doc()
            )));
        }
        self.pos_left_in_doc -= 1;
        positions.next_position()
    }
}
