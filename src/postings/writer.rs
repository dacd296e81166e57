use log::{debug, trace, warn};
use validator::Validate;

use super::{
    BlockSkipWriter, CompetitiveImpactAccumulator, IndexFeatures, NormsRead, SkipEntry, SkipWrite,
    TermState, BLOCK_SIZE,
};
use crate::{
    algorithm::PForUtil,
    error::{CodecError, Result},
    options::PostingsOption,
    store::DataOutput,
};

// freqs and offsets are packed with at most 31 bits
const MAX_VALUE: u32 = i32::MAX as u32;

/// The streams a [`PostingsWriter`] writes to.
pub struct PostingsOutputs<O> {
    /// Doc deltas, freqs and skip data.
    pub doc_out: O,
    /// Position deltas, plus inline payloads and offsets of the position tail.
    pub pos_out: Option<O>,
    /// Payloads and offsets of full position blocks.
    pub pay_out: Option<O>,
}

/// Writes the postings of one term at a time as blocks of 128 values, with a
/// vint-coded tail for whatever is left when the term ends.
///
/// Per term: [`start_term`](Self::start_term), then for each document
/// [`start_doc`](Self::start_doc), [`add_position`](Self::add_position) per
/// occurrence and [`finish_doc`](Self::finish_doc), and finally
/// [`finish_term`](Self::finish_term).
pub struct PostingsWriter<'a, O: DataOutput, S: SkipWrite = BlockSkipWriter> {
    outputs: PostingsOutputs<O>,
    // what the streams can hold, and what the current field uses
    streams: IndexFeatures,
    field: IndexFeatures,
    max_position: u32,
    payload_buffer_capacity: usize,

    pfor: PForUtil,
    skip_writer: S,
    impacts: CompetitiveImpactAccumulator,
    norms: Option<&'a dyn NormsRead>,

    doc_start_fp: u64,
    pos_start_fp: u64,
    pay_start_fp: u64,

    doc_delta_buffer: [u64; BLOCK_SIZE],
    freq_buffer: [u64; BLOCK_SIZE],
    doc_buffer_upto: usize,

    pos_delta_buffer: [u64; BLOCK_SIZE],
    payload_length_buffer: [u64; BLOCK_SIZE],
    offset_start_delta_buffer: [u64; BLOCK_SIZE],
    offset_length_buffer: [u64; BLOCK_SIZE],
    pos_buffer_upto: usize,
    payload_bytes: Vec<u8>,

    last_block_doc_id: Option<u32>,
    last_block_pos_fp: u64,
    last_block_pay_fp: u64,
    last_block_pos_buffer_upto: usize,
    last_block_payload_byte_upto: usize,

    last_doc_id: u32,
    last_position: u32,
    last_start_offset: u32,
    doc_count: u32,
    total_term_freq: u64,
}

impl<'a, O: DataOutput> PostingsWriter<'a, O, BlockSkipWriter> {
    pub fn new(option: &PostingsOption, outputs: PostingsOutputs<O>) -> Result<Self> {
        let skip_writer = BlockSkipWriter::new(option.index_features()?);
        Self::with_skip_writer(option, outputs, skip_writer)
    }
}

impl<'a, O: DataOutput, S: SkipWrite> PostingsWriter<'a, O, S> {
    /// The option's features decide which streams must be present; fields set
    /// later may use any subset of them.
    pub fn with_skip_writer(
        option: &PostingsOption,
        outputs: PostingsOutputs<O>,
        mut skip_writer: S,
    ) -> Result<Self> {
        option.validate()?;
        let streams = option.index_features()?;
        if streams.has_positions() && outputs.pos_out.is_none() {
            return Err(CodecError::InvalidFeatures(
                "positions are indexed but there is no position stream".to_string(),
            ));
        }
        if streams.has_payloads_or_offsets() && outputs.pay_out.is_none() {
            return Err(CodecError::InvalidFeatures(
                "payloads or offsets are indexed but there is no payload stream".to_string(),
            ));
        }
        skip_writer.set_field(streams);

        Ok(Self {
            outputs,
            streams,
            field: streams,
            max_position: option.max_position,
            payload_buffer_capacity: option.payload_buffer_capacity,
            pfor: PForUtil::new(),
            skip_writer,
            impacts: CompetitiveImpactAccumulator::new(),
            norms: None,
            doc_start_fp: 0,
            pos_start_fp: 0,
            pay_start_fp: 0,
            doc_delta_buffer: [0; BLOCK_SIZE],
            freq_buffer: [0; BLOCK_SIZE],
            doc_buffer_upto: 0,
            pos_delta_buffer: [0; BLOCK_SIZE],
            payload_length_buffer: [0; BLOCK_SIZE],
            offset_start_delta_buffer: [0; BLOCK_SIZE],
            offset_length_buffer: [0; BLOCK_SIZE],
            pos_buffer_upto: 0,
            payload_bytes: Vec::with_capacity(option.payload_buffer_capacity),
            last_block_doc_id: None,
            last_block_pos_fp: 0,
            last_block_pay_fp: 0,
            last_block_pos_buffer_upto: 0,
            last_block_payload_byte_upto: 0,
            last_doc_id: 0,
            last_position: 0,
            last_start_offset: 0,
            doc_count: 0,
            total_term_freq: 0,
        })
    }

    /// Switches to another field. Its features must fit the streams this writer
    /// was built with.
    pub fn set_field(
        &mut self,
        features: IndexFeatures,
        norms: Option<&'a dyn NormsRead>,
    ) -> Result<()> {
        let features = features.validate()?;
        if !self.streams.contains(features) {
            return Err(CodecError::InvalidFeatures(format!(
                "field indexes {:?} but the streams only support {:?}",
                features, self.streams
            )));
        }
        self.field = features;
        self.norms = norms;
        self.skip_writer.set_field(features);
        Ok(())
    }

    pub fn field_features(&self) -> IndexFeatures {
        self.field
    }

    pub fn start_term(&mut self) {
        self.doc_start_fp = self.outputs.doc_out.file_pointer();
        if self.field.has_positions() {
            if let Some(pos_out) = &self.outputs.pos_out {
                self.pos_start_fp = pos_out.file_pointer();
            }
            if self.field.has_payloads_or_offsets() {
                if let Some(pay_out) = &self.outputs.pay_out {
                    self.pay_start_fp = pay_out.file_pointer();
                }
            }
        }
        self.last_doc_id = 0;
        self.last_block_doc_id = None;
        self.doc_buffer_upto = 0;
        self.pos_buffer_upto = 0;
        self.payload_bytes.clear();
        self.doc_count = 0;
        self.total_term_freq = 0;
        self.skip_writer.reset();
        self.impacts.clear();
    }

    /// Buffers a document. Flushes a block of doc deltas (and freqs) once 128
    /// documents are buffered.
    pub fn start_doc(&mut self, doc_id: u32, freq: u32) -> Result<()> {
        if self.doc_count > 0 && doc_id <= self.last_doc_id {
            return Err(CodecError::corruption(format!(
                "docs out of order ({} <= {})",
                doc_id, self.last_doc_id
            )));
        }
        let has_freqs = self.field.has_freqs();
        if has_freqs && (freq == 0 || freq > MAX_VALUE) {
            return Err(CodecError::corruption(format!(
                "doc {doc_id} has an invalid term freq {freq}"
            )));
        }

        // the previous document completed a block
        if let Some(last_block_doc_id) = self.last_block_doc_id {
            if self.doc_buffer_upto == 0 {
                let entry = SkipEntry {
                    last_doc: last_block_doc_id,
                    doc_count: self.doc_count,
                    pos_fp: self.last_block_pos_fp,
                    pay_fp: self.last_block_pay_fp,
                    pos_buffer_upto: self.last_block_pos_buffer_upto as u32,
                    payload_byte_upto: self.last_block_payload_byte_upto as u32,
                };
                self.skip_writer.buffer_skip(entry, &self.impacts);
                self.impacts.clear();
            }
        }

        self.doc_delta_buffer[self.doc_buffer_upto] = u64::from(doc_id - self.last_doc_id);
        if has_freqs {
            self.freq_buffer[self.doc_buffer_upto] = u64::from(freq);
        }
        self.doc_buffer_upto += 1;
        self.doc_count += 1;
        self.total_term_freq += u64::from(if has_freqs { freq } else { 1 });

        if self.doc_buffer_upto == BLOCK_SIZE {
            let start = self.outputs.doc_out.file_pointer();
            self.pfor
                .encode(&mut self.doc_delta_buffer, &mut self.outputs.doc_out)?;
            if has_freqs {
                self.pfor
                    .encode(&mut self.freq_buffer, &mut self.outputs.doc_out)?;
            }
            trace!(
                "flushed doc block ending at doc {}: {} bytes",
                doc_id,
                self.outputs.doc_out.file_pointer() - start
            );
        }

        self.last_doc_id = doc_id;
        self.last_position = 0;
        self.last_start_offset = 0;

        let norm = self
            .norms
            .and_then(|norms| norms.norm(doc_id))
            .unwrap_or(1);
        self.impacts.add(if has_freqs { freq } else { 1 }, norm);
        Ok(())
    }

    /// Buffers one occurrence of the term in the current document. `payload` is
    /// ignored unless the field indexes payloads; `offsets` must be given when the
    /// field indexes offsets.
    pub fn add_position(
        &mut self,
        position: u32,
        payload: Option<&[u8]>,
        offsets: Option<(u32, u32)>,
    ) -> Result<()> {
        if !self.field.has_positions() {
            return Err(CodecError::InvalidFeatures(
                "field does not index positions".to_string(),
            ));
        }
        if position > self.max_position {
            return Err(CodecError::corruption(format!(
                "position={} is too large (> max position {})",
                position, self.max_position
            )));
        }
        if position < self.last_position {
            return Err(CodecError::corruption(format!(
                "position={} is before the previous position {}",
                position, self.last_position
            )));
        }

        let offsets = if self.field.has_offsets() {
            let (start_offset, end_offset) =
                offsets.ok_or_else(|| CodecError::corruption("missing offsets"))?;
            if start_offset < self.last_start_offset {
                return Err(CodecError::corruption(format!(
                    "offsets go backwards: start offset {} < previous {}",
                    start_offset, self.last_start_offset
                )));
            }
            if end_offset < start_offset || end_offset > MAX_VALUE {
                return Err(CodecError::corruption(format!(
                    "invalid end offset {end_offset} for start offset {start_offset}"
                )));
            }
            Some((start_offset, end_offset))
        } else {
            None
        };

        let upto = self.pos_buffer_upto;
        self.pos_delta_buffer[upto] = u64::from(position - self.last_position);

        if self.field.has_payloads() {
            match payload.filter(|p| !p.is_empty()) {
                None => self.payload_length_buffer[upto] = 0,
                Some(payload) => {
                    self.payload_length_buffer[upto] = payload.len() as u64;
                    let needed = self.payload_bytes.len() + payload.len();
                    if needed > self.payload_bytes.capacity()
                        && needed > self.payload_buffer_capacity
                    {
                        warn!(
                            "payload buffer grows past its capacity of {} bytes to {}",
                            self.payload_buffer_capacity, needed
                        );
                    }
                    self.payload_bytes.extend_from_slice(payload);
                }
            }
        }

        if let Some((start_offset, end_offset)) = offsets {
            self.offset_start_delta_buffer[upto] = u64::from(start_offset - self.last_start_offset);
            self.offset_length_buffer[upto] = u64::from(end_offset - start_offset);
            self.last_start_offset = start_offset;
        }

        self.pos_buffer_upto += 1;
        self.last_position = position;
        if self.pos_buffer_upto == BLOCK_SIZE {
            self.flush_position_block()?;
        }
        Ok(())
    }

    fn flush_position_block(&mut self) -> Result<()> {
        let pos_out = self
            .outputs
            .pos_out
            .as_mut()
            .ok_or_else(|| CodecError::InvalidFeatures("no position stream".to_string()))?;
        self.pfor.encode(&mut self.pos_delta_buffer, pos_out)?;

        if self.field.has_payloads_or_offsets() {
            let pay_out = self
                .outputs
                .pay_out
                .as_mut()
                .ok_or_else(|| CodecError::InvalidFeatures("no payload stream".to_string()))?;
            if self.field.has_payloads() {
                self.pfor.encode(&mut self.payload_length_buffer, pay_out)?;
                let byte_count = u32::try_from(self.payload_bytes.len())
                    .map_err(|_| CodecError::corruption("payload block too large"))?;
                pay_out.write_vint(byte_count)?;
                pay_out.write_bytes(&self.payload_bytes)?;
                self.payload_bytes.clear();
            }
            if self.field.has_offsets() {
                self.pfor.encode(&mut self.offset_start_delta_buffer, pay_out)?;
                self.pfor.encode(&mut self.offset_length_buffer, pay_out)?;
            }
        }
        trace!("flushed position block at doc {}", self.last_doc_id);
        self.pos_buffer_upto = 0;
        Ok(())
    }

    pub fn finish_doc(&mut self) {
        // remember where a full block ended so the next document can emit its skip entry
        if self.doc_buffer_upto == BLOCK_SIZE {
            self.last_block_doc_id = Some(self.last_doc_id);
            if let Some(pos_out) = &self.outputs.pos_out {
                if let Some(pay_out) = &self.outputs.pay_out {
                    self.last_block_pay_fp = pay_out.file_pointer();
                }
                self.last_block_pos_fp = pos_out.file_pointer();
                self.last_block_pos_buffer_upto = self.pos_buffer_upto;
                self.last_block_payload_byte_upto = self.payload_bytes.len();
            }
            self.doc_buffer_upto = 0;
        }
    }

    /// Writes the vint tails and skip data of the current term and returns where
    /// everything went.
    pub fn finish_term(&mut self) -> Result<TermState> {
        if self.doc_count == 0 {
            return Err(CodecError::corruption("term has no documents"));
        }
        let has_freqs = self.field.has_freqs();

        let singleton_doc_id = if self.doc_count == 1 {
            Some(self.doc_delta_buffer[0] as u32)
        } else {
            let doc_out = &mut self.outputs.doc_out;
            for i in 0..self.doc_buffer_upto {
                let doc_delta = self.doc_delta_buffer[i];
                let freq = self.freq_buffer[i];
                if !has_freqs {
                    doc_out.write_vint(doc_delta as u32)?;
                } else if freq == 1 {
                    doc_out.write_vlong((doc_delta << 1) | 1)?;
                } else {
                    doc_out.write_vlong(doc_delta << 1)?;
                    doc_out.write_vint(freq as u32)?;
                }
            }
            None
        };

        let last_pos_block_offset = if self.field.has_positions() {
            self.finish_positions()?
        } else {
            None
        };

        let skip_offset = if self.doc_count as usize > BLOCK_SIZE {
            let skip_fp = self.skip_writer.write_skip(&mut self.outputs.doc_out)?;
            Some(skip_fp - self.doc_start_fp)
        } else {
            None
        };

        let state = TermState {
            doc_freq: self.doc_count,
            total_term_freq: self.total_term_freq,
            doc_start_fp: self.doc_start_fp,
            pos_start_fp: self.pos_start_fp,
            pay_start_fp: self.pay_start_fp,
            singleton_doc_id,
            skip_offset,
            last_pos_block_offset,
        };
        debug!(
            "finished term: {} docs, total term freq {}, singleton {:?}",
            state.doc_freq, state.total_term_freq, state.singleton_doc_id
        );

        self.doc_buffer_upto = 0;
        self.pos_buffer_upto = 0;
        self.last_doc_id = 0;
        self.doc_count = 0;
        Ok(state)
    }

    // writes the position tail inline in the position stream
    fn finish_positions(&mut self) -> Result<Option<u64>> {
        let pos_out = self
            .outputs
            .pos_out
            .as_mut()
            .ok_or_else(|| CodecError::InvalidFeatures("no position stream".to_string()))?;
        let last_pos_block_offset = (self.total_term_freq > BLOCK_SIZE as u64)
            .then(|| pos_out.file_pointer() - self.pos_start_fp);

        if self.pos_buffer_upto > 0 {
            let has_payloads = self.field.has_payloads();
            // forces the first lengths to be written
            let mut last_payload_length = None;
            let mut last_offset_length = None;
            let mut payload_bytes_read_upto = 0;
            for i in 0..self.pos_buffer_upto {
                let pos_delta = self.pos_delta_buffer[i];
                if has_payloads {
                    let payload_length = self.payload_length_buffer[i];
                    if last_payload_length != Some(payload_length) {
                        last_payload_length = Some(payload_length);
                        pos_out.write_vlong((pos_delta << 1) | 1)?;
                        pos_out.write_vint(payload_length as u32)?;
                    } else {
                        pos_out.write_vlong(pos_delta << 1)?;
                    }
                    if payload_length != 0 {
                        let end = payload_bytes_read_upto + payload_length as usize;
                        pos_out.write_bytes(&self.payload_bytes[payload_bytes_read_upto..end])?;
                        payload_bytes_read_upto = end;
                    }
                } else {
                    pos_out.write_vint(pos_delta as u32)?;
                }

                if self.field.has_offsets() {
                    let delta = self.offset_start_delta_buffer[i];
                    let length = self.offset_length_buffer[i];
                    if last_offset_length == Some(length) {
                        pos_out.write_vlong(delta << 1)?;
                    } else {
                        pos_out.write_vlong((delta << 1) | 1)?;
                        pos_out.write_vint(length as u32)?;
                        last_offset_length = Some(length);
                    }
                }
            }
            if has_payloads {
                debug_assert_eq!(payload_bytes_read_upto, self.payload_bytes.len());
                self.payload_bytes.clear();
            }
        }
        Ok(last_pos_block_offset)
    }

    pub fn outputs(&self) -> &PostingsOutputs<O> {
        &self.outputs
    }

    pub fn into_outputs(self) -> PostingsOutputs<O> {
        self.outputs
    }
}
