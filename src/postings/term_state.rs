use super::{IndexFeatures, BLOCK_SIZE};
use crate::{
    error::{CodecError, Result},
    store::{DataInput, DataOutput},
    utils::vint::{zigzag_decode, zigzag_encode},
};

/// Where a term's postings live and how many there are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermState {
    pub doc_freq: u32,
    pub total_term_freq: u64,
    pub doc_start_fp: u64,
    pub pos_start_fp: u64,
    pub pay_start_fp: u64,
    /// Set when the term occurs in exactly one document; nothing is written to the
    /// doc stream then.
    pub singleton_doc_id: Option<u32>,
    /// Start of the skip data, relative to `doc_start_fp`.
    pub skip_offset: Option<u64>,
    /// Start of the position tail, relative to `pos_start_fp`.
    pub last_pos_block_offset: Option<u64>,
}

/// Writes term metadata for the term dictionary, delta coded against the
/// previous term of the same block.
#[derive(Debug)]
pub struct TermStateEncoder {
    features: IndexFeatures,
    last: TermState,
}

impl TermStateEncoder {
    pub fn new(features: IndexFeatures) -> Self {
        Self {
            features,
            last: TermState::default(),
        }
    }

    pub fn set_field(&mut self, features: IndexFeatures) {
        self.features = features;
        self.last = TermState::default();
    }

    /// With `absolute`, the term is written without reference to the previous one.
    pub fn encode_term<O: DataOutput + ?Sized>(
        &mut self,
        out: &mut O,
        state: &TermState,
        absolute: bool,
    ) -> Result<()> {
        if absolute {
            self.last = TermState::default();
        }
        let last = &self.last;

        match (last.singleton_doc_id, state.singleton_doc_id) {
            (Some(last_doc), Some(doc)) if state.doc_start_fp == last.doc_start_fp => {
                let delta = i64::from(doc) - i64::from(last_doc);
                out.write_vlong((zigzag_encode(delta) << 1) | 1)?;
            }
            _ => {
                let delta = state.doc_start_fp.checked_sub(last.doc_start_fp).ok_or_else(|| {
                    CodecError::corruption("doc start pointer went backwards")
                })?;
                out.write_vlong(delta << 1)?;
                if let Some(doc) = state.singleton_doc_id {
                    out.write_vint(doc)?;
                }
            }
        }

        if self.features.has_positions() {
            out.write_vlong(state.pos_start_fp.wrapping_sub(last.pos_start_fp))?;
            if self.features.has_payloads_or_offsets() {
                out.write_vlong(state.pay_start_fp.wrapping_sub(last.pay_start_fp))?;
            }
            if let Some(offset) = state.last_pos_block_offset {
                out.write_vlong(offset)?;
            }
        }
        if let Some(offset) = state.skip_offset {
            out.write_vlong(offset)?;
        }
        self.last = *state;
        Ok(())
    }
}

/// Reads what [`TermStateEncoder`] wrote. Doc freq and total term freq come from
/// the term dictionary.
#[derive(Debug)]
pub struct TermStateDecoder {
    features: IndexFeatures,
    last: TermState,
}

impl TermStateDecoder {
    pub fn new(features: IndexFeatures) -> Self {
        Self {
            features,
            last: TermState::default(),
        }
    }

    pub fn decode_term<I: DataInput + ?Sized>(
        &mut self,
        input: &mut I,
        doc_freq: u32,
        total_term_freq: u64,
        absolute: bool,
    ) -> Result<TermState> {
        if absolute {
            self.last = TermState::default();
        }
        let mut state = TermState {
            doc_freq,
            total_term_freq,
            doc_start_fp: self.last.doc_start_fp,
            pos_start_fp: self.last.pos_start_fp,
            pay_start_fp: self.last.pay_start_fp,
            ..Default::default()
        };

        let l = input.read_vlong()?;
        if l & 1 == 0 {
            state.doc_start_fp += l >> 1;
            if doc_freq == 1 {
                state.singleton_doc_id = Some(input.read_vint()?);
            }
        } else {
            let last_doc = self
                .last
                .singleton_doc_id
                .filter(|_| !absolute)
                .ok_or_else(|| {
                    CodecError::corruption("singleton delta without a previous singleton")
                })?;
            let doc = i64::from(last_doc) + zigzag_decode(l >> 1);
            let doc = u32::try_from(doc).map_err(|_| {
                CodecError::corruption(format!("singleton doc id {doc} out of range"))
            })?;
            state.singleton_doc_id = Some(doc);
        }

        if self.features.has_positions() {
            state.pos_start_fp = state.pos_start_fp.wrapping_add(input.read_vlong()?);
            if self.features.has_payloads_or_offsets() {
                state.pay_start_fp = state.pay_start_fp.wrapping_add(input.read_vlong()?);
            }
            if total_term_freq > BLOCK_SIZE as u64 {
                state.last_pos_block_offset = Some(input.read_vlong()?);
            }
        }
        if doc_freq as usize > BLOCK_SIZE {
            state.skip_offset = Some(input.read_vlong()?);
        }
        self.last = state;
        Ok(state)
    }
}
