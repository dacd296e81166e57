// Frame-of-reference packing of 128 integers with a fixed number of bits per value.
//
// Values are first collapsed so that several of them share one 64-bit word in
// 8, 16 or 32-bit lanes (the smallest lane that fits the width), then the lanes
// are packed left-aligned into `2 * bits_per_value` words. Every shift and mask
// works on all lanes of a word at once.

use super::{masks::lane_mask, BLOCK_SIZE, HALF_BLOCK_SIZE};
use crate::{
    error::Result,
    store::{DataInput, DataOutput},
};

pub const MAX_BITS_PER_VALUE: u32 = 32;

/// Widths above this are decoded by the generic loop.
pub const MAX_UNROLLED_BITS_PER_VALUE: u32 = 24;

const BLOCK_SIZE_LOG2: u32 = BLOCK_SIZE.trailing_zeros();

/// Number of bytes a block of 128 values takes at `bits_per_value` bits each.
pub const fn num_bytes(bits_per_value: u32) -> usize {
    (bits_per_value as usize) << (BLOCK_SIZE_LOG2 - 3)
}

#[inline]
fn primitive_for(bits_per_value: u32) -> u32 {
    if bits_per_value <= 8 {
        8
    } else if bits_per_value <= 16 {
        16
    } else {
        32
    }
}

#[inline]
fn check_bits_per_value(bits_per_value: u32) {
    assert!(
        (1..=MAX_BITS_PER_VALUE).contains(&bits_per_value),
        "bits per value must be in [1, {}], got {}",
        MAX_BITS_PER_VALUE,
        bits_per_value
    );
}

fn collapse8(arr: &mut [u64; BLOCK_SIZE]) {
    for i in 0..16 {
        arr[i] = (arr[i] << 56)
            | (arr[16 + i] << 48)
            | (arr[32 + i] << 40)
            | (arr[48 + i] << 32)
            | (arr[64 + i] << 24)
            | (arr[80 + i] << 16)
            | (arr[96 + i] << 8)
            | arr[112 + i];
    }
}

fn collapse16(arr: &mut [u64; BLOCK_SIZE]) {
    for i in 0..32 {
        arr[i] = (arr[i] << 48) | (arr[32 + i] << 32) | (arr[64 + i] << 16) | arr[96 + i];
    }
}

fn collapse32(arr: &mut [u64; BLOCK_SIZE]) {
    for i in 0..64 {
        arr[i] = (arr[i] << 32) | arr[64 + i];
    }
}

fn expand8(arr: &mut [u64; BLOCK_SIZE]) {
    for i in 0..16 {
        let l = arr[i];
        arr[i] = (l >> 56) & 0xFF;
        arr[16 + i] = (l >> 48) & 0xFF;
        arr[32 + i] = (l >> 40) & 0xFF;
        arr[48 + i] = (l >> 32) & 0xFF;
        arr[64 + i] = (l >> 24) & 0xFF;
        arr[80 + i] = (l >> 16) & 0xFF;
        arr[96 + i] = (l >> 8) & 0xFF;
        arr[112 + i] = l & 0xFF;
    }
}

fn expand8_to_32(arr: &mut [u64; BLOCK_SIZE]) {
    for i in 0..16 {
        let l = arr[i];
        arr[i] = (l >> 24) & 0x000000FF000000FF;
        arr[16 + i] = (l >> 16) & 0x000000FF000000FF;
        arr[32 + i] = (l >> 8) & 0x000000FF000000FF;
        arr[48 + i] = l & 0x000000FF000000FF;
    }
}

fn expand16(arr: &mut [u64; BLOCK_SIZE]) {
    for i in 0..32 {
        let l = arr[i];
        arr[i] = (l >> 48) & 0xFFFF;
        arr[32 + i] = (l >> 32) & 0xFFFF;
        arr[64 + i] = (l >> 16) & 0xFFFF;
        arr[96 + i] = l & 0xFFFF;
    }
}

fn expand16_to_32(arr: &mut [u64; BLOCK_SIZE]) {
    for i in 0..32 {
        let l = arr[i];
        arr[i] = (l >> 16) & 0x0000FFFF0000FFFF;
        arr[32 + i] = l & 0x0000FFFF0000FFFF;
    }
}

/// Splits words holding values `[i, 64 + i]` in their high/low halves into 128 values.
pub(super) fn expand32(arr: &mut [u64; BLOCK_SIZE]) {
    for i in 0..HALF_BLOCK_SIZE {
        let l = arr[i];
        arr[i] = l >> 32;
        arr[HALF_BLOCK_SIZE + i] = l & 0xFFFFFFFF;
    }
}

// this loop shape gets auto-vectorized
#[inline(always)]
fn shift_words(src: &[u64], dst: &mut [u64], shift: u32, mask: u64) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = (s >> shift) & mask;
    }
}

/// Unpacks `2 * BPV` packed words into `2 * PRIMITIVE` collapsed words.
///
/// All loop bounds are constants, so every instantiation compiles down to a
/// straight sequence of shifts and masks.
#[inline(always)]
fn unpack_unrolled<const BPV: u32, const PRIMITIVE: u32>(
    tmp: &mut [u64; HALF_BLOCK_SIZE],
    values: &mut [u64; BLOCK_SIZE],
) {
    let num_words = 2 * BPV as usize;
    let full_shifts = PRIMITIVE / BPV;
    let remaining_bits = PRIMITIVE % BPV;
    let mask = lane_mask(PRIMITIVE, BPV);
    let tmp = &mut tmp[..num_words];

    for k in 0..full_shifts {
        let shift = PRIMITIVE - (k + 1) * BPV;
        shift_words(
            tmp,
            &mut values[k as usize * num_words..][..num_words],
            shift,
            mask,
        );
    }
    if remaining_bits == 0 {
        return;
    }

    // the low `remaining_bits` of every lane, read in word order, form one more
    // bit stream holding the values that did not fit in the full shifts
    let remaining_mask = lane_mask(PRIMITIVE, remaining_bits);
    for w in tmp.iter_mut() {
        *w &= remaining_mask;
    }
    let mut values_idx = full_shifts as usize * num_words;
    let mut acc = 0u64;
    let mut acc_bits = 0u32;
    for &chunk in tmp.iter() {
        acc = (acc << remaining_bits) | chunk;
        acc_bits += remaining_bits;
        if acc_bits >= BPV {
            let excess = acc_bits - BPV;
            values[values_idx] = (acc >> excess) & mask;
            values_idx += 1;
            acc &= lane_mask(PRIMITIVE, excess);
            acc_bits = excess;
        }
    }
    debug_assert_eq!(values_idx, 2 * PRIMITIVE as usize);
}

/// Runtime-width version of [`unpack_unrolled`]. Used for widths above
/// [`MAX_UNROLLED_BITS_PER_VALUE`] and as the reference for the unrolled paths.
fn unpack_generic(
    bits_per_value: u32,
    primitive: u32,
    tmp: &[u64; HALF_BLOCK_SIZE],
    values: &mut [u64; BLOCK_SIZE],
) {
    let num_words = 2 * bits_per_value as usize;
    let num_values = 2 * primitive as usize;
    let mask = lane_mask(primitive, bits_per_value);

    let mut values_idx = 0;
    let mut shift = primitive as i32 - bits_per_value as i32;
    while shift >= 0 {
        shift_words(
            &tmp[..num_words],
            &mut values[values_idx..values_idx + num_words],
            shift as u32,
            mask,
        );
        values_idx += num_words;
        shift -= bits_per_value as i32;
    }

    let remaining_bits_per_word = (shift + bits_per_value as i32) as u32;
    let remaining_mask = lane_mask(primitive, remaining_bits_per_word);
    let mut tmp_idx = 0;
    let mut remaining_bits = remaining_bits_per_word;
    while values_idx < num_values {
        let mut b = bits_per_value - remaining_bits;
        let mut l = (tmp[tmp_idx] & lane_mask(primitive, remaining_bits)) << b;
        tmp_idx += 1;
        while b >= remaining_bits_per_word {
            b -= remaining_bits_per_word;
            l |= (tmp[tmp_idx] & remaining_mask) << b;
            tmp_idx += 1;
        }
        if b > 0 {
            l |= (tmp[tmp_idx] >> (remaining_bits_per_word - b)) & lane_mask(primitive, b);
            remaining_bits = remaining_bits_per_word - b;
        } else {
            remaining_bits = remaining_bits_per_word;
        }
        values[values_idx] = l;
        values_idx += 1;
    }
}

macro_rules! unpack_dispatch {
    ($bits_per_value:expr, $tmp:expr, $values:expr; $($bpv:literal => $primitive:literal),* $(,)?) => {
        match $bits_per_value {
            $($bpv => unpack_unrolled::<$bpv, $primitive>($tmp, $values),)*
            bpv => unpack_generic(bpv, 32, $tmp, $values),
        }
    };
}

fn unpack(bits_per_value: u32, tmp: &mut [u64; HALF_BLOCK_SIZE], values: &mut [u64; BLOCK_SIZE]) {
    unpack_dispatch!(bits_per_value, tmp, values;
        1 => 8, 2 => 8, 3 => 8, 4 => 8, 5 => 8, 6 => 8, 7 => 8, 8 => 8,
        9 => 16, 10 => 16, 11 => 16, 12 => 16, 13 => 16, 14 => 16, 15 => 16, 16 => 16,
        17 => 32, 18 => 32, 19 => 32, 20 => 32, 21 => 32, 22 => 32, 23 => 32, 24 => 32,
    )
}

/// Packs and unpacks blocks of 128 values. Owns the scratch words reused by
/// every call, so one instance must not be shared between threads.
pub struct ForUtil {
    tmp: [u64; HALF_BLOCK_SIZE],
}

impl ForUtil {
    pub fn new() -> Self {
        Self {
            tmp: [0; HALF_BLOCK_SIZE],
        }
    }

    /// Encodes 128 values of at most `bits_per_value` bits each.
    ///
    /// `values` is used as scratch space and holds garbage afterwards.
    pub fn encode<O: DataOutput + ?Sized>(
        &mut self,
        values: &mut [u64; BLOCK_SIZE],
        bits_per_value: u32,
        out: &mut O,
    ) -> Result<()> {
        check_bits_per_value(bits_per_value);
        debug_assert!(
            values.iter().all(|&v| v >> bits_per_value == 0),
            "value wider than {bits_per_value} bits"
        );

        let primitive = primitive_for(bits_per_value);
        let num_values = match primitive {
            8 => {
                collapse8(values);
                BLOCK_SIZE / 8
            }
            16 => {
                collapse16(values);
                BLOCK_SIZE / 4
            }
            _ => {
                collapse32(values);
                BLOCK_SIZE / 2
            }
        };

        let num_words = 2 * bits_per_value as usize;
        let tmp = &mut self.tmp;
        let mut idx = 0;
        let mut shift = primitive as i32 - bits_per_value as i32;
        for i in 0..num_words {
            tmp[i] = values[idx] << shift;
            idx += 1;
        }
        shift -= bits_per_value as i32;
        while shift >= 0 {
            for i in 0..num_words {
                tmp[i] |= values[idx] << shift;
                idx += 1;
            }
            shift -= bits_per_value as i32;
        }

        // the lanes that did not fit whole are spread over the free low bits
        // of the packed words, most significant bits first
        let remaining_bits_per_word = (shift + bits_per_value as i32) as u32;
        let remaining_mask = lane_mask(primitive, remaining_bits_per_word);
        let mut tmp_idx = 0;
        let mut remaining_bits_per_value = bits_per_value;
        while idx < num_values {
            if remaining_bits_per_value >= remaining_bits_per_word {
                remaining_bits_per_value -= remaining_bits_per_word;
                tmp[tmp_idx] |= (values[idx] >> remaining_bits_per_value) & remaining_mask;
                tmp_idx += 1;
                if remaining_bits_per_value == 0 {
                    idx += 1;
                    remaining_bits_per_value = bits_per_value;
                }
            } else {
                let mask1 = lane_mask(primitive, remaining_bits_per_value);
                let mask2 =
                    lane_mask(primitive, remaining_bits_per_word - remaining_bits_per_value);
                tmp[tmp_idx] |= (values[idx] & mask1)
                    << (remaining_bits_per_word - remaining_bits_per_value);
                idx += 1;
                remaining_bits_per_value =
                    bits_per_value - remaining_bits_per_word + remaining_bits_per_value;
                tmp[tmp_idx] |= (values[idx] >> remaining_bits_per_value) & mask2;
                tmp_idx += 1;
            }
        }

        out.write_longs(&tmp[..num_words])
    }

    /// Decodes 128 values packed at `bits_per_value` bits each.
    pub fn decode<I: DataInput + ?Sized>(
        &mut self,
        bits_per_value: u32,
        input: &mut I,
        values: &mut [u64; BLOCK_SIZE],
    ) -> Result<()> {
        self.read_and_unpack(bits_per_value, input, values)?;
        match primitive_for(bits_per_value) {
            8 => expand8(values),
            16 => expand16(values),
            _ => expand32(values),
        }
        Ok(())
    }

    /// Decodes 128 values into the first 64 words, two values per word: value
    /// `i` in the high 32 bits of word `i`, value `64 + i` in its low 32 bits.
    pub(super) fn decode_to_32<I: DataInput + ?Sized>(
        &mut self,
        bits_per_value: u32,
        input: &mut I,
        values: &mut [u64; BLOCK_SIZE],
    ) -> Result<()> {
        self.read_and_unpack(bits_per_value, input, values)?;
        match primitive_for(bits_per_value) {
            8 => expand8_to_32(values),
            16 => expand16_to_32(values),
            _ => {}
        }
        Ok(())
    }

    fn read_and_unpack<I: DataInput + ?Sized>(
        &mut self,
        bits_per_value: u32,
        input: &mut I,
        values: &mut [u64; BLOCK_SIZE],
    ) -> Result<()> {
        check_bits_per_value(bits_per_value);
        let num_words = 2 * bits_per_value as usize;
        input.read_longs(&mut self.tmp[..num_words])?;
        unpack(bits_per_value, &mut self.tmp, values);
        Ok(())
    }
}
