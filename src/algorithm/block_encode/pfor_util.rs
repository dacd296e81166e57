use arrayvec::ArrayVec;

use super::{
    for_util::{self, ForUtil},
    BLOCK_SIZE, HALF_BLOCK_SIZE,
};
use crate::{
    error::{CodecError, Result},
    store::{DataInput, DataOutput},
};

/// At most this many values of a block are stored as exceptions.
pub const MAX_EXCEPTIONS: usize = 7;

const EXCEPTION_BYTES: usize = 2 * MAX_EXCEPTIONS;
const BITS_PER_VALUE_MASK: u8 = 0x1f;
const NUM_EXCEPTIONS_SHIFT: u32 = 5;

/// Largest patched width the token can carry.
pub const MAX_PATCHED_BITS: u32 = BITS_PER_VALUE_MASK as u32;

#[inline]
fn bits_required(value: u64) -> u32 {
    (u64::BITS - value.leading_zeros()).max(1)
}

/// Fixed-size binary min-heap over the largest `MAX_EXCEPTIONS + 1` values of a block.
struct TopValues {
    heap: [u64; MAX_EXCEPTIONS + 1],
}

impl TopValues {
    fn new(seed: [u64; MAX_EXCEPTIONS + 1]) -> Self {
        let mut top = Self { heap: seed };
        for i in (0..top.heap.len() / 2).rev() {
            top.sift_down(i);
        }
        top
    }

    #[inline]
    fn top(&self) -> u64 {
        self.heap[0]
    }

    /// Replaces the smallest value and returns the new smallest.
    fn update_top(&mut self, value: u64) -> u64 {
        self.heap[0] = value;
        self.sift_down(0);
        self.heap[0]
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.heap[right] < self.heap[left] {
                right
            } else {
                left
            };
            if self.heap[child] >= self.heap[i] {
                break;
            }
            self.heap.swap(i, child);
            i = child;
        }
    }

    fn max(&self) -> u64 {
        self.heap.iter().copied().max().unwrap_or(0)
    }

    fn count_above(&self, threshold: u64) -> usize {
        self.heap.iter().filter(|&&v| v > threshold).count()
    }
}

#[inline]
fn read_token<I: DataInput + ?Sized>(input: &mut I) -> Result<(u32, usize)> {
    let token = input.read_byte()?;
    Ok((
        u32::from(token & BITS_PER_VALUE_MASK),
        usize::from(token >> NUM_EXCEPTIONS_SHIFT),
    ))
}

fn read_exceptions<'a, I: DataInput + ?Sized>(
    input: &mut I,
    num_exceptions: usize,
    buf: &'a mut [u8; EXCEPTION_BYTES],
) -> Result<&'a [u8]> {
    let buf = &mut buf[..num_exceptions * 2];
    input.read_bytes(buf)?;
    if let Some(pos) = buf.iter().step_by(2).find(|&&p| usize::from(p) >= BLOCK_SIZE) {
        return Err(CodecError::corruption(format!(
            "exception index {pos} out of block"
        )));
    }
    Ok(buf)
}

fn prefix_sum_of_ones(values: &mut [u64; BLOCK_SIZE], base: u64) {
    for (i, v) in values.iter_mut().enumerate() {
        *v = base.wrapping_add(i as u64 + 1);
    }
}

fn prefix_sum_of(values: &mut [u64; BLOCK_SIZE], base: u64, delta: u64) {
    for (i, v) in values.iter_mut().enumerate() {
        *v = (i as u64 + 1).wrapping_mul(delta).wrapping_add(base);
    }
}

fn fill_same_value32(values: &mut [u64; BLOCK_SIZE], value: u64) {
    values[..HALF_BLOCK_SIZE].fill((value << 32) | value);
}

// two values per word: positions [0, 64) live in the high halves
fn apply_exceptions32(bits_per_value: u32, exceptions: &[u8], values: &mut [u64; BLOCK_SIZE]) {
    for pair in exceptions.chunks_exact(2) {
        let pos = usize::from(pair[0]);
        let idx = pos & 0x3f;
        let shift = bits_per_value + ((1 ^ (pos as u32 >> 6)) << 5);
        values[idx] |= u64::from(pair[1]) << shift;
    }
}

fn prefix_sum32(values: &mut [u64; BLOCK_SIZE], base: u64) {
    for i in 1..HALF_BLOCK_SIZE {
        values[i] = values[i].wrapping_add(values[i - 1]);
    }
    for_util::expand32(values);
    let carry = values[HALF_BLOCK_SIZE - 1];
    for v in values[HALF_BLOCK_SIZE..].iter_mut() {
        *v = v.wrapping_add(carry);
    }
    for v in values.iter_mut() {
        *v = v.wrapping_add(base);
    }
}

/// Patched frame of reference: packs a block at a width that fits all but at most
/// [`MAX_EXCEPTIONS`] values, whose high bits are appended as `(index, bits)` byte pairs.
///
/// The block starts with a token byte `num_exceptions << 5 | bits_per_value`. A width of
/// zero means every (patched) value is the same and is stored once as a vlong.
pub struct PForUtil {
    for_util: ForUtil,
    exceptions: ArrayVec<u8, EXCEPTION_BYTES>,
}

impl PForUtil {
    pub fn new() -> Self {
        Self {
            for_util: ForUtil::new(),
            exceptions: ArrayVec::new(),
        }
    }

    /// Encodes one block. `values` is clobbered.
    ///
    /// # Panics
    ///
    /// At most 7 values may exceed `2^31 - 1` and none may exceed `2^39 - 1`;
    /// otherwise the patched width would pass [`MAX_PATCHED_BITS`].
    pub fn encode<O: DataOutput + ?Sized>(
        &mut self,
        values: &mut [u64; BLOCK_SIZE],
        out: &mut O,
    ) -> Result<()> {
        let mut seed = [0u64; MAX_EXCEPTIONS + 1];
        seed.copy_from_slice(&values[..=MAX_EXCEPTIONS]);
        let mut top = TopValues::new(seed);
        let mut top_value = top.top();
        for &v in &values[MAX_EXCEPTIONS + 1..] {
            if v > top_value {
                top_value = top.update_top(v);
            }
        }

        let max_bits_required = bits_required(top.max());
        // exception high bits are stored on one byte
        let patched_bits_required =
            bits_required(top_value).max(max_bits_required.saturating_sub(8));
        assert!(
            patched_bits_required <= MAX_PATCHED_BITS,
            "values need {} bits after patching, at most {} supported",
            patched_bits_required,
            MAX_PATCHED_BITS
        );
        let max_unpatched_value = (1u64 << patched_bits_required) - 1;
        let num_exceptions = top.count_above(max_unpatched_value);

        self.exceptions.clear();
        if num_exceptions > 0 {
            for (i, v) in values.iter_mut().enumerate() {
                if *v > max_unpatched_value {
                    self.exceptions.push(i as u8);
                    self.exceptions.push((*v >> patched_bits_required) as u8);
                    *v &= max_unpatched_value;
                }
            }
            debug_assert_eq!(self.exceptions.len(), num_exceptions * 2);
        }

        let first = values[0];
        if max_bits_required <= 8 && values.iter().all(|&v| v == first) {
            // the width is not written, so exceptions carry their bits pre-shifted
            for high in self.exceptions.iter_mut().skip(1).step_by(2) {
                *high = (u64::from(*high) << patched_bits_required) as u8;
            }
            out.write_byte((num_exceptions << NUM_EXCEPTIONS_SHIFT) as u8)?;
            out.write_vlong(first)?;
        } else {
            let token = (num_exceptions << NUM_EXCEPTIONS_SHIFT) as u32 | patched_bits_required;
            out.write_byte(token as u8)?;
            self.for_util.encode(values, patched_bits_required, out)?;
        }
        out.write_bytes(&self.exceptions)
    }

    pub fn decode<I: DataInput + ?Sized>(
        &mut self,
        input: &mut I,
        values: &mut [u64; BLOCK_SIZE],
    ) -> Result<()> {
        let (bits_per_value, num_exceptions) = read_token(input)?;
        if bits_per_value == 0 {
            values.fill(input.read_vlong()?);
        } else {
            self.for_util.decode(bits_per_value, input, values)?;
        }
        let mut buf = [0u8; EXCEPTION_BYTES];
        for pair in read_exceptions(input, num_exceptions, &mut buf)?.chunks_exact(2) {
            values[usize::from(pair[0])] |= u64::from(pair[1]) << bits_per_value;
        }
        Ok(())
    }

    /// Decodes a block of deltas and turns it into running sums starting at `base`,
    /// so `values[i] = base + deltas[0] + ... + deltas[i]`.
    ///
    /// The deltas of each half block must sum to less than `2^32`, which holds for
    /// any strictly increasing sequence of `u32` ids.
    pub fn decode_and_prefix_sum<I: DataInput + ?Sized>(
        &mut self,
        input: &mut I,
        base: u64,
        values: &mut [u64; BLOCK_SIZE],
    ) -> Result<()> {
        let (bits_per_value, num_exceptions) = read_token(input)?;
        if num_exceptions == 0 {
            if bits_per_value == 0 {
                match input.read_vlong()? {
                    1 => prefix_sum_of_ones(values, base),
                    delta => prefix_sum_of(values, base, delta),
                }
            } else {
                self.for_util
                    .decode_to_32(bits_per_value, input, values)?;
                prefix_sum32(values, base);
            }
            return Ok(());
        }

        if bits_per_value == 0 {
            fill_same_value32(values, input.read_vlong()?);
        } else {
            self.for_util
                .decode_to_32(bits_per_value, input, values)?;
        }
        let mut buf = [0u8; EXCEPTION_BYTES];
        let exceptions = read_exceptions(input, num_exceptions, &mut buf)?;
        apply_exceptions32(bits_per_value, exceptions, values);
        prefix_sum32(values, base);
        Ok(())
    }

    /// Moves `input` past one block without decoding it.
    pub fn skip<I: DataInput + ?Sized>(&mut self, input: &mut I) -> Result<()> {
        let (bits_per_value, num_exceptions) = read_token(input)?;
        if bits_per_value == 0 {
            input.read_vlong()?;
            input.skip_bytes(num_exceptions << 1)
        } else {
            input.skip_bytes(for_util::num_bytes(bits_per_value) + (num_exceptions << 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::Rng;

    use super::*;

    fn encode(values: &[u64; BLOCK_SIZE]) -> Vec<u8> {
        let mut out = Vec::new();
        PForUtil::new()
            .encode(&mut values.clone(), &mut out)
            .unwrap();
        out
    }

    fn decode(bytes: &[u8]) -> [u64; BLOCK_SIZE] {
        let mut input = bytes;
        let mut values = [0u64; BLOCK_SIZE];
        PForUtil::new().decode(&mut input, &mut values).unwrap();
        assert!(input.is_empty());
        values
    }

    fn prefix_sums(deltas: &[u64; BLOCK_SIZE], base: u64) -> [u64; BLOCK_SIZE] {
        let mut sums = [0u64; BLOCK_SIZE];
        let mut acc = base;
        for (s, &d) in sums.iter_mut().zip(deltas) {
            acc += d;
            *s = acc;
        }
        sums
    }

    fn decode_prefix_sum(bytes: &[u8], base: u64) -> [u64; BLOCK_SIZE] {
        let mut input = bytes;
        let mut values = [0u64; BLOCK_SIZE];
        PForUtil::new()
            .decode_and_prefix_sum(&mut input, base, &mut values)
            .unwrap();
        assert!(input.is_empty());
        values
    }

    fn token(bytes: &[u8]) -> (u32, usize) {
        (
            u32::from(bytes[0] & BITS_PER_VALUE_MASK),
            usize::from(bytes[0] >> 5),
        )
    }

    #[test]
    fn test_top_values() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let values: Vec<u64> = (0..BLOCK_SIZE).map(|_| rng.gen_range(0..1000)).collect();
            let mut seed = [0u64; MAX_EXCEPTIONS + 1];
            seed.copy_from_slice(&values[..=MAX_EXCEPTIONS]);
            let mut top = TopValues::new(seed);
            let mut top_value = top.top();
            for &v in &values[MAX_EXCEPTIONS + 1..] {
                if v > top_value {
                    top_value = top.update_top(v);
                }
            }
            let mut sorted = values.clone();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            assert_eq!(top.max(), sorted[0]);
            assert_eq!(top_value, sorted[MAX_EXCEPTIONS]);
            let mut heap = top.heap.to_vec();
            heap.sort_unstable_by(|a, b| b.cmp(a));
            assert_eq!(heap, sorted[..=MAX_EXCEPTIONS]);
        }
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 1);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(5), 3);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
        assert_eq!(bits_required(u32::MAX as u64), 32);
    }

    #[test]
    fn test_round_trip_random() {
        let mut rng = rand::thread_rng();
        for bits in 1..=31 {
            for _ in 0..20 {
                let mut values = [0u64; BLOCK_SIZE];
                for v in values.iter_mut() {
                    *v = rng.gen_range(0..1u64 << bits);
                }
                let bytes = encode(&values);
                assert!(token(&bytes).1 <= MAX_EXCEPTIONS);
                assert_eq!(decode(&bytes), values);
            }
        }
    }

    #[test]
    fn test_minimal_width_without_outliers() {
        let mut values = [0u64; BLOCK_SIZE];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (i % 6) as u64;
        }
        let bytes = encode(&values);
        assert_eq!(token(&bytes), (3, 0));
        assert_eq!(bytes.len(), 1 + for_util::num_bytes(3));
        assert_eq!(decode(&bytes), values);
    }

    #[test]
    fn test_outliers_become_exceptions() {
        let mut rng = rand::thread_rng();
        let mut values = [0u64; BLOCK_SIZE];
        for v in values.iter_mut() {
            *v = rng.gen_range(0..16);
        }
        let outliers = [3usize, 17, 64, 65, 100, 126, 127];
        for &i in &outliers {
            values[i] = rng.gen_range(1u64 << 30..1u64 << 31);
        }
        let bytes = encode(&values);
        let (bits_per_value, num_exceptions) = token(&bytes);
        // at most 8 bits can be patched away
        assert_eq!(bits_per_value, 31 - 8);
        assert_eq!(num_exceptions, outliers.len());
        assert_eq!(
            bytes.len(),
            1 + for_util::num_bytes(bits_per_value) + 2 * num_exceptions
        );
        assert_eq!(decode(&bytes), values);
    }

    #[test]
    fn test_exceptions_bounded() {
        let mut values = [1u64; BLOCK_SIZE];
        for i in 0..20 {
            values[i * 5] = 1000 + i as u64;
        }
        let bytes = encode(&values);
        assert!(token(&bytes).1 <= MAX_EXCEPTIONS);
        assert_eq!(decode(&bytes), values);
    }

    #[test]
    fn test_wide_outliers() {
        let mut values = [7u64; BLOCK_SIZE];
        for i in 0..MAX_EXCEPTIONS {
            values[i * 11] = u64::from(u32::MAX) - i as u64;
        }
        let bytes = encode(&values);
        assert_eq!(token(&bytes), (24, MAX_EXCEPTIONS));
        assert_eq!(decode(&bytes), values);
    }

    #[test]
    fn test_all_equal() {
        let bytes = encode(&[5; BLOCK_SIZE]);
        assert_eq!(bytes, vec![0, 5]);
        assert_eq!(decode(&bytes), [5; BLOCK_SIZE]);

        let bytes = encode(&[200; BLOCK_SIZE]);
        assert_eq!(bytes, vec![0, 0xc8, 0x01]);
        assert_eq!(decode(&bytes), [200; BLOCK_SIZE]);

        // too wide for the shortcut
        let bytes = encode(&[300; BLOCK_SIZE]);
        assert_eq!(token(&bytes), (9, 0));
        assert_eq!(decode(&bytes), [300; BLOCK_SIZE]);
    }

    #[test]
    fn test_all_equal_with_exception() {
        let mut values = [1u64; BLOCK_SIZE];
        values[9] = 0b1000_0001;
        let bytes = encode(&values);
        assert_eq!(bytes, vec![1 << 5, 1, 9, 0b1000_0000]);
        assert_eq!(decode(&bytes), values);
        assert_eq!(decode_prefix_sum(&bytes, 0), prefix_sums(&values, 0));
    }

    #[test]
    fn test_prefix_sum_of_ones() {
        let bytes = encode(&[1; BLOCK_SIZE]);
        let values = decode_prefix_sum(&bytes, 100);
        let expected: Vec<u64> = (101..=228).collect();
        assert_eq!(values.to_vec(), expected);
    }

    #[test]
    fn test_prefix_sum_of_constant() {
        let deltas = [7u64; BLOCK_SIZE];
        let bytes = encode(&deltas);
        assert_eq!(token(&bytes), (0, 0));
        assert_eq!(decode_prefix_sum(&bytes, 3), prefix_sums(&deltas, 3));
    }

    #[test]
    fn test_prefix_sum_random_doc_ids() {
        let mut rng = rand::thread_rng();
        for round in 0..200 {
            let mut ids = rand::seq::index::sample(&mut rng, 1_000_000 + round * 1000, BLOCK_SIZE)
                .into_iter()
                .map(|i| i as u64 + 1)
                .collect::<Vec<_>>();
            ids.sort_unstable();
            let base = rng.gen_range(0..ids[0]);
            let mut deltas = [0u64; BLOCK_SIZE];
            let mut last = base;
            for (d, &id) in deltas.iter_mut().zip(&ids) {
                *d = id - last;
                last = id;
            }
            let bytes = encode(&deltas);
            assert_eq!(decode_prefix_sum(&bytes, base).to_vec(), ids);
        }
    }

    #[test]
    fn test_prefix_sum_with_exceptions() {
        let mut deltas = [3u64; BLOCK_SIZE];
        for &(i, d) in &[(0usize, 40_000u64), (10, 500), (63, 70_000), (64, 9_000), (127, 65_536)] {
            deltas[i] = d;
        }
        let bytes = encode(&deltas);
        assert!(token(&bytes).1 > 0);
        assert_eq!(decode_prefix_sum(&bytes, 12_345), prefix_sums(&deltas, 12_345));
    }

    #[test]
    fn test_skip() {
        let mut rng = rand::thread_rng();
        let mut blocks = vec![[4u64; BLOCK_SIZE], [1u64; BLOCK_SIZE]];
        let mut random = [0u64; BLOCK_SIZE];
        for v in random.iter_mut() {
            *v = rng.gen_range(0..1 << 20);
        }
        blocks.push(random);
        let mut with_exception = [2u64; BLOCK_SIZE];
        with_exception[50] = 200;
        blocks.push(with_exception);
        let last = [0u64, 9, 18, 1 << 25]
            .iter()
            .cycle()
            .take(BLOCK_SIZE)
            .copied()
            .collect::<Vec<_>>();
        let mut last_block = [0u64; BLOCK_SIZE];
        last_block.copy_from_slice(&last);

        let mut pfor = PForUtil::new();
        let mut out = Vec::new();
        for block in &blocks {
            pfor.encode(&mut block.clone(), &mut out).unwrap();
        }
        pfor.encode(&mut last_block.clone(), &mut out).unwrap();

        let mut input = out.as_slice();
        for _ in &blocks {
            pfor.skip(&mut input).unwrap();
        }
        let mut values = [0u64; BLOCK_SIZE];
        pfor.decode(&mut input, &mut values).unwrap();
        assert_eq!(values, last_block);
        assert!(input.is_empty());
    }

    #[test]
    fn test_corrupted_exception_index() {
        let mut values = [1u64; BLOCK_SIZE];
        values[0] = 1 << 20;
        let mut bytes = encode(&values);
        let len = bytes.len();
        bytes[len - 2] = 200;
        let mut values = [0u64; BLOCK_SIZE];
        let err = PForUtil::new()
            .decode(&mut bytes.as_slice(), &mut values)
            .unwrap_err();
        assert!(matches!(err, CodecError::Corruption(_)));
    }

    #[test]
    fn test_truncated_block() {
        let mut values = [0u64; BLOCK_SIZE];
        for (i, v) in values.iter_mut().enumerate() {
            *v = i as u64;
        }
        let bytes = encode(&values);
        let mut out = [0u64; BLOCK_SIZE];
        assert!(matches!(
            PForUtil::new().decode(&mut &bytes[..bytes.len() / 2], &mut out),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_widest_patched_block() {
        let mut values = [3u64; BLOCK_SIZE];
        for i in 0..=MAX_EXCEPTIONS {
            values[i * 13] = i32::MAX as u64;
        }
        values[1] = u64::from(u32::MAX);
        let bytes = encode(&values);
        assert_eq!(token(&bytes), (MAX_PATCHED_BITS, 1));
        assert_eq!(decode(&bytes), values);
    }

    #[test]
    #[should_panic(expected = "bits after patching")]
    fn test_too_wide_rejected() {
        let mut out = Vec::new();
        PForUtil::new()
            .encode(&mut [u64::from(u32::MAX); BLOCK_SIZE], &mut out)
            .unwrap();
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            raw in proptest::collection::vec(any::<u32>(), BLOCK_SIZE),
            shift in 1u32..32,
        ) {
            let mut values = [0u64; BLOCK_SIZE];
            for (v, r) in values.iter_mut().zip(raw) {
                *v = u64::from(r >> shift);
            }
            let bytes = encode(&values);
            prop_assert!(token(&bytes).1 <= MAX_EXCEPTIONS);
            prop_assert_eq!(decode(&bytes), values);
        }

        #[test]
        fn prop_prefix_sum(
            raw in proptest::collection::vec(0u64..(1 << 24), BLOCK_SIZE),
            base in 0u64..(1 << 32),
        ) {
            let mut deltas = [0u64; BLOCK_SIZE];
            deltas.copy_from_slice(&raw);
            let bytes = encode(&deltas);
            prop_assert_eq!(decode_prefix_sum(&bytes, base), prefix_sums(&deltas, base));
        }
    }
}
