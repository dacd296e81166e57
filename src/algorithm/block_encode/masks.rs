// Masks of the low `bits` bits of every 8/16/32-bit lane of a word.

const fn expand_mask32(mask32: u64) -> u64 {
    mask32 | (mask32 << 32)
}

const fn expand_mask16(mask16: u64) -> u64 {
    expand_mask32(mask16 | (mask16 << 16))
}

const fn expand_mask8(mask8: u64) -> u64 {
    expand_mask16(mask8 | (mask8 << 8))
}

const fn low_bits(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

pub const fn mask8(bits: u32) -> u64 {
    expand_mask8(low_bits(bits))
}

pub const fn mask16(bits: u32) -> u64 {
    expand_mask16(low_bits(bits))
}

pub const fn mask32(bits: u32) -> u64 {
    expand_mask32(low_bits(bits))
}

pub const MASKS8: [u64; 9] = {
    let mut masks = [0u64; 9];
    let mut i = 0;
    while i < masks.len() {
        masks[i] = mask8(i as u32);
        i += 1;
    }
    masks
};

pub const MASKS16: [u64; 17] = {
    let mut masks = [0u64; 17];
    let mut i = 0;
    while i < masks.len() {
        masks[i] = mask16(i as u32);
        i += 1;
    }
    masks
};

pub const MASKS32: [u64; 33] = {
    let mut masks = [0u64; 33];
    let mut i = 0;
    while i < masks.len() {
        masks[i] = mask32(i as u32);
        i += 1;
    }
    masks
};

/// Mask for `bits` bits per lane, lanes being `primitive` bits wide.
#[inline(always)]
pub const fn lane_mask(primitive: u32, bits: u32) -> u64 {
    match primitive {
        8 => MASKS8[bits as usize],
        16 => MASKS16[bits as usize],
        _ => MASKS32[bits as usize],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_masks() {
        assert_eq!(MASKS8[0], 0);
        assert_eq!(MASKS8[1], 0x0101010101010101);
        assert_eq!(MASKS8[3], 0x0707070707070707);
        assert_eq!(MASKS8[8], u64::MAX);
        assert_eq!(MASKS16[9], 0x01FF01FF01FF01FF);
        assert_eq!(MASKS16[16], u64::MAX);
        assert_eq!(MASKS32[17], 0x0001FFFF0001FFFF);
        assert_eq!(MASKS32[32], u64::MAX);
    }

    #[test]
    fn test_lane_mask_matches_tables() {
        for bits in 0..=8 {
            assert_eq!(lane_mask(8, bits), MASKS8[bits as usize]);
        }
        for bits in 0..=16 {
            assert_eq!(lane_mask(16, bits), MASKS16[bits as usize]);
        }
        for bits in 0..=32 {
            assert_eq!(lane_mask(32, bits), MASKS32[bits as usize]);
        }
    }
}
