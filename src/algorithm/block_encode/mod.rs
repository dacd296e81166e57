mod for_util;
mod masks;
mod pfor_util;

pub use for_util::{num_bytes, ForUtil, MAX_BITS_PER_VALUE, MAX_UNROLLED_BITS_PER_VALUE};
pub use pfor_util::{PForUtil, MAX_EXCEPTIONS, MAX_PATCHED_BITS};

/// Number of values in a packed block.
pub const BLOCK_SIZE: usize = 128;

pub(crate) const HALF_BLOCK_SIZE: usize = BLOCK_SIZE / 2;
