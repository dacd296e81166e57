mod block_encode;

pub use block_encode::{
    num_bytes, ForUtil, PForUtil, BLOCK_SIZE, MAX_BITS_PER_VALUE, MAX_EXCEPTIONS,
    MAX_PATCHED_BITS, MAX_UNROLLED_BITS_PER_VALUE,
};
