pub mod algorithm;
pub mod error;
pub mod options;
pub mod postings;
pub mod store;
pub mod utils;

pub use algorithm::{ForUtil, PForUtil, BLOCK_SIZE};
pub use error::{CodecError, Result};
pub use options::PostingsOption;
pub use postings::{
    BlockPostingsReader, IndexFeatures, PostingsOutputs, PostingsWriter, SkipBlock, TermState,
};

#[cfg(not(all(target_endian = "little", target_pointer_width = "64")))]
compile_error!("Target is not supported.");
