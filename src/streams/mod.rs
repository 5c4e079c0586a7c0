//! Compressed activity streams.

pub mod codec;
pub mod types;

pub use codec::{compress, decode_all, decompress, DecodeError, DecodedStreams, EncodeError};
pub use types::{CompressedStream, DataKind, RawStream, StreamType, StreamValues};
