//! Line demultiplexing shared by every consumer of a byte stream.
//!
//! [`line_stream`] turns any [`AsyncRead`] into a stream of trimmed,
//! non-blank lines. The stream ending is the end-of-data signal.

pub mod codec;

use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

pub use codec::{LineCodec, DEFAULT_MAX_LINE_BYTES};

/// Frame `reader` into a stream of trimmed, non-blank lines.
pub fn line_stream<R>(reader: R, max_line_bytes: usize) -> FramedRead<R, LineCodec>
where
    R: AsyncRead,
{
    FramedRead::new(reader, LineCodec::with_max_length(max_line_bytes))
}
