use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::FlvError;
use crate::framing::FULL_FILE_HEADER_SIZE;

/// The 9-byte FLV file header together with the zero PreviousTagSize field
/// that follows it.
///
/// The raw bytes are kept verbatim so a downloader can pass the header
/// through to its output without re-encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvFileHeader {
    pub raw: [u8; FULL_FILE_HEADER_SIZE],
    pub version: u8,
    pub has_audio: bool,
    pub has_video: bool,
}

impl FlvFileHeader {
    /// Read the file header from a stream.
    ///
    /// Unlike tag reads, a short read here is always an error: a stream that
    /// cannot produce 13 bytes is not an FLV stream.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, FlvError>
    where
        R: AsyncRead + Unpin,
    {
        let mut raw = [0u8; FULL_FILE_HEADER_SIZE];
        reader.read_exact(&mut raw).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                FlvError::short_read("file header")
            } else {
                FlvError::Io(e)
            }
        })?;

        if &raw[0..3] != b"FLV" {
            return Err(FlvError::InvalidSignature);
        }

        let version = raw[3];
        let flags = raw[4];

        Ok(FlvFileHeader {
            raw,
            version,
            has_audio: (flags & 0b0000_0100) != 0,
            has_video: (flags & 0b0000_0001) != 0,
        })
    }
}
