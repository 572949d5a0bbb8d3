use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FlvError;
use crate::framing::{self, PREV_TAG_SIZE_FIELD_SIZE, TAG_HEADER_SIZE};

/// An FLV tag together with its raw wire image.
///
/// `raw` covers the 11-byte prefix, the body and the 4-byte trailing
/// previous-tag-size field; `data` is a zero-copy slice of the body. Keeping
/// the wire image around lets a writer pass tags through with only the
/// timestamp fields rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds, reassembled as a signed 32-bit value with
    /// the sign bit of the extended byte masked off.
    pub timestamp_ms: i32,
    pub stream_id: u32,
    pub data: Bytes,
    pub raw: Bytes,
}

impl FlvTag {
    /// Read the next tag from a stream.
    ///
    /// Returns `Ok(None)` when the stream ends, whether at a tag boundary or
    /// in the middle of one; the caller decides whether that is a premature
    /// close. The trailing previous-tag-size field is read but not validated
    /// against the prefix size. Tags of unknown kind are returned as-is.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<FlvTag>, FlvError>
    where
        R: AsyncRead + Unpin,
    {
        let mut prefix = [0u8; TAG_HEADER_SIZE];
        match reader.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(FlvError::Io(e)),
        }

        let header = framing::parse_tag_header_bytes(prefix);
        let total = TAG_HEADER_SIZE + header.data_size as usize + PREV_TAG_SIZE_FIELD_SIZE;

        let mut raw = BytesMut::with_capacity(total);
        raw.extend_from_slice(&prefix);
        raw.resize(total, 0);

        match reader.read_exact(&mut raw[TAG_HEADER_SIZE..]).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(FlvError::Io(e)),
        }

        let raw = raw.freeze();
        let data = raw.slice(TAG_HEADER_SIZE..TAG_HEADER_SIZE + header.data_size as usize);

        Ok(Some(FlvTag {
            tag_type: header.tag_type,
            timestamp_ms: header.timestamp_ms,
            stream_id: header.stream_id,
            data,
            raw,
        }))
    }

    /// Write the raw tag image with the timestamp shifted by
    /// `additive_offset_ms`. Every byte other than the four timestamp bytes
    /// is written unchanged. Returns the number of bytes written.
    pub async fn write_to<W>(&self, writer: &mut W, additive_offset_ms: i64) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let shifted = (self.timestamp_ms as i64 + additive_offset_ms) as u32;
        let mut out = BytesMut::from(self.raw.as_ref());
        framing::patch_timestamp_bytes(&mut out, shifted);
        writer.write_all(&out).await?;
        Ok(out.len() as u64)
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn is_audio_tag(&self) -> bool {
        matches!(self.tag_type, FlvTagType::Audio)
    }

    pub fn is_video_tag(&self) -> bool {
        matches!(self.tag_type, FlvTagType::Video)
    }

    pub fn is_script_tag(&self) -> bool {
        matches!(self.tag_type, FlvTagType::ScriptData)
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.tag_type, FlvTagType::EndOfStream)
    }

    /// AAC sequence header: sound format 10 with packet type 0.
    pub fn is_audio_sequence_header(&self) -> bool {
        self.is_audio_tag()
            && self.data.len() >= 2
            && (self.data[0] >> 4) == 10
            && self.data[1] == 0
    }

    /// AVC sequence header: codec id 7 with packet type 0.
    pub fn is_video_sequence_header(&self) -> bool {
        self.is_video_tag()
            && self.data.len() >= 2
            && (self.data[0] & 0x0F) == 7
            && self.data[1] == 0
    }

    pub fn is_sequence_header(&self) -> bool {
        self.is_audio_sequence_header() || self.is_video_sequence_header()
    }

    /// Video tag whose frame-type nibble is 1, i.e. a legal restart point.
    pub fn is_key_frame(&self) -> bool {
        self.is_video_tag() && !self.data.is_empty() && (self.data[0] >> 4) == 1
    }
}

/// FLV Tag Type
///
/// Audio (8), Video (9) and ScriptData (18) are the kinds defined by the FLV
/// container. 0xFF is an in-band end-of-stream sentinel some seekable servers
/// emit instead of closing the connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio = 8,
    Video = 9,
    ScriptData = 18,
    Unknown(u8),
    EndOfStream = 0xFF,
}

impl From<u8> for FlvTagType {
    fn from(value: u8) -> Self {
        match value {
            8 => FlvTagType::Audio,
            9 => FlvTagType::Video,
            18 => FlvTagType::ScriptData,
            0xFF => FlvTagType::EndOfStream,
            _ => FlvTagType::Unknown(value),
        }
    }
}

impl From<FlvTagType> for u8 {
    fn from(value: FlvTagType) -> Self {
        match value {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::ScriptData => 18,
            FlvTagType::EndOfStream => 0xFF,
            FlvTagType::Unknown(val) => val,
        }
    }
}

impl fmt::Display for FlvTagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlvTagType::Audio => write!(f, "Audio"),
            FlvTagType::Video => write!(f, "Video"),
            FlvTagType::ScriptData => write!(f, "Script"),
            FlvTagType::EndOfStream => write!(f, "EndOfStream"),
            FlvTagType::Unknown(value) => write!(f, "Unknown({value})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn raw_tag(kind: u8, timestamp_ms: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(TAG_HEADER_SIZE + body.len() + 4);
        out.push(kind);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        out.push((timestamp_ms >> 16) as u8);
        out.push((timestamp_ms >> 8) as u8);
        out.push(timestamp_ms as u8);
        out.push((timestamp_ms >> 24) as u8);
        out.extend_from_slice(&[0, 0, 0]); // stream id
        out.extend_from_slice(body);
        out.extend_from_slice(&((TAG_HEADER_SIZE + body.len()) as u32).to_be_bytes());
        out
    }

    #[tokio::test]
    async fn reads_a_tag_with_raw_image() {
        let bytes = raw_tag(0x09, 123_456, &[0x17, 0x01, 0xAA, 0xBB]);
        let mut reader = Cursor::new(bytes.clone());

        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();
        assert_eq!(tag.tag_type, FlvTagType::Video);
        assert_eq!(tag.timestamp_ms, 123_456);
        assert_eq!(&tag.data[..], &[0x17, 0x01, 0xAA, 0xBB]);
        assert_eq!(&tag.raw[..], &bytes[..]);

        // Nothing left, clean EOF.
        assert!(FlvTag::read_from(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_body_reads_as_end_of_stream() {
        let mut bytes = raw_tag(0x08, 40, &[0xAF, 0x01, 0x00, 0x11, 0x22]);
        bytes.truncate(bytes.len() - 6);
        let mut reader = Cursor::new(bytes);

        assert!(FlvTag::read_from(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_kind_is_returned_as_is() {
        let bytes = raw_tag(0x2A, 0, &[1, 2, 3]);
        let mut reader = Cursor::new(bytes);

        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();
        assert_eq!(tag.tag_type, FlvTagType::Unknown(0x2A));
    }

    #[tokio::test]
    async fn end_of_stream_sentinel_kind() {
        let bytes = raw_tag(0xFF, 0, &[]);
        let mut reader = Cursor::new(bytes);

        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();
        assert!(tag.is_end_of_stream());
        assert_eq!(tag.timestamp_ms, 0);
    }

    #[tokio::test]
    async fn write_rewrites_only_the_timestamp_bytes() {
        let bytes = raw_tag(0x09, 1_000, &[0x17, 0x01, 0xDE, 0xAD]);
        let mut reader = Cursor::new(bytes.clone());
        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();

        let mut out = Cursor::new(Vec::new());
        let written = tag.write_to(&mut out, 30_040).await.unwrap();
        let out = out.into_inner();

        assert_eq!(written as usize, bytes.len());
        assert_eq!(out.len(), bytes.len());
        for (i, (a, b)) in bytes.iter().zip(out.iter()).enumerate() {
            if (4..8).contains(&i) {
                continue;
            }
            assert_eq!(a, b, "byte {i} changed");
        }

        let shifted = 1_000u32 + 30_040;
        assert_eq!(out[4], (shifted >> 16) as u8);
        assert_eq!(out[5], (shifted >> 8) as u8);
        assert_eq!(out[6], shifted as u8);
        assert_eq!(out[7], (shifted >> 24) as u8);
    }

    #[tokio::test]
    async fn sequence_header_and_keyframe_predicates() {
        let aac_header = raw_tag(0x08, 0, &[0xAF, 0x00, 0x12, 0x10]);
        let aac_frame = raw_tag(0x08, 23, &[0xAF, 0x01, 0x21]);
        let avc_header = raw_tag(0x09, 0, &[0x17, 0x00, 0x01, 0x64]);
        let avc_keyframe = raw_tag(0x09, 33, &[0x17, 0x01, 0x00]);
        let avc_interframe = raw_tag(0x09, 66, &[0x27, 0x01, 0x00]);

        let mut all = Vec::new();
        for b in [&aac_header, &aac_frame, &avc_header, &avc_keyframe, &avc_interframe] {
            all.extend_from_slice(b);
        }
        let mut reader = Cursor::new(all);

        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();
        assert!(tag.is_audio_sequence_header());
        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();
        assert!(!tag.is_sequence_header());
        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();
        assert!(tag.is_video_sequence_header());
        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();
        assert!(tag.is_key_frame());
        assert!(!tag.is_sequence_header());
        let tag = FlvTag::read_from(&mut reader).await.unwrap().unwrap();
        assert!(!tag.is_key_frame());
    }
}
