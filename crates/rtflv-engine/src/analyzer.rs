//! Resume analysis.
//!
//! Before going online, a resuming worker scans its existing output file to
//! rebuild the keyframe-to-file-offset index the previous run would have
//! held in memory. The index is never persisted; one sequential scan of the
//! part file is cheap compared to the download itself.

use std::collections::BTreeMap;

use flv::{FlvFileHeader, FlvTag, script};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::DownloadError;

#[derive(Debug, Default)]
pub struct AnalyzedFile {
    /// Absolute timestamp (ms) of each video keyframe, mapped to the file
    /// offset of the first byte of its tag.
    pub keyframes: BTreeMap<i64, u64>,
    /// Timestamp of the first media tag in the file, i.e. the absolute start
    /// of this part's segment.
    pub real_offset_ms: Option<i64>,
    /// Declared duration, present only when scanning the first part's file.
    pub duration_secs: Option<f64>,
    pub audio_header_seen: bool,
    pub video_header_seen: bool,
    pub bytes_scanned: u64,
}

/// Scan an existing part file from position 0.
///
/// Only the first part's file carries a file header and the two leading
/// metadata tags; later parts begin directly at a tag boundary. A truncated
/// final tag simply ends the scan — that is the normal shape of an
/// interrupted download.
pub async fn analyze_part_file<R>(
    reader: &mut R,
    is_first_part: bool,
) -> Result<AnalyzedFile, DownloadError>
where
    R: AsyncRead + Unpin,
{
    let mut analyzed = AnalyzedFile::default();
    let mut position: u64 = 0;

    if is_first_part {
        let header = FlvFileHeader::read_from(reader).await?;
        position += header.raw.len() as u64;

        let meta1 = read_script_tag(reader).await?;
        position += meta1.size() as u64;
        let meta2 = read_script_tag(reader).await?;
        position += meta2.size() as u64;

        let duration = script::metadata_number(&meta1.data, "duration")
            .ok_or(DownloadError::MissingDuration)?;
        analyzed.duration_secs = Some(duration);
    }

    while let Some(tag) = FlvTag::read_from(reader).await? {
        if tag.is_sequence_header() {
            if tag.is_audio_sequence_header() {
                analyzed.audio_header_seen = true;
            } else {
                analyzed.video_header_seen = true;
            }
        } else {
            if tag.is_key_frame() {
                analyzed.keyframes.insert(tag.timestamp_ms as i64, position);
            }
            if analyzed.real_offset_ms.is_none() && (tag.is_audio_tag() || tag.is_video_tag()) {
                analyzed.real_offset_ms = Some(tag.timestamp_ms as i64);
            }
        }
        position += tag.size() as u64;
    }

    analyzed.bytes_scanned = position;
    debug!(
        keyframes = analyzed.keyframes.len(),
        real_offset = ?analyzed.real_offset_ms,
        bytes = position,
        "analyzed existing part file"
    );
    Ok(analyzed)
}

async fn read_script_tag<R>(reader: &mut R) -> Result<FlvTag, DownloadError>
where
    R: AsyncRead + Unpin,
{
    match FlvTag::read_from(reader).await? {
        Some(tag) if tag.is_script_tag() => Ok(tag),
        _ => Err(DownloadError::MissingMetadata),
    }
}
