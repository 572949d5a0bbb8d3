//! Synthetic FLV wire data and a stub transport for engine tests.
//!
//! The stub server models the real thing: seekable, keyframes on a fixed
//! grid, `timeBase` snapped down to the keyframe the seek landed on, wire
//! timestamps relative to that keyframe, and an in-band end-of-stream
//! sentinel once the declared duration is reached.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;

use crate::UrlBuilder;
use crate::error::DownloadError;
use crate::transport::{MediaStream, Transport};

pub const KEYFRAME_INTERVAL_MS: i64 = 200;
pub const FRAME_INTERVAL_MS: i64 = 20;

pub fn file_header() -> Vec<u8> {
    let mut out = Vec::with_capacity(13);
    out.extend_from_slice(b"FLV\x01\x05");
    out.extend_from_slice(&9u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out
}

pub fn raw_tag(kind: u8, timestamp_ms: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(11 + body.len() + 4);
    out.push(kind);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.push((timestamp_ms >> 16) as u8);
    out.push((timestamp_ms >> 8) as u8);
    out.push(timestamp_ms as u8);
    out.push((timestamp_ms >> 24) as u8);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(body);
    out.extend_from_slice(&((11 + body.len()) as u32).to_be_bytes());
    out
}

pub fn script_tag(timestamp_ms: u32, pairs: &[(&str, f64)]) -> Vec<u8> {
    let mut body = vec![0x02, 0x00, 0x0A];
    body.extend_from_slice(b"onMetaData");
    body.push(0x08);
    body.extend_from_slice(&(pairs.len() as u32).to_be_bytes());
    for (key, value) in pairs {
        body.extend_from_slice(&(key.len() as u16).to_be_bytes());
        body.extend_from_slice(key.as_bytes());
        body.push(0x00);
        body.extend_from_slice(&value.to_be_bytes());
    }
    body.extend_from_slice(&[0x00, 0x00, 0x09]);
    raw_tag(0x12, timestamp_ms, &body)
}

pub fn audio_sequence_header(timestamp_ms: u32) -> Vec<u8> {
    raw_tag(0x08, timestamp_ms, &[0xAF, 0x00, 0x12, 0x10])
}

pub fn audio_frame(timestamp_ms: u32) -> Vec<u8> {
    raw_tag(0x08, timestamp_ms, &[0xAF, 0x01, 0x21, 0x00, 0x55])
}

pub fn video_sequence_header(timestamp_ms: u32) -> Vec<u8> {
    raw_tag(0x09, timestamp_ms, &[0x17, 0x00, 0x01, 0x64, 0x00, 0x1F])
}

pub fn video_keyframe(timestamp_ms: u32) -> Vec<u8> {
    raw_tag(0x09, timestamp_ms, &[0x17, 0x01, 0x00, 0x00, 0x00, 0xAA])
}

pub fn video_interframe(timestamp_ms: u32) -> Vec<u8> {
    raw_tag(0x09, timestamp_ms, &[0x27, 0x01, 0x00, 0x00, 0x00, 0xBB])
}

pub fn end_of_stream_tag() -> Vec<u8> {
    raw_tag(0xFF, 0, &[])
}

/// Media tags covering `[from_ms, to_ms)` on the test cadence: one tag every
/// 20 ms, video on even 40 ms ticks (keyframes on the 200 ms grid), audio in
/// between. Timestamps are emitted relative to `wire_base_ms`.
pub fn media_tags(from_ms: i64, to_ms: i64, wire_base_ms: i64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut t = from_ms;
    while t < to_ms {
        let wire = (t - wire_base_ms) as u32;
        if t % 40 == 0 {
            if t % KEYFRAME_INTERVAL_MS == 0 {
                out.extend(video_keyframe(wire));
            } else {
                out.extend(video_interframe(wire));
            }
        } else {
            out.extend(audio_frame(wire));
        }
        t += FRAME_INTERVAL_MS;
    }
    out
}

/// Snap a requested seek position down to the keyframe grid, like the test
/// server does.
pub fn snap_to_keyframe(ms: i64) -> i64 {
    (ms / KEYFRAME_INTERVAL_MS) * KEYFRAME_INTERVAL_MS
}

/// The full wire image the stub server returns for a seek request:
/// file header, duration/filesize metadata, `timeBase` metadata, sequence
/// headers, media up to the declared duration, then the EOS sentinel.
/// `cut_at_abs_ms` truncates the media mid-stream with no sentinel,
/// simulating a premature close.
pub fn server_stream(seek_secs: f64, duration_secs: f64, cut_at_abs_ms: Option<i64>) -> Vec<u8> {
    let duration_ms = (duration_secs * 1000.0).round() as i64;
    let requested_ms = (seek_secs * 1000.0).round() as i64;
    let time_base_ms = snap_to_keyframe(requested_ms);

    let mut out = file_header();
    out.extend(script_tag(
        0,
        &[("duration", duration_secs), ("filesize", 1_000_000.0)],
    ));
    out.extend(script_tag(0, &[("timeBase", time_base_ms as f64 / 1000.0)]));
    out.extend(audio_sequence_header(0));
    out.extend(video_sequence_header(0));

    let to_ms = cut_at_abs_ms.map_or(duration_ms, |cut| cut.min(duration_ms));
    out.extend(media_tags(time_base_ms, to_ms, time_base_ms));

    if cut_at_abs_ms.is_none_or(|cut| cut >= duration_ms) {
        out.extend(end_of_stream_tag());
    }
    out
}

/// URL capability used by the tests; the stub transport parses the seek
/// parameter back out of it.
pub fn test_url_fn() -> UrlBuilder {
    Arc::new(|seconds| format!("test://stream?seek={seconds}"))
}

pub fn seek_param(url: &str) -> f64 {
    url.rsplit_once("seek=")
        .and_then(|(_, value)| value.split('&').next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0.0)
}

type OpenFn = Box<dyn Fn(&str) -> Result<MediaStream, DownloadError> + Send + Sync>;

/// Transport stub; each `open` is answered by a closure over the URL.
pub struct StubTransport {
    open_fn: OpenFn,
}

impl StubTransport {
    pub fn new<F>(open_fn: F) -> Self
    where
        F: Fn(&str) -> Result<MediaStream, DownloadError> + Send + Sync + 'static,
    {
        Self {
            open_fn: Box::new(open_fn),
        }
    }

    /// Serve FLV bytes computed from the URL.
    pub fn flv<F>(bytes_fn: F) -> Self
    where
        F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    {
        Self::new(move |url| {
            Ok(MediaStream {
                content_type: "video/x-flv".to_string(),
                reader: Box::new(Cursor::new(bytes_fn(url))),
            })
        })
    }

    /// A well-behaved seekable server for a stream of the given duration.
    pub fn server(duration_secs: f64) -> Self {
        Self::flv(move |url| server_stream(seek_param(url), duration_secs, None))
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn open(&self, url: &str) -> Result<MediaStream, DownloadError> {
        (self.open_fn)(url)
    }
}
