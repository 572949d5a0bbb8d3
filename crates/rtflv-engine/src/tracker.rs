use flv::{FlvTag, FlvTagType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy)]
struct KindState {
    header_written: bool,
    last_timestamp_ms: i64,
}

/// Per-part bookkeeping for the two media streams.
///
/// Tracks, for each kind, whether its sequence header has been emitted and
/// the last timestamp written, which together decide whether a tag read from
/// the wire is written to the output.
#[derive(Debug, Clone)]
pub struct StreamTracker {
    audio: KindState,
    video: KindState,
}

impl StreamTracker {
    /// `emit_sequence_headers` is true only for the first part: sequence
    /// headers must appear exactly once in the joined file, before all media
    /// of their kind, so every later part starts with them already counted
    /// as written.
    pub fn new(emit_sequence_headers: bool) -> Self {
        let state = KindState {
            header_written: !emit_sequence_headers,
            last_timestamp_ms: -1,
        };
        Self {
            audio: state,
            video: state,
        }
    }

    pub fn kind_of(tag: &FlvTag) -> Option<MediaKind> {
        match tag.tag_type {
            FlvTagType::Audio => Some(MediaKind::Audio),
            FlvTagType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Decide whether a tag read from the wire should be written.
    ///
    /// Non-media tags are dropped. A sequence header is written once per
    /// kind. Anything else is written iff its shifted timestamp advances the
    /// stream: duplicates are dropped, strictly.
    pub fn should_handle(&self, tag: &FlvTag, offset_ms: i64) -> bool {
        let Some(kind) = Self::kind_of(tag) else {
            return false;
        };
        let state = self.state(kind);
        if tag.is_sequence_header() {
            !state.header_written
        } else {
            tag.timestamp_ms as i64 + offset_ms > state.last_timestamp_ms
        }
    }

    pub fn mark_header_written(&mut self, kind: MediaKind) {
        self.state_mut(kind).header_written = true;
    }

    pub fn header_written(&self, kind: MediaKind) -> bool {
        self.state(kind).header_written
    }

    pub fn record_timestamp(&mut self, kind: MediaKind, timestamp_ms: i64) {
        self.state_mut(kind).last_timestamp_ms = timestamp_ms;
    }

    pub fn last_timestamp(&self, kind: MediaKind) -> i64 {
        self.state(kind).last_timestamp_ms
    }

    pub fn max_last_timestamp(&self) -> i64 {
        self.audio.last_timestamp_ms.max(self.video.last_timestamp_ms)
    }

    /// Rewind both streams to `timestamp_ms`, used when the output file is
    /// seeked back to a keyframe whose tail will be overwritten.
    pub fn rewind_timestamps(&mut self, timestamp_ms: i64) {
        self.audio.last_timestamp_ms = timestamp_ms;
        self.video.last_timestamp_ms = timestamp_ms;
    }

    fn state(&self, kind: MediaKind) -> &KindState {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    fn state_mut(&mut self, kind: MediaKind) -> &mut KindState {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}
