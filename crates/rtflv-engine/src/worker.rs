//! Per-part download worker.
//!
//! One worker runs per part, owns its output file and its network stream,
//! and drives the per-part state machine: settle the start time (resume,
//! part-0 zero, or coordinator-assigned), open the stream, report the
//! discovered boundary, wait for the end time, then stream tags through the
//! filter until a stop condition. Workers never surface errors directly;
//! they emit diagnostics as messages and end with a single terminal status.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flv::{FlvFileHeader, FlvTag, script};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::UrlBuilder;
use crate::analyzer;
use crate::error::DownloadError;
use crate::message::{PartOutcome, StartRequest, WorkerCommand, WorkerMessage};
use crate::tracker::{MediaKind, StreamTracker};
use crate::transport::{BoxReader, Transport};

/// Output path for a part: part 0 owns the target file itself, later parts
/// write `<target>.part<i>` until the join.
pub(crate) fn part_file_path(base: &Path, part: u32) -> PathBuf {
    if part == 0 {
        base.to_path_buf()
    } else {
        let mut name = OsString::from(base.as_os_str());
        name.push(format!(".part{part}"));
        PathBuf::from(name)
    }
}

pub struct PartWorker {
    part: u32,
    parts: u32,
    base_path: PathBuf,
    url_fn: UrlBuilder,
    transport: Arc<dyn Transport>,
    resume: bool,
    commands: mpsc::Receiver<WorkerCommand>,
    messages: mpsc::Sender<WorkerMessage>,
}

/// An open stream positioned just past its leading metadata.
struct OpenedStream {
    reader: BufReader<BoxReader>,
    header: FlvFileHeader,
    meta1: FlvTag,
    meta2: FlvTag,
    duration_secs: Option<f64>,
    filesize: Option<f64>,
    time_base_ms: i64,
}

/// Streaming-phase state, carried across premature-close restarts.
struct PartSession {
    file: File,
    file_pos: u64,
    tracker: StreamTracker,
    keyframes: BTreeMap<i64, u64>,
    /// Additive adjustment applied to wire timestamps when writing.
    offset: i64,
    end_time: i64,
    real_offset: i64,
    found_first_tag: bool,
}

enum StreamEnd {
    Finished,
    PrematureClose,
}

impl PartWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        part: u32,
        parts: u32,
        base_path: PathBuf,
        url_fn: UrlBuilder,
        transport: Arc<dyn Transport>,
        resume: bool,
        commands: mpsc::Receiver<WorkerCommand>,
        messages: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        Self {
            part,
            parts,
            base_path,
            url_fn,
            transport,
            resume,
            commands,
            messages,
        }
    }

    /// Run the part to completion. The terminal status message is always the
    /// last thing sent.
    pub async fn run(mut self) {
        let outcome = match self.execute().await {
            Ok(()) => PartOutcome::Success,
            Err(DownloadError::Cancelled) => {
                self.send_debug("Aborting".to_string()).await;
                PartOutcome::Failed
            }
            Err(e) => {
                self.send_info(format!("{e}. Aborting")).await;
                PartOutcome::Failed
            }
        };
        self.send(WorkerMessage::Status {
            part: self.part,
            outcome,
        })
        .await;
    }

    async fn execute(&mut self) -> Result<(), DownloadError> {
        let path = part_file_path(&self.base_path, self.part);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(!self.resume)
            .open(&path)
            .await?;
        self.send_debug(format!("Opened {}", path.display())).await;

        let mut keyframes: BTreeMap<i64, u64> = BTreeMap::new();
        let mut tracker = StreamTracker::new(self.part == 0);
        let mut real_offset: Option<i64> = None;

        if self.resume && file.metadata().await?.len() > 0 {
            let analyzed = {
                let mut reader = BufReader::new(&mut file);
                analyzer::analyze_part_file(&mut reader, self.part == 0).await
            };
            file.seek(SeekFrom::Start(0)).await?;
            match analyzed {
                Ok(analyzed) => {
                    self.send_debug(format!(
                        "Found {} keyframes in existing file",
                        analyzed.keyframes.len()
                    ))
                    .await;
                    keyframes = analyzed.keyframes;
                    if analyzed.audio_header_seen {
                        tracker.mark_header_written(MediaKind::Audio);
                    }
                    if analyzed.video_header_seen {
                        tracker.mark_header_written(MediaKind::Video);
                    }
                    real_offset = analyzed.real_offset_ms;
                }
                // Part 0 cannot recover a duration from a broken file.
                Err(e) if self.part == 0 => return Err(e),
                Err(e) => {
                    self.send_info(format!("Existing part file unusable: {e}"))
                        .await;
                }
            }
        }

        let resumed = if keyframes.is_empty() {
            None
        } else {
            self.try_resume(&keyframes).await?
        };

        let mut file_pos: u64 = 0;
        let fresh = resumed.is_none();
        let start_time: i64;

        let opened = match resumed {
            Some(stream) => {
                start_time = stream.time_base_ms;
                file_pos = keyframes[&start_time];
                file.seek(SeekFrom::Start(file_pos)).await?;
                tracker.rewind_timestamps(start_time - 1);
                self.send(WorkerMessage::NeedStart {
                    part: self.part,
                    request: StartRequest::Known {
                        start_time_ms: start_time,
                        real_offset_ms: real_offset,
                    },
                })
                .await;
                stream
            }
            None => {
                // A fresh pass rewrites the file from the top; analysis
                // bookkeeping would point into the stale tail.
                keyframes.clear();
                tracker = StreamTracker::new(self.part == 0);
                real_offset = None;

                if self.part == 0 {
                    start_time = 0;
                    self.send(WorkerMessage::NeedStart {
                        part: self.part,
                        request: StartRequest::Known {
                            start_time_ms: 0,
                            real_offset_ms: None,
                        },
                    })
                    .await;
                } else {
                    self.send(WorkerMessage::NeedStart {
                        part: self.part,
                        request: StartRequest::Assign,
                    })
                    .await;
                    start_time = self.await_start().await?;
                    self.send_debug(format!("Got start time {start_time}")).await;
                }

                self.open_at(start_time as f64 / 1000.0).await?
            }
        };

        if fresh && self.part == 0 {
            file.write_all(&opened.header.raw).await?;
            file_pos += opened.header.raw.len() as u64;
            file_pos += opened.meta1.write_to(&mut file, 0).await?;
            file_pos += opened.meta2.write_to(&mut file, 0).await?;
            self.send_debug("Wrote FLV header and metadata".to_string())
                .await;
        }

        if self.part == 0 {
            let duration = opened.duration_secs.ok_or(DownloadError::MissingDuration)?;
            self.send_debug(format!(
                "Found duration ({duration}), filesize ({:?})",
                opened.filesize
            ))
            .await;
            self.send(WorkerMessage::Duration {
                part: self.part,
                seconds: duration,
            })
            .await;
            if let Some(bytes) = opened.filesize {
                self.send(WorkerMessage::Filesize {
                    part: self.part,
                    bytes: bytes as u64,
                })
                .await;
            }
        }

        // First ever pass pins the real offset; restarts keep it.
        let real_offset = real_offset.unwrap_or(opened.time_base_ms);

        self.send(WorkerMessage::NeedEnd {
            part: self.part,
            real_offset_ms: real_offset,
        })
        .await;
        let end_time = self.await_end().await?;
        self.send_debug(format!("Got end time {end_time}")).await;

        let mut session = PartSession {
            file,
            file_pos,
            tracker,
            keyframes,
            offset: opened.time_base_ms,
            end_time,
            real_offset,
            found_first_tag: false,
        };
        let mut reader = opened.reader;

        loop {
            match self.stream_tags(&mut session, &mut reader).await? {
                StreamEnd::Finished => break,
                StreamEnd::PrematureClose => {
                    self.send_info("Stream closed prematurely, resuming from last keyframe".to_string())
                        .await;
                    match self.try_resume(&session.keyframes).await? {
                        Some(stream) => {
                            let at = stream.time_base_ms;
                            session.file_pos = session.keyframes[&at];
                            session.file.seek(SeekFrom::Start(session.file_pos)).await?;
                            session.tracker.rewind_timestamps(at - 1);
                            session.offset = at;
                            session.found_first_tag = false;
                            reader = stream.reader;
                        }
                        None => return Err(DownloadError::ResumeExhausted),
                    }
                }
            }
        }

        session.file.set_len(session.file_pos).await?;
        session.file.flush().await?;
        self.send_debug(format!("Done at {} bytes", session.file_pos))
            .await;
        Ok(())
    }

    /// Read tags until a stop condition, applying the filter and offset
    /// rules to each.
    async fn stream_tags(
        &mut self,
        s: &mut PartSession,
        reader: &mut BufReader<BoxReader>,
    ) -> Result<StreamEnd, DownloadError> {
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::Stop) => return Err(DownloadError::Cancelled),
                Ok(WorkerCommand::EndAt(t)) => {
                    s.end_time = t;
                    self.send_debug(format!("Got new end time {t}")).await;
                }
                Ok(WorkerCommand::StartAt(_)) => {}
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(DownloadError::Cancelled);
                }
            }

            let tag = match FlvTag::read_from(reader).await {
                Ok(Some(tag)) => tag,
                Ok(None) => return Ok(StreamEnd::PrematureClose),
                Err(e) => {
                    self.send_debug(format!("Read error: {e}")).await;
                    return Ok(StreamEnd::PrematureClose);
                }
            };

            let handled = s.tracker.should_handle(&tag, s.offset);
            let wire_ts = tag.timestamp_ms as i64;
            let is_sequence_header = tag.is_sequence_header();

            // The first media tag of a pass lands exactly on the declared
            // boundary; any nonzero wire timestamp is absorbed into the
            // offset, which also extends the budget below by the same
            // amount.
            if handled && !is_sequence_header && !s.found_first_tag {
                s.found_first_tag = true;
                if wire_ts != 0 {
                    s.offset -= wire_ts;
                    self.send_debug(format!(
                        "First tag at {wire_ts}, offset now {}",
                        s.offset
                    ))
                    .await;
                }
            }

            if !is_sequence_header {
                if tag.is_end_of_stream() && wire_ts == 0 && self.is_last_part() {
                    let residual = s.end_time - s.tracker.max_last_timestamp();
                    self.send_info(format!("End of stream {residual} ms before expected end"))
                        .await;
                    return Ok(StreamEnd::Finished);
                }

                let budget = s.end_time - s.offset;
                if wire_ts >= budget {
                    if !self.is_last_part() && !(wire_ts == budget && tag.is_key_frame()) {
                        self.send_info(format!(
                            "Ended off expected keyframe at {}",
                            wire_ts + s.offset
                        ))
                        .await;
                    }
                    self.send_debug(format!("Finished at {}", s.end_time)).await;
                    return Ok(StreamEnd::Finished);
                }
            }

            if handled {
                if let Some(kind) = StreamTracker::kind_of(&tag) {
                    if is_sequence_header {
                        s.tracker.mark_header_written(kind);
                    } else {
                        s.tracker.record_timestamp(kind, wire_ts + s.offset);
                    }
                }

                if tag.is_key_frame() && !is_sequence_header {
                    s.keyframes.insert(wire_ts + s.offset, s.file_pos);
                    let span = s.end_time - s.real_offset;
                    let fraction = if span > 0 {
                        ((wire_ts + s.offset - s.real_offset) as f64 / span as f64).clamp(0.0, 1.0)
                    } else {
                        1.0
                    };
                    self.send(WorkerMessage::Progress {
                        part: self.part,
                        fraction,
                    })
                    .await;
                }

                s.file_pos += tag.write_to(&mut s.file, s.offset).await?;
            }
        }
    }

    /// Reopen the stream at the latest known keyframe, walking earlier on
    /// misalignment. `None` means every candidate is exhausted.
    async fn try_resume(
        &mut self,
        keyframes: &BTreeMap<i64, u64>,
    ) -> Result<Option<OpenedStream>, DownloadError> {
        for &candidate in keyframes.keys().rev() {
            let seconds = candidate as f64 / 1000.0;
            match self.open_at(seconds).await {
                Ok(stream) => {
                    if keyframes.contains_key(&stream.time_base_ms) {
                        self.send_debug(format!("Resuming at keyframe {}", stream.time_base_ms))
                            .await;
                        return Ok(Some(stream));
                    }
                    self.send_info(format!(
                        "Stream starts at unknown keyframe {}",
                        stream.time_base_ms
                    ))
                    .await;
                }
                Err(e @ DownloadError::WrongContentType { .. }) => return Err(e),
                Err(e) => {
                    self.send_info(format!("Reopen at {seconds}s failed: {e}"))
                        .await;
                }
            }
        }
        Ok(None)
    }

    /// Open the stream at `seconds` and read past its head: file header plus
    /// the two leading metadata tags.
    async fn open_at(&mut self, seconds: f64) -> Result<OpenedStream, DownloadError> {
        let url = (self.url_fn)(seconds);
        self.send_debug(format!("Opening {url}")).await;

        let media = self.transport.open(&url).await?;
        if media.content_type != "video/x-flv" {
            return Err(DownloadError::wrong_content_type(url, media.content_type));
        }

        let mut reader = BufReader::new(media.reader);
        let header = FlvFileHeader::read_from(&mut reader).await?;
        let meta1 = read_script_tag(&mut reader).await?;
        let meta2 = read_script_tag(&mut reader).await?;

        let duration_secs = script::metadata_number(&meta1.data, "duration");
        let filesize = script::metadata_number(&meta1.data, "filesize");
        let time_base = script::metadata_number(&meta2.data, "timeBase")
            .or_else(|| script::metadata_number(&meta1.data, "timeBase"))
            .ok_or(DownloadError::MissingTimeBase)?;
        let time_base_ms = (time_base * 1000.0).round() as i64;

        self.send_debug(format!("Stream starts at {time_base_ms}")).await;

        Ok(OpenedStream {
            reader,
            header,
            meta1,
            meta2,
            duration_secs,
            filesize,
            time_base_ms,
        })
    }

    async fn await_start(&mut self) -> Result<i64, DownloadError> {
        loop {
            match self.commands.recv().await {
                Some(WorkerCommand::StartAt(t)) => return Ok(t),
                Some(WorkerCommand::EndAt(_)) => {}
                Some(WorkerCommand::Stop) | None => return Err(DownloadError::Cancelled),
            }
        }
    }

    async fn await_end(&mut self) -> Result<i64, DownloadError> {
        loop {
            match self.commands.recv().await {
                Some(WorkerCommand::EndAt(t)) => return Ok(t),
                Some(WorkerCommand::StartAt(_)) => {}
                Some(WorkerCommand::Stop) | None => return Err(DownloadError::Cancelled),
            }
        }
    }

    fn is_last_part(&self) -> bool {
        self.part + 1 == self.parts
    }

    async fn send(&self, message: WorkerMessage) {
        let _ = self.messages.send(message).await;
    }

    async fn send_debug(&self, message: String) {
        self.send(WorkerMessage::Debug {
            part: self.part,
            message,
        })
        .await;
    }

    async fn send_info(&self, message: String) {
        self.send(WorkerMessage::Info {
            part: self.part,
            message,
        })
        .await;
    }
}

async fn read_script_tag(reader: &mut BufReader<BoxReader>) -> Result<FlvTag, DownloadError> {
    match FlvTag::read_from(reader).await? {
        Some(tag) if tag.is_script_tag() => Ok(tag),
        _ => Err(DownloadError::MissingMetadata),
    }
}
