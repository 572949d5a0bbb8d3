//! Download coordinator.
//!
//! Launches one worker per part, turns the workers' independently discovered
//! timing information into agreed-upon boundaries, aggregates progress and
//! failure, and joins the part files when everything succeeds.
//!
//! Part 0 runs first: its stream declares the total duration, without which
//! the remaining parts cannot be placed. Start times are only assigned once
//! every part has reported whether it needs one, and end times once every
//! part has reported its discovered real offset — so the order in which
//! workers race through their handshakes does not matter.

use std::path::Path;
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::UrlBuilder;
use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::events::{Event, EventBus};
use crate::message::{PartOutcome, StartRequest, WorkerCommand, WorkerMessage};
use crate::transport::{HttpTransport, Transport};
use crate::worker::{PartWorker, part_file_path};

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSummary {
    /// Effective duration downloaded, in seconds.
    pub duration_secs: f64,
    /// Declared remote filesize, when the stream advertised one.
    pub filesize: Option<u64>,
}

/// Coordinator-side bookkeeping for one worker.
struct PartHandle {
    commands: mpsc::Sender<WorkerCommand>,
    task: JoinHandle<()>,
    start: Option<StartRequest>,
    real_offset: Option<i64>,
    end_needed: bool,
    done: bool,
}

pub struct ParallelDownloader {
    transport: Arc<dyn Transport>,
    config: DownloadConfig,
    events: EventBus,
}

impl ParallelDownloader {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: DownloadConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config,
            events: EventBus::new(),
        }
    }

    /// Observers are connected here, before the download starts.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Download the stream behind `url_fn` into `output` in
    /// `config.parts` parallel parts and join the results.
    pub async fn download(
        &mut self,
        url_fn: UrlBuilder,
        output: &Path,
    ) -> Result<DownloadSummary, DownloadError> {
        let n = self.config.parts as usize;
        if n == 0 {
            return Err(DownloadError::configuration("parts must be at least 1"));
        }

        let (msg_tx, mut msg_rx) = mpsc::channel(64);
        let mut parts: Vec<PartHandle> = Vec::with_capacity(n);
        parts.push(self.spawn_worker(0, &url_fn, output, &msg_tx));

        let mut effective_ms: Option<i64> = None;
        let mut effective_secs = 0.0;
        let mut filesize = None;
        let mut starts_dispatched = false;
        let mut ends_dispatched = false;

        loop {
            let Some(message) = msg_rx.recv().await else {
                return Err(DownloadError::ChannelClosed);
            };

            match message {
                WorkerMessage::Debug { part, message } => {
                    self.events.emit(&Event::Debug {
                        message,
                        part: Some(part),
                    });
                }
                WorkerMessage::Info { part, message } => {
                    self.events.emit(&Event::Info {
                        message,
                        part: Some(part),
                    });
                }
                WorkerMessage::Filesize { bytes, .. } => {
                    filesize = Some(bytes);
                    self.events.emit(&Event::GotFilesize(bytes));
                }
                WorkerMessage::Duration { seconds, .. } => {
                    if effective_ms.is_some() {
                        continue;
                    }
                    effective_secs = self.config.effective_duration(seconds);
                    effective_ms = Some((effective_secs * 1000.0).round() as i64);
                    self.events.emit(&Event::GotDuration(effective_secs));

                    // Only now can the remaining parts be placed.
                    for part in 1..n as u32 {
                        parts.push(self.spawn_worker(part, &url_fn, output, &msg_tx));
                    }
                    dispatch_starts_if_ready(
                        &mut parts,
                        n,
                        effective_ms,
                        &mut starts_dispatched,
                        &mut self.events,
                    )
                    .await;
                }
                WorkerMessage::NeedStart { part, request } => {
                    parts[part as usize].start = Some(request);
                    dispatch_starts_if_ready(
                        &mut parts,
                        n,
                        effective_ms,
                        &mut starts_dispatched,
                        &mut self.events,
                    )
                    .await;
                }
                WorkerMessage::NeedEnd {
                    part,
                    real_offset_ms,
                } => {
                    let handle = &mut parts[part as usize];
                    handle.real_offset = Some(real_offset_ms);
                    handle.end_needed = true;
                    dispatch_ends_if_ready(&mut parts, n, effective_ms, &mut ends_dispatched)
                        .await;
                }
                WorkerMessage::Progress { part, fraction } => {
                    self.events.emit(&Event::Progress { fraction, part });
                }
                WorkerMessage::Status { part, outcome } => {
                    parts[part as usize].done = true;
                    // A terminal status before the duration is known is
                    // fatal whatever its outcome.
                    if outcome == PartOutcome::Failed || effective_ms.is_none() {
                        self.abort(&mut parts, &mut msg_rx, part).await;
                        return Err(DownloadError::PartFailed { part });
                    }
                    self.events.emit(&Event::PartFinished(part));
                    if parts.len() == n && parts.iter().all(|handle| handle.done) {
                        break;
                    }
                }
            }
        }

        for handle in parts.iter_mut() {
            let _ = (&mut handle.task).await;
        }

        self.join_parts(output, n).await?;

        Ok(DownloadSummary {
            duration_secs: effective_secs,
            filesize,
        })
    }

    fn spawn_worker(
        &self,
        part: u32,
        url_fn: &UrlBuilder,
        output: &Path,
        msg_tx: &mpsc::Sender<WorkerMessage>,
    ) -> PartHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let worker = PartWorker::new(
            part,
            self.config.parts,
            output.to_path_buf(),
            Arc::clone(url_fn),
            Arc::clone(&self.transport),
            self.config.resume,
            cmd_rx,
            msg_tx.clone(),
        );
        debug!(part, "spawning part worker");
        PartHandle {
            commands: cmd_tx,
            task: tokio::spawn(worker.run()),
            start: None,
            real_offset: None,
            end_needed: false,
            done: false,
        }
    }

    /// Stop every worker, drain their terminal statuses, and join them
    /// before reporting the failure.
    async fn abort(
        &mut self,
        parts: &mut [PartHandle],
        msg_rx: &mut mpsc::Receiver<WorkerMessage>,
        failed_part: u32,
    ) {
        for handle in parts.iter() {
            let _ = handle.commands.send(WorkerCommand::Stop).await;
        }

        let mut remaining = parts.iter().filter(|handle| !handle.done).count();
        while remaining > 0 {
            match msg_rx.recv().await {
                Some(WorkerMessage::Status { part, .. }) => {
                    let handle = &mut parts[part as usize];
                    if !handle.done {
                        handle.done = true;
                        remaining -= 1;
                    }
                }
                Some(_) => {}
                None => break,
            }
        }

        for handle in parts.iter_mut() {
            let _ = (&mut handle.task).await;
        }

        self.events.emit(&Event::PartFailed(failed_part));
    }

    /// Append `filename.part{i}` onto the primary file in index order, then
    /// delete the part files.
    async fn join_parts(&mut self, output: &Path, n: usize) -> Result<(), DownloadError> {
        if n == 1 {
            return Ok(());
        }

        self.events.emit(&Event::Debug {
            message: "Starting to join files".to_string(),
            part: None,
        });

        let mut out = OpenOptions::new().append(true).open(output).await?;
        for part in 1..n as u32 {
            let part_path = part_file_path(output, part);
            let mut part_file = File::open(&part_path).await?;
            let copied = tokio::io::copy(&mut part_file, &mut out).await?;
            self.events.emit(&Event::Debug {
                message: format!("Appended {} ({copied} bytes)", part_path.display()),
                part: Some(part),
            });
            tokio::fs::remove_file(&part_path).await?;
            self.events.emit(&Event::Debug {
                message: format!("Deleted {}", part_path.display()),
                part: Some(part),
            });
        }
        out.flush().await?;

        self.events.emit(&Event::Info {
            message: "Joining done".to_string(),
            part: None,
        });
        Ok(())
    }
}

/// Once every part has declared whether it needs a start time, group the
/// needy ones into maximal runs of consecutive indices and place each run
/// member evenly between its anchored neighbors: the left neighbor's start
/// time (or 0) and the right neighbor's real offset (or the total duration).
pub(crate) fn compute_run_starts(states: &[StartRequest], total_ms: i64) -> Vec<(usize, i64)> {
    let n = states.len();
    let mut assignments = Vec::new();

    let mut left = 0;
    while left < n {
        if !matches!(states[left], StartRequest::Assign) {
            left += 1;
            continue;
        }
        let mut right = left;
        while right + 1 < n && matches!(states[right + 1], StartRequest::Assign) {
            right += 1;
        }

        let lo = if left == 0 {
            0
        } else {
            match &states[left - 1] {
                StartRequest::Known { start_time_ms, .. } => *start_time_ms,
                StartRequest::Assign => unreachable!("run is maximal"),
            }
        };
        let hi = if right == n - 1 {
            total_ms
        } else {
            match &states[right + 1] {
                StartRequest::Known {
                    start_time_ms,
                    real_offset_ms,
                } => real_offset_ms.unwrap_or(*start_time_ms),
                StartRequest::Assign => unreachable!("run is maximal"),
            }
        };

        let width = (right - left + 2) as i64;
        for i in 0..=(right - left) {
            assignments.push((left + i, lo + (i as i64 + 1) * (hi - lo) / width));
        }

        left = right + 1;
    }

    assignments
}

async fn dispatch_starts_if_ready(
    parts: &mut [PartHandle],
    n: usize,
    effective_ms: Option<i64>,
    dispatched: &mut bool,
    events: &mut EventBus,
) {
    let Some(total_ms) = effective_ms else { return };
    if *dispatched || parts.len() < n || parts.iter().any(|handle| handle.start.is_none()) {
        return;
    }

    let states: Vec<StartRequest> = parts
        .iter()
        .filter_map(|handle| handle.start.clone())
        .collect();

    for (index, start_ms) in compute_run_starts(&states, total_ms) {
        events.emit(&Event::Debug {
            message: format!("Assigned start time {start_ms}"),
            part: Some(index as u32),
        });
        let _ = parts[index]
            .commands
            .send(WorkerCommand::StartAt(start_ms))
            .await;
    }
    *dispatched = true;
}

/// Each part's end is its right neighbor's discovered real offset; the last
/// part runs to the effective duration.
async fn dispatch_ends_if_ready(
    parts: &mut [PartHandle],
    n: usize,
    effective_ms: Option<i64>,
    dispatched: &mut bool,
) {
    let Some(total_ms) = effective_ms else { return };
    if *dispatched || parts.len() < n || parts.iter().any(|handle| !handle.end_needed) {
        return;
    }

    for i in 1..n {
        if parts[i - 1].end_needed
            && let Some(real_offset) = parts[i].real_offset
        {
            let _ = parts[i - 1]
                .commands
                .send(WorkerCommand::EndAt(real_offset))
                .await;
        }
    }
    let _ = parts[n - 1]
        .commands
        .send(WorkerCommand::EndAt(total_ms))
        .await;
    *dispatched = true;
}
