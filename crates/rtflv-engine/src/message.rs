//! Typed messages between the workers and the coordinator.
//!
//! Each worker owns a command receiver and a clone of the coordinator's
//! message sender; the channels are the only state shared across tasks. A
//! message carrying a value is the happens-before fence for that value: the
//! coordinator reads a part's `real_offset` only after receiving the message
//! that announces it.

/// How a part wants its start time settled.
#[derive(Debug, Clone, PartialEq)]
pub enum StartRequest {
    /// The part has no usable resume point; the coordinator must assign a
    /// start time.
    Assign,
    /// The part already knows where it starts (part 0, or a resumed part).
    /// `real_offset_ms` is the absolute timestamp of the first media tag of
    /// the part's existing data, when known.
    Known {
        start_time_ms: i64,
        real_offset_ms: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    Success,
    Failed,
}

/// Worker-to-coordinator messages, delivered in per-worker FIFO order.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Debug { part: u32, message: String },
    Info { part: u32, message: String },
    Filesize { part: u32, bytes: u64 },
    Duration { part: u32, seconds: f64 },
    NeedStart { part: u32, request: StartRequest },
    NeedEnd { part: u32, real_offset_ms: i64 },
    Progress { part: u32, fraction: f64 },
    /// Terminal; a worker sends exactly one of these, last.
    Status { part: u32, outcome: PartOutcome },
}

/// Coordinator-to-worker commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    StartAt(i64),
    EndAt(i64),
    Stop,
}
