use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Configurable options for a parallel download.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Number of parts to split the download into.
    pub parts: u32,

    /// Scan existing output files and resume from their latest keyframe
    /// instead of starting over.
    pub resume: bool,

    /// Cap on the downloaded duration in seconds. The effective duration is
    /// the smaller of this and the duration the stream declares.
    pub duration_cap: Option<f64>,

    /// User agent string for the HTTP transport.
    pub user_agent: String,

    /// Connection timeout. There is deliberately no overall request timeout:
    /// a real-time stream legitimately stays open for its whole duration.
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            parts: 3,
            resume: true,
            duration_cap: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl DownloadConfig {
    /// Duration actually downloaded, given what the stream declares.
    pub fn effective_duration(&self, declared_secs: f64) -> f64 {
        match self.duration_cap {
            Some(cap) => declared_secs.min(cap),
            None => declared_secs,
        }
    }
}
