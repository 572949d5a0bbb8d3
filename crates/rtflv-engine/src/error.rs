use flv::FlvError;
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("`{url}` is `{content_type}`, not FLV")]
    WrongContentType { url: String, content_type: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("FLV decode error: {source}")]
    Flv {
        #[from]
        source: FlvError,
    },

    #[error("stream is missing its leading metadata tags")]
    MissingMetadata,

    #[error("metadata carries no `duration` key")]
    MissingDuration,

    #[error("metadata carries no `timeBase` key")]
    MissingTimeBase,

    #[error("no known keyframe left to resume from")]
    ResumeExhausted,

    #[error("part {part} failed")]
    PartFailed { part: u32 },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("worker channel closed unexpectedly")]
    ChannelClosed,
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn wrong_content_type(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::WrongContentType {
            url: url.into(),
            content_type: content_type.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}
