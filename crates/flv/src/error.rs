use std::io;

#[derive(Debug, thiserror::Error)]
pub enum FlvError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid FLV signature")]
    InvalidSignature,

    #[error("short read while parsing {context}")]
    ShortRead { context: &'static str },
}

impl FlvError {
    pub fn short_read(context: &'static str) -> Self {
        FlvError::ShortRead { context }
    }
}
