pub mod error;
pub mod framing;
pub mod header;
pub mod script;
pub mod tag;

pub use error::FlvError;
pub use header::FlvFileHeader;
pub use tag::{FlvTag, FlvTagType};
