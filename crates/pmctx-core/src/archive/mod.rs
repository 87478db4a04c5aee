//! Archive volume sets: on-disk format, writer, random-access reader and
//! the replay cursor used by archive contexts.

pub mod format;
mod interner;
pub mod interp;
pub mod reader;
pub mod replay;
pub mod writer;

#[cfg(test)]
pub(crate) mod testdata;

pub use format::{ArchiveLabel, FileKind, RecordKind};
pub use reader::{ArchiveReader, ArchiveRecord, RecordRef};
pub use replay::{ArchiveSession, ReplayMode};
pub use writer::{ArchiveWriter, WriterOptions};
