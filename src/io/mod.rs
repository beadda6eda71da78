//! Supporting I/O infrastructure. Not part of the lock manager's public
//! contract; see [`mapped_file`] for why it is carried at all.

pub mod mapped_file;

pub use mapped_file::MappedFile;
