pub mod error;
pub mod files;

pub use error::FileError;
pub use files::{FileManipulator, WriteReceipt};
