//! Reading and writing cases on disk.

pub mod case_file;
pub use case_file::*;
