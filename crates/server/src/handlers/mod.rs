//! HTTP handlers.

pub mod files;

pub use files::{delete_file, get_file, list_files, upload_file};
