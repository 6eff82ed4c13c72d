//! Embedded photo metadata: pulling the payload out of PNG files and
//! reading the fields the world grouping cares about.

pub mod document;
pub mod png;

pub use document::{MetadataView, PhotoMetadata, WorldInfo};
pub use png::{extract, should_extract};
