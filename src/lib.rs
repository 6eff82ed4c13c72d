//! Photo catalog core: embedded PNG metadata extraction, world inference
//! over a collection scope, and grouping of photos by world.

pub mod database;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod utils;
pub mod worlds;

pub use error::{Error, Result};
