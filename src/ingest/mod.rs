pub mod hasher;
pub mod scanner;
pub mod upload;

pub use upload::{collect_photos, import_batch, ImportReport, ScanOutcome};
