pub mod repo;
pub mod schema;
pub mod store;

pub use repo::{Album, Catalog, NewPhoto, PhotoSummary, SortOrder};
pub use store::{ImageRecord, MetadataUpdate, PhotoStore, Scope};
