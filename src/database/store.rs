use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::database::repo::NewPhoto;
use crate::metadata::MetadataView;

/// The set of photos one inference run looks at: the unassociated pool, or a
/// single album addressed by its public `custom_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Pool,
    Album(String),
}

impl Scope {
    pub fn from_album(custom_id: Option<String>) -> Self {
        match custom_id {
            Some(id) => Scope::Album(id),
            None => Scope::Pool,
        }
    }

    pub fn custom_id(&self) -> Option<&str> {
        match self {
            Scope::Pool => None,
            Scope::Album(id) => Some(id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Pool => write!(f, "pool"),
            Scope::Album(id) => write!(f, "album:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: i64,
    pub album_id: Option<i64>,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub image_data: Option<String>,
}

impl ImageRecord {
    pub fn metadata(&self) -> MetadataView {
        MetadataView::parse(self.image_data.as_deref())
    }

    /// Embedded `date` when it parses, otherwise the insert time.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.metadata()
            .as_structured()
            .and_then(|meta| meta.date())
            .unwrap_or(self.created_at)
    }

    pub fn world_name(&self) -> Option<String> {
        self.metadata().world().map(|world| world.name)
    }
}

/// New `image_data` for one photo, produced by the backfill.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub photo_id: i64,
    pub image_data: String,
}

/// What uploads and the world backfill need from persistence.
pub trait PhotoStore {
    /// Inserts the batch into `scope` in one transaction, returning new ids
    /// in batch order.
    fn insert_photos(&mut self, scope: &Scope, photos: &[NewPhoto]) -> Result<Vec<i64>>;

    /// Every photo of the scope, oldest insert first.
    fn fetch_scope(&self, scope: &Scope) -> Result<Vec<ImageRecord>>;

    /// Applies all updates or none of them.
    fn apply_metadata_updates(&mut self, updates: &[MetadataUpdate]) -> Result<()>;

    /// The pool followed by every album.
    fn list_scopes(&self) -> Result<Vec<Scope>>;
}
