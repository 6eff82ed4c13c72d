use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::database::schema::SCHEMA;
use crate::database::store::{ImageRecord, MetadataUpdate, PhotoStore, Scope};
use crate::error::{Error, Result};
use crate::metadata::MetadataView;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Album {
    pub id: i64,
    pub custom_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A photo ready to be inserted: the upload has been read, hashed, and its
/// metadata extracted.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub filename: String,
    pub content_hash: String,
    pub image_data: Option<String>,
}

/// Listing row, with the embedded capture date surfaced for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoSummary {
    pub id: i64,
    pub name: String,
    pub stored_filename: String,
    pub image_data: Option<String>,
    pub file_date: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(Error::InvalidInput(format!("unknown sort order '{}'", other))),
        }
    }
}

/// Object key for an upload, grouped per album the way the bucket is laid out.
pub fn stored_key(scope: &Scope, content_hash: &str, filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let name = match ext {
        Some(ext) => format!("{}.{}", content_hash, ext),
        None => content_hash.to_string(),
    };
    match scope {
        Scope::Pool => format!("photos/{}", name),
        Scope::Album(custom_id) => format!("albums/{}/{}", custom_id, name),
    }
}

/// SQLite-backed catalog of albums and photos.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn create_album(&self, custom_id: &str, name: &str) -> Result<Album> {
        validate_custom_id(custom_id)?;
        if self.find_album(custom_id)?.is_some() {
            return Err(Error::InvalidInput(format!("album '{}' already exists", custom_id)));
        }

        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO albums (custom_id, name, created_at) VALUES (?1, ?2, ?3)",
            params![custom_id, name, now.timestamp_millis()],
        )?;
        info!("Created album {} ({})", custom_id, name);
        Ok(Album {
            id: self.conn.last_insert_rowid(),
            custom_id: custom_id.to_string(),
            name: name.to_string(),
            created_at: from_millis(now.timestamp_millis()),
        })
    }

    pub fn find_album(&self, custom_id: &str) -> Result<Option<Album>> {
        let album = self
            .conn
            .query_row(
                "SELECT id, custom_id, name, created_at FROM albums WHERE custom_id = ?1",
                params![custom_id],
                album_from_row,
            )
            .optional()?;
        Ok(album)
    }

    /// Newest album first.
    pub fn list_albums(&self) -> Result<Vec<Album>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, custom_id, name, created_at FROM albums ORDER BY created_at DESC, id DESC")?;
        let albums = stmt
            .query_map([], album_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }

    pub fn rename_album(&self, custom_id: &str, name: &str) -> Result<Album> {
        let updated = self.conn.execute(
            "UPDATE albums SET name = ?1 WHERE custom_id = ?2",
            params![name, custom_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("album '{}'", custom_id)));
        }
        info!("Renamed album {} to {}", custom_id, name);
        self.find_album(custom_id)?
            .ok_or_else(|| Error::NotFound(format!("album '{}'", custom_id)))
    }

    /// Removes an album together with every photo in it.
    pub fn delete_album(&mut self, custom_id: &str) -> Result<usize> {
        let album_id = self.resolve_scope(&Scope::Album(custom_id.to_string()))?;

        let tx = self.conn.transaction()?;
        let photos = tx.execute("DELETE FROM photos WHERE album_id = ?1", params![album_id])?;
        tx.execute("DELETE FROM albums WHERE id = ?1", params![album_id])?;
        tx.commit()?;

        info!("Deleted album {} and {} photos", custom_id, photos);
        Ok(photos)
    }

    pub fn list_photos(&self, scope: &Scope, order: SortOrder) -> Result<Vec<PhotoSummary>> {
        let album_id = self.resolve_scope(scope)?;
        let sql = format!(
            "SELECT id, filename, stored_filename, image_data, created_at FROM photos
             WHERE album_id IS ?1
             ORDER BY created_at {order}, id {order}",
            order = order.sql()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let photos = stmt
            .query_map(params![album_id], summary_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    /// Cover photo of an album: its first upload.
    pub fn album_thumbnail(&self, custom_id: &str) -> Result<Option<PhotoSummary>> {
        let scope = Scope::Album(custom_id.to_string());
        Ok(self.list_photos(&scope, SortOrder::Asc)?.into_iter().next())
    }

    pub fn delete_photo(&self, id: i64) -> Result<()> {
        let removed = self.conn.execute("DELETE FROM photos WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(Error::NotFound(format!("photo {}", id)));
        }
        info!("Deleted photo {}", id);
        Ok(())
    }

    fn resolve_scope(&self, scope: &Scope) -> Result<Option<i64>> {
        match scope {
            Scope::Pool => Ok(None),
            Scope::Album(custom_id) => self
                .find_album(custom_id)?
                .map(|album| Some(album.id))
                .ok_or_else(|| Error::NotFound(format!("album '{}'", custom_id))),
        }
    }
}

impl PhotoStore for Catalog {
    /// Inserts a whole upload batch in one transaction and returns the new ids.
    fn insert_photos(&mut self, scope: &Scope, photos: &[NewPhoto]) -> Result<Vec<i64>> {
        let album_id = self.resolve_scope(scope)?;
        let now = Utc::now().timestamp_millis();

        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(photos.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO photos (album_id, filename, stored_filename, content_hash, image_data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING id",
            )?;

            for photo in photos {
                let key = stored_key(scope, &photo.content_hash, &photo.filename);
                let id: i64 = stmt.query_row(
                    params![album_id, photo.filename, key, photo.content_hash, photo.image_data, now],
                    |row| row.get(0),
                )?;
                debug!("Inserted photo {} as {}", photo.filename, key);
                ids.push(id);
            }
        }
        tx.commit()?;

        info!("Inserted {} photos into {}", ids.len(), scope);
        Ok(ids)
    }

    fn fetch_scope(&self, scope: &Scope) -> Result<Vec<ImageRecord>> {
        let album_id = self.resolve_scope(scope)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, album_id, filename, created_at, image_data FROM photos
             WHERE album_id IS ?1
             ORDER BY created_at, id",
        )?;
        let records = stmt
            .query_map(params![album_id], |row| {
                Ok(ImageRecord {
                    id: row.get(0)?,
                    album_id: row.get(1)?,
                    filename: row.get(2)?,
                    created_at: from_millis(row.get(3)?),
                    image_data: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn apply_metadata_updates(&mut self, updates: &[MetadataUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE photos SET image_data = ?1 WHERE id = ?2")?;
            for update in updates {
                if stmt.execute(params![update.image_data, update.photo_id])? == 0 {
                    // dropping the transaction rolls back earlier updates
                    return Err(Error::NotFound(format!("photo {}", update.photo_id)));
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_scopes(&self) -> Result<Vec<Scope>> {
        let mut scopes = vec![Scope::Pool];
        scopes.extend(
            self.list_albums()?
                .into_iter()
                .map(|album| Scope::Album(album.custom_id)),
        );
        Ok(scopes)
    }
}

fn validate_custom_id(custom_id: &str) -> Result<()> {
    let valid = !custom_id.is_empty()
        && custom_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid album id '{}'", custom_id)))
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn album_from_row(row: &Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        custom_id: row.get(1)?,
        name: row.get(2)?,
        created_at: from_millis(row.get(3)?),
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<PhotoSummary> {
    let image_data: Option<String> = row.get(3)?;
    let file_date = MetadataView::parse(image_data.as_deref())
        .as_structured()
        .and_then(|meta| meta.raw_date().map(str::to_string));
    Ok(PhotoSummary {
        id: row.get(0)?,
        name: row.get(1)?,
        stored_filename: row.get(2)?,
        image_data,
        file_date,
        created_at: from_millis(row.get(4)?),
    })
}
