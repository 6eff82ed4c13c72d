//! Upload orchestration: read files, extract metadata, insert the batch,
//! then backfill worlds for the scope that received it.
//!
//! The backfill runs before `import_batch` returns. If it fails the upload
//! still counts as successful; the failure is logged and carried in the
//! report so the caller can retry the backfill on its own.

use std::path::PathBuf;
use std::thread;

use crossbeam::channel::bounded;
use indicatif::ProgressBar;
use tracing::{error, info, warn};

use crate::database::{PhotoStore, Scope};
use crate::error::Result;
use crate::ingest::hasher::{self, ScannedPhoto};
use crate::ingest::scanner;
use crate::worlds::{backfill_world, BackfillReport, ScopeLocks};

#[derive(Debug)]
pub struct ScanOutcome {
    pub photos: Vec<ScannedPhoto>,
    pub failed: Vec<(PathBuf, String)>,
}

#[derive(Debug)]
pub struct ImportReport {
    pub scope: Scope,
    pub inserted: Vec<i64>,
    pub backfill: std::result::Result<BackfillReport, String>,
}

/// Reads and extracts every file under `roots` on `workers` threads.
///
/// Unreadable files are reported, not fatal. Photos come back sorted by
/// path so repeated imports insert in the same order.
pub fn collect_photos(roots: &[PathBuf], workers: usize, progress: &ProgressBar) -> ScanOutcome {
    let (scan_tx, scan_rx) = bounded::<PathBuf>(1024);
    let (done_tx, done_rx) = bounded::<std::result::Result<ScannedPhoto, (PathBuf, String)>>(1024);

    let roots = roots.to_vec();
    let scanner_handle = thread::spawn(move || {
        for root in &roots {
            if let Err(e) = scanner::scan_directory(root, scan_tx.clone()) {
                error!("Scanner failed on {:?}: {}", root, e);
            }
        }
    });

    let worker_handles: Vec<_> = (0..workers.max(1))
        .map(|_| {
            let rx = scan_rx.clone();
            let tx = done_tx.clone();
            thread::spawn(move || {
                for path in rx {
                    let result = hasher::scan_photo(&path).map_err(|e| (path, format!("{:#}", e)));
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(scan_rx);
    drop(done_tx);

    let mut outcome = ScanOutcome { photos: Vec::new(), failed: Vec::new() };
    for result in done_rx {
        progress.inc(1);
        match result {
            Ok(photo) => {
                progress.set_message(photo.filename.clone());
                outcome.photos.push(photo);
            }
            Err((path, reason)) => {
                warn!("Skipping {:?}: {}", path, reason);
                outcome.failed.push((path, reason));
            }
        }
    }

    if scanner_handle.join().is_err() {
        error!("Scanner thread panicked");
    }
    for handle in worker_handles {
        if handle.join().is_err() {
            error!("Extraction worker panicked");
        }
    }

    outcome.photos.sort_by(|a, b| a.path.cmp(&b.path));
    outcome
}

/// Inserts the photos into `scope` in one transaction, then backfills it.
///
/// Insert errors fail the import with nothing stored.
pub fn import_batch<S: PhotoStore>(
    store: &mut S,
    scope: &Scope,
    photos: Vec<ScannedPhoto>,
    locks: &ScopeLocks,
) -> Result<ImportReport> {
    let with_metadata = photos.iter().filter(|p| p.image_data.is_some()).count();
    let batch: Vec<_> = photos.into_iter().map(ScannedPhoto::into_new_photo).collect();
    let inserted = store.insert_photos(scope, &batch)?;
    info!(
        "Imported {} photos into {} ({} with embedded metadata)",
        inserted.len(),
        scope,
        with_metadata
    );

    let backfill = backfill_world(store, scope, locks).map_err(|e| {
        warn!("Upload to {} stored, but world backfill failed: {}", scope, e);
        e.to_string()
    });

    Ok(ImportReport {
        scope: scope.clone(),
        inserted,
        backfill,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Catalog;
    use crate::error::Error;
    use crate::worlds::inference::test_support::{anchored, t0, MemoryStore};
    use crate::metadata::png::fixtures::{chunk, itxt, png};
    use crate::worlds::{group_by_world, NO_WORLD_GROUP};
    use std::fs;

    fn write_png(dir: &std::path::Path, name: &str, payload: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, png(&[chunk(b"IHDR", &[0; 13]), chunk(b"PngP", payload.as_bytes())])).unwrap();
        path
    }

    #[test]
    fn test_collect_reads_and_extracts_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", r#"{"date":"2024-05-01T13:00:00Z"}"#);
        write_png(dir.path(), "a.png", r#"{"date":"2024-05-01T12:00:00Z","world":{"name":"Forest"}}"#);
        fs::write(
            dir.path().join("c.png"),
            png(&[itxt("Description", "", "", br#"{"date":"2024-05-01T14:00:00Z"}"#)]),
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let outcome = collect_photos(&[dir.path().to_path_buf()], 3, &ProgressBar::hidden());
        let names: Vec<_> = outcome.photos.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png", "notes.txt"]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.photos[2].image_data.as_deref().unwrap().contains("14:00"));
        assert_eq!(outcome.photos[3].image_data, None);
    }

    #[test]
    fn test_import_backfills_the_uploaded_scope() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "1.png", r#"{"date":"2024-05-01T12:00:00Z","world":{"name":"Forest"}}"#);
        write_png(dir.path(), "2.png", r#"{"date":"2024-05-01T13:00:00Z"}"#);
        write_png(dir.path(), "3.png", r#"{"date":"2024-05-02T18:00:00Z"}"#);

        let mut catalog = Catalog::open_in_memory()?;
        catalog.create_album("trip", "Trip")?;
        let scope = Scope::Album("trip".into());
        let outcome = collect_photos(&[dir.path().to_path_buf()], 2, &ProgressBar::hidden());

        let report = import_batch(&mut catalog, &scope, outcome.photos, &ScopeLocks::new())?;
        assert_eq!(report.inserted.len(), 3);
        assert_eq!(report.backfill.as_ref().unwrap().updated, 1);

        let groups = group_by_world(catalog.fetch_scope(&scope)?);
        let forest: Vec<_> = groups.get("Forest").unwrap().iter().map(|r| r.filename.clone()).collect();
        assert_eq!(forest, vec!["1.png", "2.png"]);
        assert_eq!(groups.get(NO_WORLD_GROUP).unwrap()[0].filename, "3.png");

        assert!(catalog.fetch_scope(&Scope::Pool)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_failed_backfill_keeps_the_upload() -> Result<()> {
        let mut store = MemoryStore {
            records: vec![anchored(1, "Forest", t0())],
            fail_writes: true,
            ..Default::default()
        };
        let photo = ScannedPhoto {
            path: PathBuf::from("2.png"),
            filename: "2.png".into(),
            content_hash: "h2".into(),
            image_data: Some(r#"{"date":"2024-05-01T13:00:00Z"}"#.into()),
        };

        let report = import_batch(&mut store, &Scope::Pool, vec![photo], &ScopeLocks::new())?;
        assert_eq!(report.inserted, vec![2]);
        assert!(report.backfill.as_ref().unwrap_err().contains("disk full"));

        let stored = store.fetch_scope(&Scope::Pool)?;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].filename, "2.png");
        assert_eq!(stored[1].world_name(), None);
        Ok(())
    }

    #[test]
    fn test_import_into_missing_album_fails() -> Result<()> {
        let mut catalog = Catalog::open_in_memory()?;
        let photo = ScannedPhoto {
            path: PathBuf::from("x.png"),
            filename: "x.png".into(),
            content_hash: "h".into(),
            image_data: None,
        };
        let result = import_batch(&mut catalog, &Scope::Album("nope".into()), vec![photo], &ScopeLocks::new());
        assert!(matches!(result, Err(Error::NotFound(_))));
        Ok(())
    }
}
