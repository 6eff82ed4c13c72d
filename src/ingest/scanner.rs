use walkdir::{WalkDir, DirEntry};
use std::path::{Path, PathBuf};
use crossbeam::channel::Sender;
use anyhow::Result;

/// Sends every visible file under `root`. A plain file path is sent as is.
pub fn scan_directory(root: &Path, tx: Sender<PathBuf>) -> Result<()> {
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();

    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
        let entry = entry?;
        if entry.file_type().is_file() {
            // receiver gone means the import was abandoned
            if tx.send(entry.path().to_path_buf()).is_err() {
                break;
            }
        }
    }
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name()
         .to_str()
         .map(|s| s.starts_with('.'))
         .unwrap_or(false)
}
