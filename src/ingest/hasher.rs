use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use sha2::{Sha256, Digest};
use memmap2::MmapOptions;
use anyhow::{Result, Context};

use crate::database::NewPhoto;
use crate::metadata;

const MMAP_THRESHOLD: u64 = 64 * 1024 * 1024; // 64 MB

/// An upload read from disk: content hash plus whatever metadata it embeds.
#[derive(Debug, Clone)]
pub struct ScannedPhoto {
    pub path: PathBuf,
    pub filename: String,
    pub content_hash: String,
    pub image_data: Option<String>,
}

impl ScannedPhoto {
    pub fn into_new_photo(self) -> NewPhoto {
        NewPhoto {
            filename: self.filename,
            content_hash: self.content_hash,
            image_data: self.image_data,
        }
    }
}

pub fn calculate_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hashes the file and, for `.png` names, extracts its embedded metadata.
pub fn scan_photo(path: &Path) -> Result<ScannedPhoto> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("Not a file path: {:?}", path))?;

    let (content_hash, image_data) = with_file_bytes(path, |bytes| {
        let image_data = if metadata::should_extract(&filename) {
            metadata::extract(bytes)
        } else {
            None
        };
        (calculate_hash(bytes), image_data)
    })?;

    Ok(ScannedPhoto {
        path: path.to_path_buf(),
        filename,
        content_hash,
        image_data,
    })
}

fn with_file_bytes<T>(path: &Path, f: impl FnOnce(&[u8]) -> T) -> Result<T> {
    let mut file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let len = file.metadata()?.len();

    if len > MMAP_THRESHOLD {
        // The file must not be truncated while mapped; uploads are not
        // written to after they land.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(f(&mmap))
    } else {
        let mut buffer = Vec::with_capacity(len as usize);
        file.read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        Ok(f(&buffer))
    }
}
