use std::fs::File;
use std::io::{Write, BufRead, BufReader};
use std::path::{Path, PathBuf};
use anyhow::{Result, Context, anyhow};
use tracing::info;

pub const DB_PATH_KEY: &str = "PHOTO_DB_PATH";
pub const WORKERS_KEY: &str = "PHOTO_IMPORT_WORKERS";

const DEFAULT_DB_PATH: &str = "photos.db";
const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub import_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            import_workers: DEFAULT_WORKERS,
        }
    }
}

/// Resolves settings. Values given on the command line (which clap also
/// fills from the process environment) win over the `.env` file, which wins
/// over the defaults.
pub fn load_settings(env_path: &Path, db_path: Option<PathBuf>, workers: Option<usize>) -> Result<Settings> {
    let mut settings = Settings::default();

    if env_path.exists() {
        let from_file = load_from_env(env_path)
            .with_context(|| format!("Failed to read {}", env_path.display()))?;
        info!("Loaded settings from {}", env_path.display());
        settings = from_file;
    }

    if let Some(db_path) = db_path {
        settings.db_path = db_path;
    }
    if let Some(workers) = workers {
        settings.import_workers = workers;
    }
    if settings.import_workers == 0 {
        return Err(anyhow!("{} must be at least 1", WORKERS_KEY));
    }
    Ok(settings)
}

fn load_from_env(path: &Path) -> Result<Settings> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut settings = Settings::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                DB_PATH_KEY => settings.db_path = PathBuf::from(value.trim()),
                WORKERS_KEY => {
                    settings.import_workers = value
                        .trim()
                        .parse()
                        .with_context(|| format!("Invalid {}: {}", WORKERS_KEY, value.trim()))?;
                }
                _ => {}
            }
        }
    }

    Ok(settings)
}

/// Writes the settings to `.env` so later runs pick them up.
pub fn save_to_env(path: &Path, settings: &Settings) -> Result<()> {
    let mut file = File::create(path).context("Failed to create .env file")?;
    writeln!(file, "{}={}", DB_PATH_KEY, settings.db_path.display())?;
    writeln!(file, "{}={}", WORKERS_KEY, settings.import_workers)?;
    Ok(())
}
