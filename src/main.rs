use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vrphotoshare::database::{Catalog, PhotoStore, Scope, SortOrder};
use vrphotoshare::ingest;
use vrphotoshare::metadata;
use vrphotoshare::utils::config;
use vrphotoshare::worlds::{self, ScopeLocks};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite catalog path
    #[arg(long, global = true, env = config::DB_PATH_KEY)]
    db_path: Option<PathBuf>,

    #[arg(long, global = true, env = config::WORKERS_KEY)]
    workers: Option<usize>,

    /// Save the resolved settings to .env
    #[arg(long, global = true)]
    remember: bool,

    /// Print listings and reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the metadata embedded in a PNG file
    Extract { file: PathBuf },

    #[command(subcommand)]
    Album(AlbumCommand),

    /// Import files or directories into an album or the default pool
    Import {
        #[arg(short, long)]
        album: Option<String>,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Fill in missing worlds from photos taken nearby in time
    Backfill {
        #[arg(short, long, conflicts_with = "all")]
        album: Option<String>,
        #[arg(long)]
        all: bool,
    },

    /// Show photos grouped by world
    Groups {
        #[arg(short, long)]
        album: Option<String>,
        /// Include worlds a backfill would assign, without saving them
        #[arg(long)]
        preview: bool,
    },

    List {
        #[arg(short, long)]
        album: Option<String>,
        #[arg(long, default_value = "asc")]
        sort: String,
    },

    Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
enum AlbumCommand {
    Create { custom_id: String, name: String },
    List,
    Rename { custom_id: String, name: String },
    /// Delete an album and every photo in it
    Delete { custom_id: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    match args.command {
        Command::Extract { file } => extract(&file),
        command => {
            let env_path = Path::new(".env");
            let settings = config::load_settings(env_path, args.db_path, args.workers)?;
            if args.remember {
                config::save_to_env(env_path, &settings)?;
                info!("Saved settings to {}", env_path.display());
            }
            run(command, &settings, args.json)
        }
    }
}

fn run(command: Command, settings: &config::Settings, json: bool) -> Result<()> {
    let mut catalog = Catalog::open(&settings.db_path)
        .with_context(|| format!("Failed to open catalog {}", settings.db_path.display()))?;
    let locks = ScopeLocks::new();

    match command {
        Command::Extract { file } => extract(&file)?,
        Command::Album(AlbumCommand::Create { custom_id, name }) => {
            let album = catalog.create_album(&custom_id, &name)?;
            if json {
                println!("{}", serde_json::to_string(&album)?);
            } else {
                println!("{}\t{}", album.custom_id, album.name);
            }
        }
        Command::Album(AlbumCommand::List) => {
            let albums = catalog.list_albums()?;
            if json {
                println!("{}", serde_json::to_string(&albums)?);
            } else {
                for album in albums {
                    let cover = catalog
                        .album_thumbnail(&album.custom_id)?
                        .map(|p| p.stored_filename)
                        .unwrap_or_default();
                    println!("{}\t{}\t{}", album.custom_id, album.name, cover);
                }
            }
        }
        Command::Album(AlbumCommand::Rename { custom_id, name }) => {
            let album = catalog.rename_album(&custom_id, &name)?;
            println!("{}\t{}", album.custom_id, album.name);
        }
        Command::Album(AlbumCommand::Delete { custom_id }) => {
            let removed = catalog.delete_album(&custom_id)?;
            println!("Deleted album {} ({} photos)", custom_id, removed);
        }
        Command::Import { album, paths } => {
            let scope = Scope::from_album(album);
            import(&mut catalog, &scope, &paths, settings.import_workers, &locks)?;
        }
        Command::Backfill { album, all } => {
            let reports = if all {
                worlds::backfill_all(&mut catalog, &locks)?
            } else {
                vec![worlds::backfill_world(&mut catalog, &Scope::from_album(album), &locks)?]
            };
            if json {
                println!("{}", serde_json::to_string(&reports)?);
                return Ok(());
            }
            for r in reports {
                println!(
                    "{}: {} updated, {} unmatched, {} anchored, {} skipped",
                    r.scope, r.updated, r.unmatched, r.anchored, r.skipped
                );
            }
        }
        Command::Groups { album, preview } => {
            let records = catalog.fetch_scope(&Scope::from_album(album))?;
            let plan = preview.then(|| worlds::plan_backfill(&records));
            let groups = match &plan {
                Some(plan) => worlds::preview_groups(records, plan),
                None => worlds::group_by_world(records),
            };
            for group in groups {
                println!("{} ({})", group.name, group.records.len());
                for record in group.records {
                    let source = plan
                        .as_ref()
                        .and_then(|plan| plan.assignment(record.id))
                        .map(|a| format!("\tfrom #{} ({} min apart)", a.source_photo_id, a.distance.num_minutes()))
                        .unwrap_or_default();
                    println!(
                        "  {}\t{}\t{}{}",
                        record.id,
                        record.captured_at().to_rfc3339(),
                        record.filename,
                        source
                    );
                }
            }
        }
        Command::List { album, sort } => {
            let order: SortOrder = sort.parse()?;
            let photos = catalog.list_photos(&Scope::from_album(album), order)?;
            if json {
                println!("{}", serde_json::to_string(&photos)?);
                return Ok(());
            }
            for photo in photos {
                println!(
                    "{}\t{}\t{}\t{}",
                    photo.id,
                    photo.file_date.unwrap_or_else(|| photo.created_at.to_rfc3339()),
                    photo.name,
                    photo.stored_filename
                );
            }
        }
        Command::Delete { id } => {
            catalog.delete_photo(id)?;
        }
    }

    Ok(())
}

fn extract(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    match metadata::extract(&bytes) {
        Some(payload) => println!("{}", payload),
        None => info!("No embedded metadata in {:?}", file),
    }
    Ok(())
}

fn import(catalog: &mut Catalog, scope: &Scope, paths: &[PathBuf], workers: usize, locks: &ScopeLocks) -> Result<()> {
    info!("Importing {} path(s) into {}", paths.len(), scope);

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {pos} files {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.enable_steady_tick(Duration::from_millis(120));

    let outcome = ingest::collect_photos(paths, workers, &progress);
    progress.finish_and_clear();

    for (path, reason) in &outcome.failed {
        error!("Could not read {:?}: {}", path, reason);
    }

    let report = ingest::import_batch(catalog, scope, outcome.photos, locks)?;
    println!("{} photos uploaded to {}", report.inserted.len(), report.scope);
    match report.backfill {
        Ok(backfill) => println!("{} worlds filled in", backfill.updated),
        Err(reason) => warn!("World backfill did not run: {}; retry with `backfill`", reason),
    }
    Ok(())
}
