pub const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS albums (
        id INTEGER PRIMARY KEY,
        custom_id TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS photos (
        id INTEGER PRIMARY KEY,
        album_id INTEGER,
        filename TEXT NOT NULL,
        stored_filename TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        image_data TEXT,
        created_at INTEGER NOT NULL,
        FOREIGN KEY(album_id) REFERENCES albums(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_photos_album_created ON photos (album_id, created_at);
";
