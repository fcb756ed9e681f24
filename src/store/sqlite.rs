use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{BookwatchError, Result};
use crate::domain::{Book, Episode};
use crate::store::Store;

const BOOK_COLUMNS: &str = "id, name, lookup_value, server_segment, created_at";
const EPISODE_COLUMNS: &str =
    "e.id, e.book_id, e.name, e.lookup_value, e.is_downloaded, e.sequence_number, e.created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| BookwatchError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            BookwatchError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
        Ok(Book {
            id: row.get(0)?,
            name: row.get(1)?,
            lookup_value: row.get(2)?,
            server_segment: row.get(3)?,
            created_at: row
                .get::<_, String>(4)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
        Ok(Episode {
            id: row.get(0)?,
            book_id: row.get(1)?,
            name: row.get(2)?,
            lookup_value: row.get(3)?,
            is_downloaded: row.get(4)?,
            sequence_number: row.get(5)?,
            created_at: row
                .get::<_, String>(6)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }
}

impl Store for SqliteStore {
    fn add_book(&self, book: &Book) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO books (name, lookup_value, server_segment, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                book.name,
                book.lookup_value,
                book.server_segment,
                book.created_at.to_rfc3339()
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_book_by_lookup(&self, work_id: &str) -> Result<Option<Book>> {
        let conn = self.conn()?;

        let book = conn
            .query_row(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE lookup_value = ?1"),
                params![work_id],
                Self::book_from_row,
            )
            .optional()?;

        Ok(book)
    }

    fn get_book_by_name(&self, name: &str) -> Result<Option<Book>> {
        let conn = self.conn()?;

        let book = conn
            .query_row(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE name = ?1 LIMIT 1"),
                params![name],
                Self::book_from_row,
            )
            .optional()?;

        Ok(book)
    }

    fn get_all_books(&self) -> Result<Vec<Book>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {BOOK_COLUMNS} FROM books ORDER BY name, lookup_value"
        ))?;

        let books = stmt
            .query_map([], Self::book_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(books)
    }

    fn add_episode(&self, episode: &Episode) -> Result<bool> {
        let conn = self.conn()?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO episodes
                 (book_id, name, lookup_value, is_downloaded, sequence_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                episode.book_id,
                episode.name,
                episode.lookup_value,
                episode.is_downloaded,
                episode.sequence_number,
                episode.created_at.to_rfc3339()
            ],
        )?;

        Ok(inserted > 0)
    }

    fn get_episode(&self, identifier: &str) -> Result<Option<Episode>> {
        let conn = self.conn()?;

        let episode = conn
            .query_row(
                &format!("SELECT {EPISODE_COLUMNS} FROM episodes e WHERE e.lookup_value = ?1"),
                params![identifier],
                Self::episode_from_row,
            )
            .optional()?;

        Ok(episode)
    }

    fn get_latest_episode(&self, work_id: &str) -> Result<Option<Episode>> {
        let conn = self.conn()?;

        let episode = conn
            .query_row(
                &format!(
                    "SELECT {EPISODE_COLUMNS} FROM episodes e
                     JOIN books b ON b.id = e.book_id
                     WHERE b.lookup_value = ?1
                     ORDER BY e.sequence_number DESC, e.id DESC
                     LIMIT 1"
                ),
                params![work_id],
                Self::episode_from_row,
            )
            .optional()?;

        Ok(episode)
    }

    fn get_episodes_by_book(&self, book_id: i64) -> Result<Vec<Episode>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes e
             WHERE e.book_id = ?1
             ORDER BY e.sequence_number, e.id"
        ))?;

        let episodes = stmt
            .query_map(params![book_id], Self::episode_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(episodes)
    }

    fn set_downloaded(&self, identifier: &str, is_downloaded: bool) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "UPDATE episodes SET is_downloaded = ?1 WHERE lookup_value = ?2",
            params![is_downloaded, identifier],
        )?;

        Ok(())
    }
}
