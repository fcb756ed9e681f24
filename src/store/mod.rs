pub mod sqlite;

use crate::app::Result;
use crate::domain::{Book, Episode};

pub use sqlite::SqliteStore;

pub trait Store {
    // Book operations
    fn add_book(&self, book: &Book) -> Result<i64>;
    fn get_book_by_lookup(&self, work_id: &str) -> Result<Option<Book>>;
    fn get_book_by_name(&self, name: &str) -> Result<Option<Book>>;
    fn get_all_books(&self) -> Result<Vec<Book>>;

    // Episode operations
    /// Returns false when an episode with the same identifier already exists.
    fn add_episode(&self, episode: &Episode) -> Result<bool>;
    fn get_episode(&self, identifier: &str) -> Result<Option<Episode>>;
    fn get_latest_episode(&self, work_id: &str) -> Result<Option<Episode>>;
    fn get_episodes_by_book(&self, book_id: i64) -> Result<Vec<Episode>>;
    fn set_downloaded(&self, identifier: &str, is_downloaded: bool) -> Result<()>;
}
