use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identifier::EpisodeId;

/// A tracked work as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub name: Option<String>,
    /// External work id
    pub lookup_value: String,
    pub server_segment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn new(lookup_value: String) -> Self {
        Self {
            id: 0,
            name: None,
            lookup_value,
            server_segment: None,
            created_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.lookup_value)
    }

    /// Episode titles carry the work name up to the first space.
    pub fn name_from_episode_title(title: &str) -> &str {
        match title.find(' ') {
            Some(index) if index > 0 => &title[..index],
            _ => title,
        }
    }
}

/// A discovered episode as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub book_id: i64,
    pub name: Option<String>,
    /// Episode identifier token
    pub lookup_value: String,
    pub is_downloaded: bool,
    pub sequence_number: u32,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(book_id: i64, episode: &EpisodeId) -> Self {
        Self {
            id: 0,
            book_id,
            name: None,
            lookup_value: episode.to_string(),
            is_downloaded: false,
            sequence_number: episode.sequence(),
            created_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.lookup_value)
    }
}
