use serde::Deserialize;

use crate::domain::identifier::{self, EpisodeId, IdentifierError, WorkId};

/// Episode details returned by the metadata endpoint for one identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeMetadata {
    pub work_id: WorkId,
    pub episode_id: EpisodeId,
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: Option<u32>,
    /// Server-assigned storage key; absent while the episode is unpublished
    pub storage_key: Option<String>,
    /// Query string that authorizes media requests
    pub auth_token: Option<String>,
    pub server_host: Option<String>,
}

impl EpisodeMetadata {
    pub fn from_response(work_id: WorkId, episode_id: EpisodeId, response: ProbeResponse) -> Self {
        let book = response.book_data.unwrap_or_default();
        Self {
            work_id,
            episode_id,
            title: book.title,
            author: book.author,
            page_count: book.page_count,
            storage_key: book.s3_key.filter(|key| !key.is_empty()),
            auth_token: response.additional_query_string,
            server_host: response.guardian_server,
        }
    }

    /// Whether the episode exists on the server.
    pub fn is_published(&self) -> bool {
        self.storage_key.is_some()
    }

    pub fn server_segment(&self) -> Result<String, IdentifierError> {
        let key = self
            .storage_key
            .as_deref()
            .ok_or_else(|| IdentifierError::SegmentNotFound(self.episode_id.to_string()))?;
        identifier::server_segment(key, &self.episode_id)
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }
}

/// Wire shape of the metadata endpoint response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeResponse {
    #[serde(rename = "GUARDIAN_SERVER", default)]
    pub guardian_server: Option<String>,
    #[serde(rename = "ADDITIONAL_QUERY_STRING", default)]
    pub additional_query_string: Option<String>,
    #[serde(default)]
    pub book_data: Option<BookData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookData {
    #[serde(default)]
    pub s3_key: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub page_count: Option<u32>,
}
