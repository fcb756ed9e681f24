use crate::domain::identifier::{EpisodeId, WorkId};

/// Image resolution published for an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Low resolution preview, published first
    Preview,
    /// Full resolution, sometimes published a little later
    Full,
}

impl Resolution {
    pub fn version(self) -> &'static str {
        match self {
            Resolution::Preview => "000",
            Resolution::Full => "001",
        }
    }
}

/// Builds media URLs under the configured image base URL.
#[derive(Debug, Clone)]
pub struct ImageUrls {
    base_url: String,
}

impl ImageUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// URL of one page image:
    /// `{base}{padded work}//{episode}{segment}_{version}//{page}.jpg?{token}`
    pub fn page_url(
        &self,
        work: &WorkId,
        episode: &EpisodeId,
        segment: &str,
        resolution: Resolution,
        page: u32,
        auth_token: &str,
    ) -> String {
        format!(
            "{}{}//{}{}_{}//{}.jpg?{}",
            self.base_url,
            work.padded(),
            episode,
            segment,
            resolution.version(),
            page,
            auth_token
        )
    }
}
