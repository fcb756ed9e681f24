pub mod identifier;
pub mod media;
pub mod metadata;
pub mod work;

pub use identifier::{EpisodeId, IdentifierError, WorkId};
pub use media::{ImageUrls, Resolution};
pub use metadata::EpisodeMetadata;
pub use work::{Book, Episode};
