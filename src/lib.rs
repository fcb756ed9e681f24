//! # Bookwatch
//!
//! Watches serialized books on a remote content service and downloads each
//! new episode as soon as it is published.
//!
//! ## Architecture
//!
//! ```text
//! Locator → Scanner → Probe → Downloader
//!              │                  │
//!            Store             Notifier
//! ```
//!
//! - [`domain`]: identifier codec and media URL layout
//! - [`scanner`]: polling state machine over sequential identifiers
//! - [`downloader`]: windowed page downloader with a circuit breaker
//! - [`locator`]: backlog catch-up to the newest published episode
//!
//! ## Quick Start
//!
//! ```bash
//! # Start tracking a book
//! bookwatch add 12345
//!
//! # Store every episode published so far
//! bookwatch sync 12345
//!
//! # Wait for the next episode and download it
//! bookwatch watch 12345
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store, the
/// probe, the notifier and the process cancellation token.
pub mod app;

/// Command-line interface using clap.
///
/// - `add <work>` - Start tracking a book
/// - `sync <work>` - Catch up the stored backlog
/// - `newest <work>` - Find the newest published episode
/// - `watch <work>...` - Wait for and download the next episode
/// - `download <work> <episode>` - Download a published episode
/// - `list` - List tracked books
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/bookwatch/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`WorkId`](domain::WorkId) / [`EpisodeId`](domain::EpisodeId): identifier codec
/// - [`EpisodeMetadata`](domain::EpisodeMetadata): probe results
/// - [`Book`](domain::Book) / [`Episode`](domain::Episode): stored records
pub mod domain;

/// Concurrent page downloads.
pub mod downloader;

/// Backlog catch-up for tracked books.
pub mod locator;

/// Notifications about found episodes and failures.
///
/// - [`Notifier`](notify::Notifier): Async trait for notification channels
/// - [`LogNotifier`](notify::LogNotifier): tracing only
/// - [`WebhookNotifier`](notify::WebhookNotifier): chat incoming-webhook
pub mod notify;

/// Access to the remote content service.
///
/// - [`ContentProbe`](probe::ContentProbe): Async trait for metadata and media requests
/// - [`HttpProbe`](probe::HttpProbe): reqwest-based implementation
pub mod probe;

/// Polling state machine.
pub mod scanner;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

/// Watching books for new episodes.
pub mod watcher;

#[cfg(test)]
mod testing;
