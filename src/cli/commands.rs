use std::sync::Arc;

use crate::app::{AppContext, BookwatchError, Result};
use crate::config::parse_interval;
use crate::domain::{Book, Episode, EpisodeId, EpisodeMetadata, WorkId};
use crate::downloader::EpisodeDownload;
use crate::scanner::{ScanCursor, ScanEnd, ScanPolicy};
use crate::store::Store;
use crate::watcher::{WatchOutcome, WatchTarget, Watcher};

pub async fn add_book(
    ctx: &AppContext,
    work: &str,
    title: Option<&str>,
    from: Option<&str>,
) -> Result<()> {
    let work = WorkId::parse(work)?;

    if let Some(book) = ctx.store.get_book_by_lookup(work.as_str())? {
        println!("Book already exists: {} ({})", book.display_name(), work);
        return Ok(());
    }
    if let Some(title) = title {
        if ctx.store.get_book_by_name(title)?.is_some() {
            println!("Book already exists: {}", title);
            return Ok(());
        }
    }

    let seed = match from {
        Some(raw) => EpisodeId::parse(raw)?,
        None => EpisodeId::first(&work),
    };

    let policy = ScanPolicy::first_episode(&ctx.config.scanner);
    let end = ctx
        .scanner(policy, ctx.cancel.clone())
        .run(ScanCursor::starting_at(work.clone(), seed), |_| Ok(()))
        .await?;

    let metadata = match end {
        ScanEnd::Found {
            metadata: Some(metadata),
            ..
        } => metadata,
        other => {
            println!(
                "No published episode found for book {} ({} attempts)",
                work,
                other.attempts()
            );
            return Ok(());
        }
    };

    let name = title
        .unwrap_or_else(|| Book::name_from_episode_title(metadata.display_title()))
        .to_string();
    if ctx.store.get_book_by_name(&name)?.is_some() {
        println!("Book already exists: {}", name);
        return Ok(());
    }

    let mut book = Book::new(work.to_string());
    book.name = Some(name.clone());
    book.server_segment = metadata.server_segment().ok();
    let book_id = ctx.store.add_book(&book)?;

    let mut episode = Episode::new(book_id, &metadata.episode_id);
    episode.name = metadata.title.clone();
    ctx.store.add_episode(&episode)?;

    println!("Added book: {} ({})", name, work);
    println!("  first episode: {} {}", metadata.episode_id, metadata.display_title());
    Ok(())
}

pub async fn sync_book(ctx: &AppContext, work: &str) -> Result<()> {
    let work = WorkId::parse(work)?;

    match ctx.locator(ctx.cancel.clone()).locate(&work).await? {
        Some(newest) => println!(
            "Newest episode of {}: {} {}",
            work,
            newest.episode_id,
            newest.display_title()
        ),
        None => println!("No published episodes for {}", work),
    }
    Ok(())
}

pub async fn find_newest(ctx: &AppContext, work: &str, from: Option<&str>) -> Result<()> {
    let work = WorkId::parse(work)?;

    let seed = match from {
        Some(raw) => EpisodeId::parse(raw)?,
        None => match ctx.store.get_latest_episode(work.as_str())? {
            Some(latest) => EpisodeId::parse(&latest.lookup_value)?,
            None => EpisodeId::first(&work),
        },
    };

    let policy = ScanPolicy::backlog(&ctx.config.scanner);
    let end = ctx
        .scanner(policy, ctx.cancel.clone())
        .run(ScanCursor::starting_at(work.clone(), seed), |_| Ok(()))
        .await?;

    match newest_of(end) {
        Some(newest) => {
            println!("Newest episode: {} {}", newest.episode_id, newest.display_title());
            match newest.episode_id.next() {
                Ok(next) => println!("Next episode:   {}", next),
                Err(e) => println!("Next episode:   none ({})", e),
            }
        }
        None => println!("No published episodes for {}", work),
    }
    Ok(())
}

fn newest_of(end: ScanEnd) -> Option<EpisodeMetadata> {
    match end {
        ScanEnd::Found { metadata, .. } => metadata,
        ScanEnd::Exhausted { last_hit, .. } | ScanEnd::Cancelled { last_hit, .. } => {
            last_hit.and_then(|hit| hit.metadata)
        }
    }
}

pub struct WatchArgs {
    pub works: Vec<String>,
    pub after: Option<String>,
    pub segment: Option<String>,
    pub interval: Option<String>,
    pub max_attempts: Option<u32>,
    pub follow: bool,
}

pub async fn watch(ctx: Arc<AppContext>, args: WatchArgs) -> Result<()> {
    if args.works.len() > 1 && (args.after.is_some() || args.segment.is_some()) {
        return Err(BookwatchError::Config(
            "--after and --segment apply to a single book".into(),
        ));
    }

    let mut policy = ScanPolicy::next_episode(&ctx.config.scanner);
    if let Some(interval) = &args.interval {
        policy = policy.with_interval(parse_interval(interval).map_err(BookwatchError::Config)?);
    }
    if let Some(max_attempts) = args.max_attempts {
        policy = policy.with_max_attempts(max_attempts);
    }

    let after = args.after.as_deref().map(EpisodeId::parse).transpose()?;
    let targets = args
        .works
        .iter()
        .map(|raw| -> Result<WatchTarget> {
            Ok(WatchTarget {
                work: WorkId::parse(raw)?,
                after: after.clone(),
                segment: args.segment.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let watcher = Arc::new(Watcher::new(ctx).with_policy(policy).follow(args.follow));
    let results = watcher.watch_all(targets).await;

    let mut errors = 0;
    for (work, result) in results {
        match result {
            Ok(WatchOutcome::Downloaded { episode, report }) => println!(
                "{}: downloaded {} pages of {} to {}",
                work,
                report.pages_written,
                episode,
                report.directory.display()
            ),
            Ok(WatchOutcome::Exhausted) => println!("{}: gave up", work),
            Ok(WatchOutcome::Cancelled) => println!("{}: stopped", work),
            Err(e) => {
                errors += 1;
                eprintln!("{}: {}", work, e);
            }
        }
    }

    if errors > 0 {
        return Err(BookwatchError::Other(format!("{} watches failed", errors)));
    }
    Ok(())
}

pub async fn download_episode(
    ctx: &AppContext,
    work: &str,
    episode: &str,
    max_pages: Option<u32>,
) -> Result<()> {
    let work = WorkId::parse(work)?;
    let episode = EpisodeId::parse(episode)?;

    let metadata = ctx.probe.episode_metadata(&work, &episode).await?;
    if !metadata.is_published() {
        return Err(BookwatchError::Other(format!(
            "Episode {} is not published",
            episode
        )));
    }

    let target = EpisodeDownload {
        segment: metadata.server_segment()?,
        auth_token: metadata.auth_token.clone().unwrap_or_default(),
        max_pages: max_pages.unwrap_or(ctx.config.downloader.max_pages),
        work,
        episode,
    };

    println!("Downloading {} ({})", target.episode, metadata.display_title());
    let report = ctx.downloader(ctx.cancel.clone()).download(&target).await?;
    println!(
        "Downloaded {} pages to {} ({:?})",
        report.pages_written,
        report.directory.display(),
        report.stop
    );

    if let Some(book) = ctx.store.get_book_by_lookup(target.work.as_str())? {
        let mut entry = Episode::new(book.id, &target.episode);
        entry.name = metadata.title.clone();
        entry.is_downloaded = true;
        if !ctx.store.add_episode(&entry)? {
            ctx.store.set_downloaded(target.episode.as_str(), true)?;
        }
    }
    Ok(())
}

pub fn list_books(ctx: &AppContext) -> Result<()> {
    let books = ctx.store.get_all_books()?;

    if books.is_empty() {
        println!("No books");
        return Ok(());
    }

    for book in books {
        let latest = ctx.store.get_latest_episode(&book.lookup_value)?;
        let episodes = ctx.store.get_episodes_by_book(book.id)?;
        let downloaded = episodes.iter().filter(|e| e.is_downloaded).count();

        println!(
            "{} ({} episodes, {} downloaded)\n  id {}",
            book.display_name(),
            episodes.len(),
            downloaded,
            book.lookup_value
        );
        if let Some(latest) = latest {
            println!("  latest {} {}", latest.lookup_value, latest.display_name());
        }
    }

    Ok(())
}
