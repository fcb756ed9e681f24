use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bookwatch::app::AppContext;
use bookwatch::cli::{commands, Cli, Commands};
use bookwatch::config::Config;
use bookwatch::watcher::cancel_on_signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let ctx = Arc::new(AppContext::new(config)?);
    cancel_on_signal(ctx.cancel.clone());

    match cli.command {
        Commands::Add { work, title, from } => {
            commands::add_book(&ctx, &work, title.as_deref(), from.as_deref()).await?;
        }
        Commands::Sync { work } => {
            commands::sync_book(&ctx, &work).await?;
        }
        Commands::Newest { work, from } => {
            commands::find_newest(&ctx, &work, from.as_deref()).await?;
        }
        Commands::Watch {
            works,
            after,
            segment,
            interval,
            max_attempts,
            follow,
        } => {
            let args = commands::WatchArgs {
                works,
                after,
                segment,
                interval,
                max_attempts,
                follow,
            };
            commands::watch(ctx.clone(), args).await?;
        }
        Commands::Download {
            work,
            episode,
            max_pages,
        } => {
            commands::download_episode(&ctx, &work, &episode, max_pages).await?;
        }
        Commands::List => {
            commands::list_books(&ctx)?;
        }
    }

    Ok(())
}
