//! tunestash - keep an offline copy of Subsonic music

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunestash::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "tunestash=debug,reqwest=debug"
    } else {
        "tunestash=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Configure {
            url,
            username,
            password,
            storage_dir,
        } => cli::commands::configure(url, username, password, storage_dir).await?,
        Commands::Download { tracks, album } => cli::commands::download(tracks, album).await?,
        Commands::Remove { id } => cli::commands::remove(id).await?,
        Commands::List {
            albums,
            sort,
            descending,
        } => cli::commands::list(albums, sort, descending).await?,
        Commands::Search { query, albums } => cli::commands::search(query, albums).await?,
        Commands::Status { id } => cli::commands::status(id).await?,
        Commands::Lyrics { track } => cli::commands::lyrics(track).await?,
        Commands::Pending { discard, retry } => cli::commands::pending(discard, retry).await?,
        Commands::BackfillLyrics => cli::commands::backfill_lyrics().await?,
        Commands::Completion { shell } => cli::commands::completion(shell),
    }

    Ok(())
}
