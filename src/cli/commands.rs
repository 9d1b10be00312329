//! CLI command handlers

use anyhow::{Context, Result};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::auth;
use super::session::{self, Session};
use crate::config::Config;
use crate::download::{DownloadManager, DownloadRequest};
use crate::events::OfflineEvent;
use crate::library::{LibraryProvider, OfflineLibrary, SortOrder, Track};
use crate::offline::{AlbumInfo, ArtistRef, OfflineStatus};
use crate::subsonic::SubsonicClient;

/// Handle the `configure` command
pub async fn configure(
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    storage_dir: Option<PathBuf>,
) -> Result<()> {
    let (server, password) = auth::prompt_missing(url, username, password)?;

    println!("{}", "Connecting to Subsonic server...".cyan());
    let client = SubsonicClient::new(&server.url, &server.username, &password)?;
    client.ping().await.context("Server rejected the credentials")?;

    auth::store_password(&server, &password)?;

    let mut config = Config::load()?;
    if let Some(previous) = config.server.replace(server) {
        if Some(&previous) != config.server.as_ref() {
            auth::clear_password(&previous);
        }
    }
    if storage_dir.is_some() {
        config.storage_dir = storage_dir;
    }
    config.save()?;

    println!("{}", "Connected!".green().bold());
    println!("  Offline storage: {}", config.storage_dir()?.display());
    Ok(())
}

/// Handle the `download` command
pub async fn download(tracks: Vec<String>, album: Option<String>) -> Result<()> {
    let session = session::start(Config::load()?).await?;
    report_orphans(&session.manager).await?;

    let client = session.client()?;
    let requests = match album {
        Some(album_id) => album_requests(client, &album_id).await?,
        None => track_requests(client, &tracks).await?,
    };

    download_all(&session, requests).await?;
    session.manager.shutdown().await?;
    Ok(())
}

async fn album_requests(client: &SubsonicClient, album_id: &str) -> Result<Vec<DownloadRequest>> {
    let album = client.get_album(album_id).await?;
    let info = album.to_album_info();
    println!("Album: {} ({} tracks)", album.name.green(), album.song.len());

    album
        .song
        .iter()
        .map(|song| {
            Ok(DownloadRequest {
                track: song.to_track_info(),
                album: info.clone(),
                source: client.download_url(&song.id)?,
            })
        })
        .collect()
}

async fn track_requests(client: &SubsonicClient, ids: &[String]) -> Result<Vec<DownloadRequest>> {
    let mut albums: HashMap<String, AlbumInfo> = HashMap::new();
    let mut requests = Vec::with_capacity(ids.len());

    for id in ids {
        let song = client.get_song(id).await?;
        let album_id = song
            .album_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Track {} does not belong to an album", id))?;

        let album = match albums.get(&album_id) {
            Some(album) => album.clone(),
            None => {
                let album = client.get_album(&album_id).await?.to_album_info();
                albums.insert(album_id, album.clone());
                album
            }
        };

        requests.push(DownloadRequest {
            track: song.to_track_info(),
            album,
            source: client.download_url(&song.id)?,
        });
    }

    Ok(requests)
}

/// Start every request and wait until all of them have settled
async fn download_all(session: &Session, requests: Vec<DownloadRequest>) -> Result<()> {
    let mut events = session.bus.subscribe();
    let mut waiting = HashSet::new();
    let mut skipped = 0;

    for request in requests {
        let id = request.track.id.clone();
        match session.manager.download(request).await? {
            OfflineStatus::Downloaded => skipped += 1,
            _ => {
                waiting.insert(id);
            }
        }
    }

    if skipped > 0 {
        println!("{} track(s) already available offline", skipped);
    }
    if waiting.is_empty() {
        return Ok(());
    }

    let (downloaded, failed) = wait_for(&session.manager, &mut events, waiting).await;

    let cancel = CancellationToken::new();
    let lyrics = session.manager.backfill_lyrics(&cancel).await?;

    println!();
    println!("{}", "Download complete!".green().bold());
    println!("  Tracks downloaded: {}", downloaded);
    println!("  Lyrics fetched: {}", lyrics);
    if !failed.is_empty() {
        println!("  {} {}", "Failed:".red(), failed.join(", "));
    }
    Ok(())
}

/// Wait for tracks to leave the working state; returns (downloaded, failed ids)
async fn wait_for(
    manager: &DownloadManager,
    events: &mut broadcast::Receiver<OfflineEvent>,
    mut waiting: HashSet<String>,
) -> (usize, Vec<String>) {
    let progress = ProgressBar::new(waiting.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(120));

    let mut downloaded = 0;
    let mut failed = Vec::new();

    loop {
        waiting.retain(|id| match manager.status(id) {
            OfflineStatus::Working => true,
            OfflineStatus::Downloaded => {
                downloaded += 1;
                progress.inc(1);
                false
            }
            OfflineStatus::None => {
                failed.push(id.clone());
                progress.inc(1);
                false
            }
        });

        if waiting.is_empty() {
            break;
        }

        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => progress.set_message(event.subject().to_string()),
                Err(RecvError::Lagged(missed)) => debug!("Missed {} status events", missed),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, {} download(s) left unfinished", waiting.len());
                println!("Run {} to resume or discard them.", "tunestash pending".cyan());
                break;
            }
        }
    }

    progress.finish_and_clear();
    (downloaded, failed)
}

async fn report_orphans(manager: &DownloadManager) -> Result<()> {
    let orphans = manager.orphaned().await?;
    if !orphans.is_empty() {
        println!(
            "{} {} download(s) were interrupted earlier; see {}",
            "Note:".yellow(),
            orphans.len(),
            "tunestash pending".cyan()
        );
    }
    Ok(())
}

/// Handle the `remove` command
pub async fn remove(id: String) -> Result<()> {
    let session = session::start(Config::load()?).await?;
    let reader = session.manager.reader();

    if reader.contains_track(&id) {
        session.manager.delete_offline(&id).await?;
        println!("Removed track {}", id.green());
    } else if reader.album(&id).is_some() {
        let count = reader.album_tracks(&id).len();
        session.manager.delete_album(&id).await?;
        println!("Removed album {} ({} tracks)", id.green(), count);
    } else {
        println!("{}", format!("{} is not available offline.", id).yellow());
    }

    session.manager.shutdown().await?;
    Ok(())
}

fn offline_library() -> Result<OfflineLibrary> {
    let config = Config::load()?;
    let reader = session::open_reader(&config)?;
    Ok(OfflineLibrary::with_limit(reader, config.download.search_limit))
}

/// Handle the `list` command
pub async fn list(albums: bool, sort: SortOrder, descending: bool) -> Result<()> {
    let library = offline_library()?;
    if !sort.is_supported_offline() {
        println!("{}", "Offline copies carry no play counts or durations; showing unsorted.".yellow());
    }

    if albums {
        let albums = library.albums(None, sort, !descending).await?;
        if albums.is_empty() {
            println!("{}", "No albums available offline.".yellow());
        }
        for album in &albums {
            println!(
                "  {} {} - {} {}",
                status_marker(album.offline),
                artist_names(&album.artists),
                album.name,
                album.id.dimmed()
            );
        }
    } else {
        let tracks = library.tracks(sort, !descending).await?;
        if tracks.is_empty() {
            println!("{}", "No tracks available offline.".yellow());
        }
        print_tracks(&tracks);
    }

    Ok(())
}

/// Handle the `search` command
pub async fn search(query: String, albums: bool) -> Result<()> {
    let library = offline_library()?;

    if albums {
        for album in library.search_albums(&query).await? {
            println!("  {} - {} {}", artist_names(&album.artists), album.name, album.id.dimmed());
        }
    } else {
        let tracks = library.search_tracks(&query).await?;
        if tracks.is_empty() {
            println!("{}", format!("No offline tracks match '{}'.", query).yellow());
        }
        print_tracks(&tracks);
    }

    Ok(())
}

fn print_tracks(tracks: &[Track]) {
    for track in tracks {
        println!(
            "  {} {} - {} ({}) {}",
            status_marker(track.offline),
            artist_names(&track.artists),
            track.name,
            track.album.name.as_deref().unwrap_or("?"),
            track.id.dimmed()
        );
    }
}

fn status_marker(status: OfflineStatus) -> colored::ColoredString {
    match status {
        OfflineStatus::Downloaded => "●".green(),
        OfflineStatus::Working => "◐".yellow(),
        OfflineStatus::None => "○".dimmed(),
    }
}

fn artist_names(artists: &[ArtistRef]) -> String {
    if artists.is_empty() {
        return "Unknown Artist".to_string();
    }
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Handle the `status` command
pub async fn status(id: String) -> Result<()> {
    let config = Config::load()?;
    let reader = session::open_reader(&config)?;

    if let Some(track) = reader.track(&id) {
        println!("{} - {}", track.name.bold(), track.status());
        println!("  Added: {}", track.added_at.format("%Y-%m-%d %H:%M"));
        if let Some(file_type) = &track.file_type {
            println!("  Format: {}", file_type);
        }
        if track.download_id.is_some() {
            println!("  {}", "Transfer in flight or interrupted".yellow());
        }
        println!("  Lyrics: {}", if reader.lyrics(&id).is_some() { "yes" } else { "no" });
    } else if let Some(album) = reader.album(&id) {
        let tracks = reader.album_tracks(&id);
        let done = tracks.iter().filter(|t| t.is_downloaded()).count();
        println!("{} - {}", album.name.bold(), reader.album_status(&id));
        println!("  Tracks: {}/{} downloaded", done, tracks.len());
    } else {
        println!("{} - {}", id, OfflineStatus::None);
    }

    Ok(())
}

/// Handle the `lyrics` command
pub async fn lyrics(track: String) -> Result<()> {
    let config = Config::load()?;
    let reader = session::open_reader(&config)?;

    let Some(lyrics) = reader.lyrics(&track) else {
        println!("{}", format!("No lyrics stored for {}.", track).yellow());
        return Ok(());
    };

    for (offset, line) in lyrics.iter() {
        println!("{} {}", format_offset(*offset).dimmed(), line.unwrap_or(""));
    }
    Ok(())
}

fn format_offset(offset: Duration) -> String {
    let centis = offset.as_millis() / 10;
    format!("[{:02}:{:02}.{:02}]", centis / 6000, (centis / 100) % 60, centis % 100)
}

/// Handle the `pending` command
pub async fn pending(discard: bool, retry: bool) -> Result<()> {
    let session = session::start(Config::load()?).await?;
    let orphans = session.manager.orphaned().await?;

    if orphans.is_empty() {
        println!("{}", "No interrupted downloads.".green());
        session.manager.shutdown().await?;
        return Ok(());
    }

    println!("{}", "Interrupted downloads:".yellow().bold());
    for track in &orphans {
        println!("  {} {}", track.name, track.id.dimmed());
    }

    if discard {
        for track in &orphans {
            session.manager.delete_offline(&track.id).await?;
        }
        println!("Discarded {} download(s)", orphans.len());
    } else if retry {
        let ids: Vec<String> = orphans.into_iter().map(|t| t.id).collect();
        let requests = track_requests(session.client()?, &ids).await?;
        download_all(&session, requests).await?;
    } else {
        println!();
        println!("Use {} or {}.", "--retry".cyan(), "--discard".cyan());
    }

    session.manager.shutdown().await?;
    Ok(())
}

/// Handle the `backfill-lyrics` command
pub async fn backfill_lyrics() -> Result<()> {
    let session = session::start(Config::load()?).await?;
    session.client()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Fetching lyrics...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let stored = session.manager.backfill_lyrics(&cancel).await?;
    spinner.finish_with_message(format!("Stored lyrics for {} track(s)", stored));

    session.manager.shutdown().await?;
    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = <super::Cli as clap::CommandFactory>::command();
    generate(shell, &mut cmd, "tunestash", &mut io::stdout());
}
