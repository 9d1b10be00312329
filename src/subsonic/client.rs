//! Subsonic API HTTP client

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::auth::{CLIENT_NAME, Credentials};
use super::models::*;
use crate::download::LyricsSource;
use crate::offline::Lyrics;

/// HTTP client for the Subsonic REST API
#[derive(Debug, Clone)]
pub struct SubsonicClient {
    base_url: Url,
    credentials: Credentials,
    http_client: Client,
}

impl SubsonicClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid server URL: {}", base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http_client = Client::builder()
            .user_agent(format!("{}/{}", CLIENT_NAME, env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            credentials: Credentials::new(username, password),
            http_client,
        })
    }

    /// Signed URL of an endpoint with extra query parameters
    fn endpoint(&self, name: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("rest/{}", name))
            .with_context(|| format!("Failed to build URL for {}", name))?;
        self.credentials.sign(&mut url);
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, name: &str, params: &[(&str, &str)]) -> Result<Option<T>> {
        let url = self.endpoint(name, params)?;
        debug!("GET {} ({})", name, self.credentials.username());

        let response: SubsonicResponse<T> = self
            .http_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", name))?
            .error_for_status()
            .with_context(|| format!("{} was rejected", name))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", name))?;

        let inner = response.subsonic_response;
        if inner.status != "ok" {
            match inner.error {
                Some(error) => anyhow::bail!("Subsonic error {}: {}", error.code, error.message),
                None => anyhow::bail!("Unknown Subsonic error"),
            }
        }
        Ok(inner.data)
    }

    /// Test the connection and credentials
    pub async fn ping(&self) -> Result<()> {
        self.get::<Empty>("ping", &[]).await?;
        Ok(())
    }

    pub async fn get_song(&self, id: &str) -> Result<Song> {
        self.get::<SongData>("getSong", &[("id", id)])
            .await?
            .map(|d| d.song)
            .ok_or_else(|| anyhow::anyhow!("Song {} not found", id))
    }

    pub async fn get_album(&self, id: &str) -> Result<AlbumWithSongs> {
        self.get::<AlbumData>("getAlbum", &[("id", id)])
            .await?
            .map(|d| d.album)
            .ok_or_else(|| anyhow::anyhow!("Album {} not found", id))
    }

    /// Where the original file of a song is fetched from
    pub fn download_url(&self, id: &str) -> Result<Url> {
        self.endpoint("download", &[("id", id)])
    }

    /// Time-synced lyrics of a song (OpenSubsonic)
    pub async fn get_lyrics(&self, id: &str) -> Result<Lyrics> {
        self.get::<LyricsListData>("getLyricsBySongId", &[("id", id)])
            .await?
            .and_then(|d| d.lyrics_list.into_synced())
            .ok_or_else(|| anyhow::anyhow!("No synced lyrics for {}", id))
    }
}

#[async_trait]
impl LyricsSource for SubsonicClient {
    async fn fetch_lyrics(&self, track_id: &str) -> Result<Lyrics> {
        self.get_lyrics(track_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = SubsonicClient::new("https://music.test/navidrome", "alice", "pw").unwrap();
        let url = client.download_url("song 1").unwrap();

        assert_eq!(url.path(), "/navidrome/rest/download");
        assert!(url.query_pairs().any(|(k, v)| k == "id" && v == "song 1"));
        assert!(url.query_pairs().any(|(k, v)| k == "u" && v == "alice"));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(SubsonicClient::new("not a url", "alice", "pw").is_err());
    }
}
