//! Keyring-based storage of the Subsonic password
//!
//! Only the server URL and username are written to the config file; the
//! password lives in the platform keyring.

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use keyring::Entry;
use tracing::{debug, info};

use crate::config::ServerConfig;

const KEYRING_SERVICE: &str = "tunestash";

/// Fill in whatever was not given on the command line by prompting
pub fn prompt_missing(
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Result<(ServerConfig, String)> {
    let url = match url {
        Some(url) => url,
        None => Input::new()
            .with_prompt("Subsonic server URL")
            .interact_text()
            .context("Failed to read URL")?,
    };

    let username = match username {
        Some(username) => username,
        None => Input::new()
            .with_prompt("Username")
            .interact_text()
            .context("Failed to read username")?,
    };

    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    let server = ServerConfig {
        url: url.trim_end_matches('/').to_string(),
        username,
    };
    Ok((server, password))
}

/// Load the password stored for `server`
pub fn load_password(server: &ServerConfig) -> Result<String> {
    entry(server)?
        .get_password()
        .with_context(|| format!("No password for {} in keyring", entry_key(server)))
}

/// Store the password for `server`
pub fn store_password(server: &ServerConfig, password: &str) -> Result<()> {
    entry(server)?
        .set_password(password)
        .context("Failed to store password in keyring")?;
    info!("Password stored in keyring");
    Ok(())
}

/// Forget the password of a server that is no longer configured
pub fn clear_password(server: &ServerConfig) {
    match entry(server).map(|e| e.delete_credential()) {
        Ok(Ok(())) => debug!("Removed {} from keyring", entry_key(server)),
        Ok(Err(e)) => debug!("Nothing removed from keyring: {}", e),
        Err(e) => debug!("Keyring unavailable: {}", e),
    }
}

fn entry_key(server: &ServerConfig) -> String {
    format!("subsonic:{}@{}", server.username, server.url)
}

fn entry(server: &ServerConfig) -> Result<Entry> {
    Entry::new(KEYRING_SERVICE, &entry_key(server)).context("Failed to access keyring")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_skipped_when_everything_given() {
        let (server, password) = prompt_missing(
            Some("https://music.example.com/".to_string()),
            Some("alice".to_string()),
            Some("sesame".to_string()),
        )
        .unwrap();

        assert_eq!(server.url, "https://music.example.com");
        assert_eq!(server.username, "alice");
        assert_eq!(password, "sesame");
    }

    #[test]
    fn test_entry_key_is_per_user_and_server() {
        let server = ServerConfig {
            url: "https://music.example.com".to_string(),
            username: "alice".to_string(),
        };
        let other = ServerConfig {
            username: "bob".to_string(),
            ..server.clone()
        };

        assert_eq!(entry_key(&server), "subsonic:alice@https://music.example.com");
        assert_ne!(entry_key(&server), entry_key(&other));
    }
}
