//! Token authentication for Subsonic requests
//!
//! Every request carries a fresh random salt and `md5(password + salt)`
//! instead of the password itself (API 1.13.0 and later).

use md5::{Digest, Md5};
use rand::Rng;
use rand::distributions::Alphanumeric;
use url::Url;

pub const API_VERSION: &str = "1.16.1";
pub const CLIENT_NAME: &str = "tunestash";

const SALT_LEN: usize = 12;

#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Append authentication and protocol parameters to `url`
    pub fn sign(&self, url: &mut Url) {
        let salt = salt();
        let token = token(&self.password, &salt);

        url.query_pairs_mut()
            .append_pair("u", &self.username)
            .append_pair("t", &token)
            .append_pair("s", &salt)
            .append_pair("v", API_VERSION)
            .append_pair("c", CLIENT_NAME)
            .append_pair("f", "json");
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect()
}

fn token(password: &str, salt: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    format!("{:x}", hasher.finalize())
}
