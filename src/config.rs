//! Daemon configuration.
//!
//! Loaded once at startup from the YAML file named by `DIRSERVE_CONFIG`
//! (defaults otherwise); `LISTEN` overrides the listen address. The
//! resulting value is read-only and shared by reference.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::auth::{CredentialStore, ha1};

/// Who may use a share for reading or writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Nobody
    #[serde(rename = "none")]
    Denied,
    Anonymous,
    Authenticated,
}

fn default_read() -> Access {
    Access::Anonymous
}

fn default_write() -> Access {
    Access::Denied
}

/// A directory published under a URL prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    /// URL prefix, e.g. `/pub`
    pub mount: String,
    /// Directory on disk
    pub path: PathBuf,
    #[serde(default = "default_read")]
    pub read: Access,
    #[serde(default = "default_write")]
    pub write: Access,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Precomputed `MD5(username:realm:password)`
    #[serde(default)]
    pub ha1: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub realm: String,
    pub auth_failure_delay_ms: u64,
    pub read_buffer_size: usize,
    pub max_head_size: usize,
    pub shares: Vec<ShareConfig>,
    pub users: Vec<UserConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            realm: "dirserve".to_string(),
            auth_failure_delay_ms: 1000,
            read_buffer_size: 16 * 1024,
            max_head_size: 64 * 1024,
            shares: Vec::new(),
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the file named by `DIRSERVE_CONFIG`, if set, then applies
    /// the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("DIRSERVE_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                Self::from_yaml(&text).with_context(|| format!("parsing config file {path}"))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            config.listen_addr = listen_addr;
        }
        Ok(config)
    }

    /// Parses YAML and fills in missing HA1 hashes from passwords.
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let mut config: Config = serde_yaml::from_str(text)?;
        for user in &mut config.users {
            if user.ha1.is_none() {
                if let Some(password) = &user.password {
                    user.ha1 = Some(ha1(&user.username, &config.realm, password));
                }
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shares.is_empty() {
            bail!("no shares configured");
        }
        if self.read_buffer_size == 0 {
            bail!("read_buffer_size must be positive");
        }

        let mut mounts = HashSet::new();
        for share in &self.shares {
            if !share.mount.starts_with('/') {
                bail!("share mount {:?} must start with '/'", share.mount);
            }
            if !mounts.insert(share.mount.trim_end_matches('/')) {
                bail!("duplicate share mount {:?}", share.mount);
            }
            if share.read == Access::Denied {
                bail!("share {:?}: read must be anonymous or authenticated", share.mount);
            }
        }

        for user in &self.users {
            if user.ha1.is_none() && user.password.is_none() {
                bail!("user {:?} has neither password nor ha1", user.username);
            }
        }
        Ok(())
    }
}

impl CredentialStore for Config {
    fn ha1(&self, username: &str) -> Option<String> {
        let user = self.users.iter().find(|u| u.username == username)?;
        user.ha1.clone().or_else(|| {
            user.password
                .as_deref()
                .map(|password| ha1(&user.username, &self.realm, password))
        })
    }
}
