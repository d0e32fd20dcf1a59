//! Service configuration.
//!
//! Every setting is read from the environment. Unset or empty variables fall
//! back to the value in [`DEFAULTS`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::migrations::AdminSeed;

/// Environment key and its default value.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("DATABASE_URL", "sqlite://forward-gate.db?mode=rwc"),
    ("HOST", "0.0.0.0"),
    ("PORT", "3032"),
    ("MAX_DB_CONNECTIONS", "5"),
    ("ADMIN_LOGIN", "admin"),
    ("ADMIN_PASSWORD", "admin"),
    ("ADMIN_NAME", "admin"),
    ("ADMIN_EMAIL_ADDRESS", "admin@admin.com"),
    ("APPS_INSTALL_DIR", "/apps"),
    ("KEYS_FILE", "/keys.properties"),
    ("ACTIONS_FILE", "/api.properties"),
    ("SESSION_COOKIE_NAME", "forward-gate.session"),
    ("COOKIE_SECRET", "thisIsTheDefaultSecret"),
    ("POLL_INTERVAL_MS", "1000"),
    ("STATIC_FILE_DIR", "/ui"),
];

/// Default for `key`, empty when the key is unknown.
pub fn default_for(key: &str) -> &'static str {
    DEFAULTS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or("")
}

/// Environment value for `key`, or its default when unset or empty.
pub fn getenv_or_default(key: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default_for(key).to_string(),
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL.
    pub database_url: String,
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Maximum database connections.
    pub max_connections: u32,
    /// Credentials of the reserved admin user.
    pub admin: AdminSeed,
    /// Directory holding `installed_apps.json`.
    pub apps_install_dir: PathBuf,
    pub keys_file: PathBuf,
    pub actions_file: PathBuf,
    pub session_cookie_name: String,
    pub cookie_secret: String,
    /// Period of the manifest, key file and action file watches.
    pub poll_interval: Duration,
    /// Admin UI bundle. The proxy serves it; this service only reports it.
    pub static_file_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(getenv_or_default)
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> String,
    {
        let host = lookup("HOST");
        let port: u16 = parse(&lookup, "PORT")?;
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;

        let poll_ms: u64 = parse(&lookup, "POLL_INTERVAL_MS")?;
        if poll_ms == 0 {
            anyhow::bail!("POLL_INTERVAL_MS must be positive");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL"),
            listen_addr,
            max_connections: parse(&lookup, "MAX_DB_CONNECTIONS")?,
            admin: AdminSeed {
                login: lookup("ADMIN_LOGIN"),
                password: lookup("ADMIN_PASSWORD"),
                name: lookup("ADMIN_NAME"),
                email_address: lookup("ADMIN_EMAIL_ADDRESS"),
            },
            apps_install_dir: PathBuf::from(lookup("APPS_INSTALL_DIR")),
            keys_file: PathBuf::from(lookup("KEYS_FILE")),
            actions_file: PathBuf::from(lookup("ACTIONS_FILE")),
            session_cookie_name: lookup("SESSION_COOKIE_NAME"),
            cookie_secret: lookup("COOKIE_SECRET"),
            poll_interval: Duration::from_millis(poll_ms),
            static_file_dir: PathBuf::from(lookup("STATIC_FILE_DIR")),
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> anyhow::Result<T>
where
    F: Fn(&str) -> String,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = lookup(key);
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {raw:?}"))
}
