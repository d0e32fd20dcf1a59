//! Legacy machine-key credentials (gatekeeper path)
//!
//! Key file lines look like
//! `kapi_id="001";kapi_key="a27f...";kapi_groups="watcher,spender"`, and only
//! the first three `;`-separated fields of a line are inspected. The action
//! file maps `action_<name>=<group>`.
//!
//! Tokens are `b64(header).b64(payload).hexsig` where `hexsig` is the
//! lower-case hex HMAC-SHA256 of `b64(header).b64(payload)`, keyed by the
//! ASCII bytes of the label's hex key. The embedded `exp` claim is not
//! checked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{decode_base64_any, AuthError};
use crate::crypto::{hmac_sha256_hex, verify_hmac_sha256_hex};
use crate::infra::{spawn_file_watch, FileStat, FileWatcher, ShutdownSignal};

/// Lifetime embedded in issued tokens, in seconds
pub const ISSUED_TOKEN_TTL_SECS: i64 = 10;

const ISSUED_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Keys and group memberships parsed from the key file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTable {
    /// label -> hex key
    pub keys: HashMap<String, String>,

    /// label -> groups
    pub groups: HashMap<String, Vec<String>>,
}

/// action -> required group, parsed from the action file
pub type ActionMap = HashMap<String, String>;

/// Parse the key file.
pub fn parse_keys_file(contents: &str) -> KeyTable {
    let mut table = KeyTable::default();

    for line in contents.lines() {
        let fields: Vec<&str> = line.trim_matches(' ').split(';').collect();
        if fields.len() < 3 {
            continue;
        }

        let mut label = "";
        let mut key = "";
        let mut groups: Vec<String> = Vec::new();

        for field in &fields[..3] {
            let Some((name, value)) = field.trim_matches(' ').split_once('=') else {
                continue;
            };
            let value = value.trim_matches('"');
            match name {
                "kapi_id" => label = value,
                "kapi_key" => key = value,
                "kapi_groups" => {
                    groups = value
                        .split(',')
                        .map(|g| g.trim_matches(' ').to_string())
                        .collect()
                }
                _ => {}
            }
        }

        if label.is_empty() {
            continue;
        }
        if !key.is_empty() {
            table.keys.insert(label.to_string(), key.to_string());
        }
        if !groups.is_empty() {
            table.groups.insert(label.to_string(), groups);
        }
    }

    table
}

/// Parse the action file.
pub fn parse_actions_file(contents: &str) -> ActionMap {
    contents
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.trim_matches(' ').split('=').collect();
            match parts.as_slice() {
                [name, group] => Some((
                    name.strip_prefix("action_").unwrap_or(*name).to_string(),
                    group.to_string(),
                )),
                _ => None,
            }
        })
        .collect()
}

#[derive(Serialize)]
struct IssuedClaims<'a> {
    id: &'a str,
    exp: i64,
}

/// Label-keyed machine credentials with their action groups.
///
/// The key table and the action map sit behind separate locks, so reloading
/// one file never blocks readers of the other.
pub struct MachineKeyStore {
    keys_path: PathBuf,
    actions_path: PathBuf,
    keys_stat: Option<FileStat>,
    actions_stat: Option<FileStat>,
    keys: RwLock<KeyTable>,
    actions: RwLock<ActionMap>,
}

impl MachineKeyStore {
    /// Build a store from already-parsed tables.
    pub fn new(
        keys_path: impl Into<PathBuf>,
        actions_path: impl Into<PathBuf>,
        keys: KeyTable,
        actions: ActionMap,
    ) -> Self {
        Self {
            keys_path: keys_path.into(),
            actions_path: actions_path.into(),
            keys_stat: None,
            actions_stat: None,
            keys: RwLock::new(keys),
            actions: RwLock::new(actions),
        }
    }

    /// Load both files. Either one missing or unreadable is an error.
    pub async fn from_files(
        keys_path: impl Into<PathBuf>,
        actions_path: impl Into<PathBuf>,
    ) -> Result<Self, AuthError> {
        let keys_path = keys_path.into();
        let actions_path = actions_path.into();

        let keys_stat = stat(&keys_path).await?;
        let actions_stat = stat(&actions_path).await?;
        let keys = parse_keys_file(&read(&keys_path).await?);
        let actions = parse_actions_file(&read(&actions_path).await?);

        info!(
            keys = keys.keys.len(),
            actions = actions.len(),
            "Machine keys loaded"
        );

        let mut store = Self::new(keys_path, actions_path, keys, actions);
        store.keys_stat = Some(keys_stat);
        store.actions_stat = Some(actions_stat);
        Ok(store)
    }

    /// Re-read the key file and replace the key table wholesale.
    /// On error the previous table stays in place.
    pub async fn reload_keys(&self) -> Result<(), AuthError> {
        let table = parse_keys_file(&read(&self.keys_path).await?);
        let count = table.keys.len();
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = table;
        info!(keys = count, path = %self.keys_path.display(), "Key file reloaded");
        Ok(())
    }

    /// Re-read the action file and replace the action map wholesale.
    /// On error the previous map stays in place.
    pub async fn reload_actions(&self) -> Result<(), AuthError> {
        let map = parse_actions_file(&read(&self.actions_path).await?);
        let count = map.len();
        *self.actions.write().unwrap_or_else(PoisonError::into_inner) = map;
        info!(actions = count, path = %self.actions_path.display(), "Action file reloaded");
        Ok(())
    }

    fn key_for_label(&self, label: &str) -> Option<String> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .get(label)
            .cloned()
    }

    /// Whether `label` belongs to the group `action` is mapped to.
    pub fn action_allowed(&self, label: &str, action: &str) -> Result<(), AuthError> {
        let group = self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(action)
            .cloned()
            .ok_or_else(|| AuthError::UnmappedAction(action.to_string()))?;

        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let member = keys
            .groups
            .get(label)
            .is_some_and(|groups| groups.contains(&group));

        if member {
            Ok(())
        } else {
            Err(AuthError::ActionNotAllowed {
                label: label.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Verify a token and authorize it for `action`. Returns the label.
    pub fn authenticate(&self, action: &str, token: &str) -> Result<String, AuthError> {
        let parts: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = parts.as_slice() else {
            return Err(AuthError::MalformedToken(
                "expected three segments".to_string(),
            ));
        };

        serde_json::from_slice::<serde_json::Value>(&decode_base64_any(header)?)
            .map_err(|e| AuthError::MalformedToken(format!("header: {e}")))?;
        let claims: serde_json::Value = serde_json::from_slice(&decode_base64_any(payload)?)
            .map_err(|e| AuthError::MalformedToken(format!("payload: {e}")))?;

        let label = claims
            .get("id")
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingClaim("id"))?;

        let key = self
            .key_for_label(label)
            .ok_or_else(|| AuthError::UnknownLabel(label.to_string()))?;

        let signed = &token[..header.len() + 1 + payload.len()];
        if !verify_hmac_sha256_hex(key.as_bytes(), signed.as_bytes(), signature) {
            debug!(label, "Machine-key signature mismatch");
            return Err(AuthError::SignatureMismatch);
        }

        self.action_allowed(label, action)?;
        Ok(label.to_string())
    }

    /// Issue a `Bearer` token for `label`, valid (nominally) for ten seconds.
    pub fn issue_bearer(&self, label: &str) -> Result<String, AuthError> {
        let key = self
            .key_for_label(label)
            .ok_or_else(|| AuthError::UnknownLabel(label.to_string()))?;

        let claims = IssuedClaims {
            id: label,
            exp: Utc::now().timestamp() + ISSUED_TOKEN_TTL_SECS,
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| AuthError::MalformedToken(e.to_string()))?;

        let engine = base64::engine::general_purpose::STANDARD;
        let signed = format!("{}.{}", engine.encode(ISSUED_HEADER), engine.encode(payload));
        let signature = hmac_sha256_hex(key.as_bytes(), signed.as_bytes());

        Ok(format!("Bearer {signed}.{signature}"))
    }

    /// Spawn the key-file and action-file watches.
    pub fn spawn_watchers(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Vec<(&'static str, JoinHandle<()>)> {
        let keys_watch = {
            let store = Arc::clone(self);
            spawn_file_watch(
                "keys",
                watcher(&self.keys_path, self.keys_stat),
                interval,
                shutdown.clone(),
                move || {
                    let store = Arc::clone(&store);
                    async move { store.reload_keys().await }
                },
            )
        };

        let actions_watch = {
            let store = Arc::clone(self);
            spawn_file_watch(
                "actions",
                watcher(&self.actions_path, self.actions_stat),
                interval,
                shutdown,
                move || {
                    let store = Arc::clone(&store);
                    async move { store.reload_actions().await }
                },
            )
        };

        vec![("keys-watch", keys_watch), ("actions-watch", actions_watch)]
    }
}

fn watcher(path: &Path, stat: Option<FileStat>) -> FileWatcher {
    match stat {
        Some(stat) => FileWatcher::primed(path, stat),
        None => FileWatcher::new(path),
    }
}

async fn read(path: &Path) -> Result<String, AuthError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AuthError::KeyFile {
            path: path.display().to_string(),
            source,
        })
}

async fn stat(path: &Path) -> Result<FileStat, AuthError> {
    FileStat::read(path).await.map_err(|source| AuthError::KeyFile {
        path: path.display().to_string(),
        source,
    })
}
