//! Installed apps
//!
//! An [`InstalledApp`] is what the manifest declares; a [`PersistedApp`] is its
//! durable counterpart, reconciled from the manifest by the registry.

use semver::Version;
use serde::{Deserialize, Serialize};

use super::Role;
use crate::crypto::app_identity_hash;
use crate::policy::AccessPolicyRule;

/// Icon and color shown for an app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A role an app version makes available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDescriptor {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Granted to every current and future user when set
    #[serde(default)]
    pub auto_assign: bool,
}

/// One available version of an installed app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub version: Version,

    #[serde(default)]
    pub access_policies: Vec<AccessPolicyRule>,

    #[serde(default)]
    pub available_roles: Vec<RoleDescriptor>,
}

/// An app as declared by the installed-apps manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    /// Short label, part of the identity hash
    pub label: String,

    /// Where the app was installed from, part of the identity hash
    #[serde(default)]
    pub source_location: String,

    pub name: String,

    /// URL path segment the proxy mounts the app under
    pub mount_point: String,

    /// Hex-encoded shared secret for app-signed tokens
    pub secret: String,

    #[serde(default)]
    pub meta: Meta,

    /// Available versions; index 0 is the active one
    pub candidates: Vec<Candidate>,
}

impl InstalledApp {
    /// Stable identity hash derived from label and source location.
    pub fn hash(&self) -> String {
        app_identity_hash(&self.label, &self.source_location)
    }

    /// The candidate that drives the persisted app's policies and roles.
    pub fn active_candidate(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// Version string of the active candidate.
    pub fn version(&self) -> Option<String> {
        self.active_candidate().map(|c| c.version.to_string())
    }
}

/// Durable counterpart of an installed app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedApp {
    pub id: i64,

    /// Immutable lookup key
    pub hash: String,

    #[serde(skip_serializing)]
    pub secret: String,

    pub mount_point: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub meta: Meta,
    pub access_policies: Vec<AccessPolicyRule>,

    /// Roles owned by this app (empty unless loaded)
    pub available_roles: Vec<Role>,
}

impl PersistedApp {
    /// Copy the mutable fields of the manifest app's active candidate onto
    /// this row. Returns `true` if anything changed.
    pub fn apply_manifest(&mut self, app: &InstalledApp, candidate: &Candidate) -> bool {
        let version = candidate.version.to_string();
        let changed = self.mount_point != app.mount_point
            || self.name != app.name
            || self.secret != app.secret
            || self.version != version
            || self.meta != app.meta
            || self.access_policies != candidate.access_policies;

        if changed {
            self.mount_point = app.mount_point.clone();
            self.name = app.name.clone();
            self.secret = app.secret.clone();
            self.version = version;
            self.meta = app.meta.clone();
            self.access_policies = candidate.access_policies.clone();
        }
        changed
    }

    /// Whether this app owns a role with the given name.
    pub fn has_role_named(&self, name: &str) -> bool {
        self.available_roles.iter().any(|r| r.name == name)
    }
}

/// Fields for inserting a new app row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewApp {
    /// Explicit row id; only used for the reserved administrative app
    pub id: Option<i64>,
    pub hash: String,
    pub secret: String,
    pub mount_point: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub meta: Meta,
    pub access_policies: Vec<AccessPolicyRule>,
}

impl NewApp {
    /// Build the insert for a manifest app from its active candidate.
    pub fn from_manifest(app: &InstalledApp, candidate: &Candidate) -> Self {
        Self {
            id: None,
            hash: app.hash(),
            secret: app.secret.clone(),
            mount_point: app.mount_point.clone(),
            name: app.name.clone(),
            description: String::new(),
            version: candidate.version.to_string(),
            meta: app.meta.clone(),
            access_policies: candidate.access_policies.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Effect;

    fn installed() -> InstalledApp {
        serde_json::from_value(serde_json::json!({
            "label": "wallet",
            "sourceLocation": "git://example.org/wallet.git",
            "name": "Wallet",
            "mountPoint": "wallet",
            "secret": "00ff",
            "meta": { "color": "#ff0000" },
            "candidates": [
                {
                    "version": "1.2.0",
                    "accessPolicies": [
                        { "patterns": ["^/api"], "roles": ["user"], "actions": ["get"], "effect": "allow" }
                    ],
                    "availableRoles": [
                        { "name": "user", "description": "Regular user", "autoAssign": true }
                    ]
                },
                { "version": "1.1.0" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_manifest_app_deserializes() {
        let app = installed();
        assert_eq!(app.candidates.len(), 2);
        assert_eq!(app.version().as_deref(), Some("1.2.0"));
        let active = app.active_candidate().unwrap();
        assert_eq!(active.access_policies[0].effect, Effect::Allow);
        assert!(active.available_roles[0].auto_assign);
        assert_eq!(app.meta.icon, None);
    }

    #[test]
    fn test_apply_manifest_reports_changes_once() {
        let app = installed();
        let candidate = app.active_candidate().unwrap().clone();
        let new = NewApp::from_manifest(&app, &candidate);
        let mut persisted = PersistedApp {
            id: 7,
            hash: new.hash,
            secret: "old".into(),
            mount_point: new.mount_point,
            name: new.name,
            description: String::new(),
            version: "1.0.0".into(),
            meta: new.meta,
            access_policies: vec![],
            available_roles: vec![],
        };

        assert!(persisted.apply_manifest(&app, &candidate));
        assert_eq!(persisted.secret, "00ff");
        assert_eq!(persisted.version, "1.2.0");
        assert!(!persisted.apply_manifest(&app, &candidate));
    }
}
