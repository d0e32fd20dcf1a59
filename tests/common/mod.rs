//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;

use forward_gate::auth::{parse_actions_file, parse_keys_file, MachineKeyStore, SessionValidator};
use forward_gate::config::{default_for, Config};
use forward_gate::domain::{Candidate, InstalledApp, Meta, NewUser, RoleDescriptor, User};
use forward_gate::infra::{AuthStore, SqliteAuthStore};
use forward_gate::migrations::{run_sqlite, seed_reserved, AdminSeed};
use forward_gate::policy::AccessPolicyRule;
use forward_gate::registry::{AppRegistry, ManifestSource, RegistryError};
use forward_gate::server::{build_router, AppState};

/// Session secret used by [`TestApp`]
pub const SESSION_SECRET: &str = "test-session-secret";

/// Key file with label `001` in group `watcher`
pub const KEYS_FILE: &str = r#"kapi_id="001";kapi_key="abc123";kapi_groups="watcher"
kapi_id="002";kapi_key="def456";kapi_groups="spender"
"#;

/// Action file mapping `getinfo` to `watcher`
pub const ACTIONS_FILE: &str = "# node actions\naction_getinfo=watcher\naction_spend=spender\n";

pub fn admin_seed() -> AdminSeed {
    AdminSeed {
        login: "admin".to_string(),
        password: "admin".to_string(),
        name: "Administrator".to_string(),
        email_address: "admin@admin.com".to_string(),
    }
}

/// Fresh in-memory store with migrations applied and reserved entities seeded
pub async fn test_store() -> Arc<SqliteAuthStore> {
    let store = SqliteAuthStore::connect("sqlite::memory:", 1)
        .await
        .expect("connect in-memory sqlite");
    run_sqlite(store.pool()).await.expect("run migrations");
    seed_reserved(&store, &admin_seed())
        .await
        .expect("seed reserved entities");
    Arc::new(store)
}

/// Create a user with the given explicit roles
pub async fn create_user(store: &dyn AuthStore, login: &str, role_ids: Vec<i64>) -> User {
    store
        .create_user(NewUser {
            id: None,
            login: login.to_string(),
            name: login.to_string(),
            password_hash: String::new(),
            email_address: format!("{login}@example.com"),
            role_ids,
        })
        .await
        .expect("create user")
}

pub fn role(name: &str, auto_assign: bool) -> RoleDescriptor {
    RoleDescriptor {
        name: name.to_string(),
        description: format!("{name} role"),
        auto_assign,
    }
}

/// Manifest app with a single 1.0.0 candidate
pub fn installed_app(
    label: &str,
    mount_point: &str,
    access_policies: Vec<AccessPolicyRule>,
    available_roles: Vec<RoleDescriptor>,
) -> InstalledApp {
    InstalledApp {
        label: label.to_string(),
        source_location: "test".to_string(),
        name: label.to_string(),
        mount_point: mount_point.to_string(),
        secret: hex::encode(format!("{label}-secret")),
        meta: Meta::default(),
        candidates: vec![Candidate {
            version: semver::Version::new(1, 0, 0),
            access_policies,
            available_roles,
        }],
    }
}

/// In-memory manifest whose app list can be swapped between syncs
#[derive(Default)]
pub struct StaticManifest {
    apps: Mutex<Vec<InstalledApp>>,
}

impl StaticManifest {
    pub fn new(apps: Vec<InstalledApp>) -> Self {
        Self {
            apps: Mutex::new(apps),
        }
    }

    pub fn set(&self, apps: Vec<InstalledApp>) {
        *self.apps.lock().unwrap() = apps;
    }
}

#[async_trait]
impl ManifestSource for StaticManifest {
    async fn load(&self) -> Result<Vec<InstalledApp>, RegistryError> {
        Ok(self.apps.lock().unwrap().clone())
    }

    fn watch_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Fully wired application state over an in-memory store
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<SqliteAuthStore>,
    pub manifest: Arc<StaticManifest>,
}

impl TestApp {
    pub async fn new(apps: Vec<InstalledApp>) -> Self {
        let store = test_store().await;
        let manifest = Arc::new(StaticManifest::new(apps));
        let registry = Arc::new(AppRegistry::new(
            manifest.clone(),
            store.clone() as Arc<dyn AuthStore>,
        ));
        registry.refresh().await.expect("initial sync");

        let machine_keys = MachineKeyStore::new(
            "keys.properties",
            "api.properties",
            parse_keys_file(KEYS_FILE),
            parse_actions_file(ACTIONS_FILE),
        );

        let mut config =
            Config::from_lookup(|key| default_for(key).to_string()).expect("default config");
        config.cookie_secret = SESSION_SECRET.to_string();

        let state = AppState {
            store: store.clone(),
            registry,
            machine_keys: Arc::new(machine_keys),
            sessions: Arc::new(SessionValidator::new(SESSION_SECRET.as_bytes())),
            config: Arc::new(config),
        };

        Self {
            state,
            store,
            manifest,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn session_token(&self, user_id: i64) -> String {
        self.state
            .sessions
            .issue(user_id as u64, chrono::Duration::hours(1))
            .expect("issue session token")
    }
}
