//! SQLite-backed [`AuthStore`]
//!
//! Every multi-step operation (role cascades, user creation, app deletion)
//! runs in its own short transaction.

use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::debug;

use crate::domain::{
    Meta, NewApp, NewRole, NewUser, PersistedApp, Role, RoleOwner, User, RESERVED_ID,
};
use crate::infra::{AppFilter, AuthStore, Result, StoreError};
use crate::policy::AccessPolicyRule;

#[derive(Debug, FromRow)]
struct AppRow {
    id: i64,
    hash: String,
    secret: String,
    mount_point: String,
    name: String,
    description: String,
    version: String,
    meta: String,
    access_policies: String,
}

impl TryFrom<AppRow> for PersistedApp {
    type Error = StoreError;

    fn try_from(row: AppRow) -> Result<Self> {
        let meta: Meta = serde_json::from_str(&row.meta)?;
        let access_policies: Vec<AccessPolicyRule> = serde_json::from_str(&row.access_policies)?;

        Ok(PersistedApp {
            id: row.id,
            hash: row.hash,
            secret: row.secret,
            mount_point: row.mount_point,
            name: row.name,
            description: row.description,
            version: row.version,
            meta,
            access_policies,
            available_roles: Vec::new(),
        })
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: i64,
    app_id: i64,
    name: String,
    description: String,
    auto_assign: bool,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: row.id,
            app_id: row.app_id,
            name: row.name,
            description: row.description,
            auto_assign: row.auto_assign,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    login: String,
    name: String,
    password_hash: String,
    email_address: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            login: row.login,
            name: row.name,
            password_hash: row.password_hash,
            email_address: row.email_address,
            roles: Vec::new(),
        }
    }
}

const APP_COLUMNS: &str =
    "id, hash, secret, mount_point, name, description, version, meta, access_policies";

fn unique_violation(e: sqlx::Error, entity: &'static str, key: &str) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Duplicate {
            entity,
            key: key.to_string(),
        },
        _ => StoreError::Database(e),
    }
}

fn forbidden(what: &str) -> StoreError {
    StoreError::Forbidden(what.to_string())
}

/// SQLite store for apps, roles and users
#[derive(Clone)]
pub struct SqliteAuthStore {
    pool: SqlitePool,
}

impl SqliteAuthStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url`. In-memory databases keep their connections open for
    /// the pool's lifetime.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let mut options = SqlitePoolOptions::new().max_connections(max_connections);
        if url.contains(":memory:") {
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options.connect(url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn roles_of_app(&self, app_id: i64) -> Result<Vec<Role>> {
        self.load_roles(RoleOwner::App(app_id)).await
    }

    async fn find_app_where(&self, column: &str, value: &str) -> Result<Option<PersistedApp>> {
        let query = format!("SELECT {APP_COLUMNS} FROM apps WHERE {column} = ? LIMIT 1");
        let row = sqlx::query_as::<_, AppRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut app = PersistedApp::try_from(row)?;
                app.available_roles = self.roles_of_app(app.id).await?;
                Ok(Some(app))
            }
            None => Ok(None),
        }
    }

    async fn fetch_role(&self, id: i64) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT id, app_id, name, description, auto_assign FROM roles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Role::from))
    }

    async fn fetch_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, login, name, password_hash, email_address FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn fetch_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, login, name, password_hash, email_address FROM users WHERE login = ?",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }
}

// ============================================================================
// Cascade steps, run inside a caller's transaction
// ============================================================================

async fn exists(conn: &mut SqliteConnection, table: &str, id: i64) -> Result<bool> {
    let query = format!("SELECT COUNT(*) FROM {table} WHERE id = ?");
    let row: (i64,) = sqlx::query_as(&query).bind(id).fetch_one(&mut *conn).await?;
    Ok(row.0 > 0)
}

async fn grant_to_reserved_user(conn: &mut SqliteConnection, role_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO user_roles (user_id, role_id)
        SELECT id, ? FROM users WHERE id = ?
        "#,
    )
    .bind(role_id)
    .bind(RESERVED_ID)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn grant_to_all_users(conn: &mut SqliteConnection, role_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO user_roles (user_id, role_id) SELECT id, ? FROM users",
    )
    .bind(role_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn strip_from_all_users(conn: &mut SqliteConnection, role_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM user_roles WHERE role_id = ?")
        .bind(role_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl AuthStore for SqliteAuthStore {
    async fn get_app(&self, id: i64, load_roles: bool) -> Result<Option<PersistedApp>> {
        let query = format!("SELECT {APP_COLUMNS} FROM apps WHERE id = ?");
        let row = sqlx::query_as::<_, AppRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut app = PersistedApp::try_from(row)?;
        if load_roles {
            app.available_roles = self.roles_of_app(app.id).await?;
        }
        Ok(Some(app))
    }

    async fn find_app_by_hash(&self, hash: &str) -> Result<Option<PersistedApp>> {
        self.find_app_where("hash", hash).await
    }

    async fn find_app_by_mount_point(&self, mount_point: &str) -> Result<Option<PersistedApp>> {
        self.find_app_where("mount_point", mount_point).await
    }

    async fn find_apps(&self, filter: AppFilter) -> Result<Vec<PersistedApp>> {
        let query = format!(
            r#"
            SELECT {APP_COLUMNS} FROM apps
            WHERE (? IS NULL OR id != ?)
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#
        );
        let rows = sqlx::query_as::<_, AppRow>(&query)
            .bind(filter.exclude_id)
            .bind(filter.exclude_id)
            .bind(filter.limit.map(i64::from).unwrap_or(-1))
            .bind(i64::from(filter.offset.unwrap_or(0)))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PersistedApp::try_from).collect()
    }

    async fn create_app(&self, app: NewApp) -> Result<PersistedApp> {
        if self.find_app_where("hash", &app.hash).await?.is_some() {
            return Err(StoreError::Duplicate {
                entity: "app",
                key: app.hash,
            });
        }

        let now = Utc::now().to_rfc3339();
        let meta = serde_json::to_string(&app.meta)?;
        let policies = serde_json::to_string(&app.access_policies)?;

        let result = sqlx::query(
            r#"
            INSERT INTO apps (
                id, hash, secret, mount_point, name, description,
                version, meta, access_policies, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(app.id)
        .bind(&app.hash)
        .bind(&app.secret)
        .bind(&app.mount_point)
        .bind(&app.name)
        .bind(&app.description)
        .bind(&app.version)
        .bind(&meta)
        .bind(&policies)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "app mount point", &app.mount_point))?;

        let id = result.last_insert_rowid();
        debug!(app_id = id, hash = %app.hash, "App created");

        Ok(PersistedApp {
            id,
            hash: app.hash,
            secret: app.secret,
            mount_point: app.mount_point,
            name: app.name,
            description: app.description,
            version: app.version,
            meta: app.meta,
            access_policies: app.access_policies,
            available_roles: Vec::new(),
        })
    }

    async fn update_app(&self, app: &PersistedApp) -> Result<()> {
        let meta = serde_json::to_string(&app.meta)?;
        let policies = serde_json::to_string(&app.access_policies)?;

        let result = sqlx::query(
            r#"
            UPDATE apps
            SET secret = ?, mount_point = ?, name = ?, description = ?,
                version = ?, meta = ?, access_policies = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&app.secret)
        .bind(&app.mount_point)
        .bind(&app.name)
        .bind(&app.description)
        .bind(&app.version)
        .bind(&meta)
        .bind(&policies)
        .bind(Utc::now().to_rfc3339())
        .bind(app.id)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "app mount point", &app.mount_point))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("app", app.id));
        }
        Ok(())
    }

    async fn delete_app(&self, id: i64) -> Result<()> {
        if id == RESERVED_ID {
            return Err(forbidden("the reserved app cannot be deleted"));
        }

        let mut tx = self.pool.begin().await?;
        if !exists(&mut tx, "apps", id).await? {
            return Err(StoreError::not_found("app", id));
        }

        sqlx::query(
            "DELETE FROM user_roles WHERE role_id IN (SELECT id FROM roles WHERE app_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let roles = sqlx::query("DELETE FROM roles WHERE app_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM apps WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(app_id = id, roles = roles.rows_affected(), "App deleted");
        Ok(())
    }

    async fn create_role(&self, role: NewRole) -> Result<Role> {
        let mut tx = self.pool.begin().await?;
        if !exists(&mut tx, "apps", role.app_id).await? {
            return Err(StoreError::not_found("app", role.app_id));
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO roles (id, app_id, name, description, auto_assign, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(role.id)
        .bind(role.app_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.auto_assign)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        grant_to_reserved_user(&mut tx, id).await?;
        if role.auto_assign {
            grant_to_all_users(&mut tx, id).await?;
        }

        tx.commit().await?;
        debug!(role_id = id, app_id = role.app_id, name = %role.name, "Role created");

        Ok(Role {
            id,
            app_id: role.app_id,
            name: role.name,
            description: role.description,
            auto_assign: role.auto_assign,
        })
    }

    async fn update_role(&self, role: &Role) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let was_auto_assign: bool =
            sqlx::query_scalar("SELECT auto_assign FROM roles WHERE id = ?")
                .bind(role.id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::not_found("role", role.id))?;

        sqlx::query(
            "UPDATE roles SET name = ?, description = ?, auto_assign = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.auto_assign)
        .bind(Utc::now().to_rfc3339())
        .bind(role.id)
        .execute(&mut *tx)
        .await?;

        if role.auto_assign {
            grant_to_all_users(&mut tx, role.id).await?;
        } else if was_auto_assign {
            let stripped = strip_from_all_users(&mut tx, role.id).await?;
            grant_to_reserved_user(&mut tx, role.id).await?;
            debug!(role_id = role.id, users = stripped, "Role switched to manual assignment");
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> Result<()> {
        if id == RESERVED_ID {
            return Err(forbidden("the reserved role cannot be deleted"));
        }

        let mut tx = self.pool.begin().await?;
        if !exists(&mut tx, "roles", id).await? {
            return Err(StoreError::not_found("role", id));
        }

        let stripped = strip_from_all_users(&mut tx, id).await?;
        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(role_id = id, users = stripped, "Role deleted");
        Ok(())
    }

    async fn remove_role_from_app(&self, app_id: i64, role_id: i64) -> Result<()> {
        if app_id == RESERVED_ID && role_id == RESERVED_ID {
            return Err(forbidden(
                "the reserved role cannot be removed from the reserved app",
            ));
        }

        match self.fetch_role(role_id).await? {
            Some(role) if role.app_id == app_id => self.delete_role(role_id).await,
            _ => Err(StoreError::not_found("role", role_id)),
        }
    }

    async fn load_roles(&self, owner: RoleOwner) -> Result<Vec<Role>> {
        let rows = match owner {
            RoleOwner::User(user_id) => {
                sqlx::query_as::<_, RoleRow>(
                    r#"
                    SELECT r.id, r.app_id, r.name, r.description, r.auto_assign
                    FROM roles r
                    JOIN user_roles ur ON ur.role_id = r.id
                    WHERE ur.user_id = ?
                    ORDER BY r.id ASC
                    "#,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            RoleOwner::App(app_id) => {
                sqlx::query_as::<_, RoleRow>(
                    r#"
                    SELECT id, app_id, name, description, auto_assign
                    FROM roles
                    WHERE app_id = ?
                    ORDER BY id ASC
                    "#,
                )
                .bind(app_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn users_for_role(&self, role_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM user_roles WHERE role_id = ? ORDER BY user_id")
                .bind(role_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn get_user(&self, id: i64, load_roles: bool) -> Result<Option<User>> {
        let Some(mut user) = self.fetch_user_by_id(id).await? else {
            return Ok(None);
        };
        if load_roles {
            user.roles = self.load_roles(RoleOwner::User(user.id)).await?;
        }
        Ok(Some(user))
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let Some(mut user) = self.fetch_user_by_login(login).await? else {
            return Ok(None);
        };
        user.roles = self.load_roles(RoleOwner::User(user.id)).await?;
        Ok(Some(user))
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let taken: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE login = ?")
            .bind(&user.login)
            .fetch_one(&mut *tx)
            .await?;
        if taken.0 > 0 {
            return Err(StoreError::Duplicate {
                entity: "user",
                key: user.login,
            });
        }

        for role_id in &user.role_ids {
            if !exists(&mut tx, "roles", *role_id).await? {
                return Err(StoreError::UnknownRole(*role_id));
            }
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, login, name, password_hash, email_address, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id)
        .bind(&user.login)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(&user.email_address)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        for role_id in &user.role_ids {
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
                .bind(id)
                .bind(*role_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_roles (user_id, role_id)
            SELECT ?, id FROM roles WHERE auto_assign = 1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(user_id = id, login = %user.login, "User created");

        self.get_user(id, true)
            .await?
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        if id == RESERVED_ID {
            return Err(forbidden("the reserved user cannot be deleted"));
        }

        let mut tx = self.pool.begin().await?;
        if !exists(&mut tx, "users", id).await? {
            return Err(StoreError::not_found("user", id));
        }

        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn add_role_to_user(&self, user_id: i64, role_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !exists(&mut tx, "users", user_id).await? {
            return Err(StoreError::not_found("user", user_id));
        }
        if !exists(&mut tx, "roles", role_id).await? {
            return Err(StoreError::not_found("role", role_id));
        }

        let result =
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
                .bind(user_id)
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyHasRole { user_id, role_id });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_role_from_user(&self, user_id: i64, role_id: i64) -> Result<()> {
        if user_id == RESERVED_ID && role_id == RESERVED_ID {
            return Err(forbidden(
                "the reserved role cannot be removed from the reserved user",
            ));
        }
        if self.fetch_role(role_id).await?.is_none() {
            return Err(StoreError::not_found("role", role_id));
        }

        sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn roles_for_user_in_app(&self, user_id: i64, app_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = ? AND r.app_id = ?
            ORDER BY r.id ASC
            "#,
        )
        .bind(user_id)
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
