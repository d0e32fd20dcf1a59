use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use forward_gate::auth::{
    issue_app_token, parse_keys_file, ActionMap, MachineKeyStore, SessionValidator,
};
use forward_gate::config::{getenv_or_default, Config};
use forward_gate::crypto::hash_password;
use forward_gate::infra::{AuthStore, SqliteAuthStore};
use forward_gate::registry::{AppRegistry, FileManifest};

const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

fn print_help() {
    eprintln!(
        "\
forward-gate-admin

USAGE:
  forward-gate-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations and seed reserved entities
  hash-password                   Print the argon2 hash of a password
  issue-gatekeeper-token          Print a machine-key bearer header for a label
  issue-session-token             Print a session token for a user id or login
  issue-app-token                 Print a token signed with an app's secret
  sync-once                       Load the app manifest and sync it into the store

COMMON OPTIONS:
  --database-url <sqlite_url>     (defaults to env DATABASE_URL)

hash-password OPTIONS:
  --password <text>               (required)

issue-gatekeeper-token OPTIONS:
  --label <label>                 (required)
  --keys-file <path>              (defaults to env KEYS_FILE)

issue-session-token OPTIONS:
  --user-id <n>                   (this or --login is required)
  --login <login>                 (looks the user up in the store)
  --ttl-secs <n>                  (default: 3600)
  --secret <text>                 (defaults to env COOKIE_SECRET)

issue-app-token OPTIONS:
  --app-id <n>                    (required)
  --ttl-secs <n>                  (default: 3600)

sync-once OPTIONS:
  --apps-dir <path>               (defaults to env APPS_INSTALL_DIR)
"
    );
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

async fn open_store(database_url: Option<String>) -> anyhow::Result<SqliteAuthStore> {
    let config = Config::from_env()?;
    let database_url = database_url.unwrap_or(config.database_url);
    let store = SqliteAuthStore::connect(&database_url, 1).await?;
    forward_gate::migrations::run_sqlite(store.pool()).await?;
    forward_gate::migrations::seed_reserved(&store, &config.admin).await?;
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "migrate" => {
            let mut database_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(take_value(&mut args, &arg)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            open_store(database_url).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "hash-password" => {
            let mut password: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--password" => password = Some(take_value(&mut args, &arg)?),
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let password = password.ok_or_else(|| anyhow::anyhow!("--password is required"))?;
            let hash = hash_password(&password).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{hash}");
            Ok(())
        }
        "issue-gatekeeper-token" => {
            let mut label: Option<String> = None;
            let mut keys_file = PathBuf::from(getenv_or_default("KEYS_FILE"));
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--label" => label = Some(take_value(&mut args, &arg)?),
                    "--keys-file" => keys_file = PathBuf::from(take_value(&mut args, &arg)?),
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let label = label.ok_or_else(|| anyhow::anyhow!("--label is required"))?;
            let contents = tokio::fs::read_to_string(&keys_file)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", keys_file.display()))?;
            let keys = MachineKeyStore::new(
                keys_file,
                PathBuf::new(),
                parse_keys_file(&contents),
                ActionMap::new(),
            );
            println!("{}", keys.issue_bearer(&label)?);
            Ok(())
        }
        "issue-session-token" => {
            let mut database_url: Option<String> = None;
            let mut user_id: Option<u64> = None;
            let mut login: Option<String> = None;
            let mut ttl_secs = DEFAULT_SESSION_TTL_SECS;
            let mut secret = getenv_or_default("COOKIE_SECRET");
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(take_value(&mut args, &arg)?),
                    "--user-id" => user_id = Some(take_value(&mut args, &arg)?.parse()?),
                    "--login" => login = Some(take_value(&mut args, &arg)?),
                    "--ttl-secs" => ttl_secs = take_value(&mut args, &arg)?.parse()?,
                    "--secret" => secret = take_value(&mut args, &arg)?,
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let user_id = match (user_id, login) {
                (Some(id), None) => id,
                (None, Some(login)) => {
                    let store = open_store(database_url).await?;
                    let user = store
                        .find_user_by_login(&login)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("no user with login {login}"))?;
                    u64::try_from(user.id)?
                }
                _ => anyhow::bail!("exactly one of --user-id or --login is required"),
            };
            let sessions = SessionValidator::new(secret.as_bytes());
            println!(
                "{}",
                sessions.issue(user_id, chrono::Duration::seconds(ttl_secs))?
            );
            Ok(())
        }
        "issue-app-token" => {
            let mut database_url: Option<String> = None;
            let mut app_id: Option<i64> = None;
            let mut ttl_secs = DEFAULT_SESSION_TTL_SECS;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(take_value(&mut args, &arg)?),
                    "--app-id" => app_id = Some(take_value(&mut args, &arg)?.parse()?),
                    "--ttl-secs" => ttl_secs = take_value(&mut args, &arg)?.parse()?,
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let app_id = app_id.ok_or_else(|| anyhow::anyhow!("--app-id is required"))?;
            let store = open_store(database_url).await?;
            let app = store
                .get_app(app_id, false)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no app with id {app_id}"))?;
            println!(
                "{}",
                issue_app_token(app.id, &app.secret, chrono::Duration::seconds(ttl_secs))?
            );
            Ok(())
        }
        "sync-once" => {
            let mut database_url: Option<String> = None;
            let mut apps_dir = PathBuf::from(getenv_or_default("APPS_INSTALL_DIR"));
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(take_value(&mut args, &arg)?),
                    "--apps-dir" => apps_dir = PathBuf::from(take_value(&mut args, &arg)?),
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let store: Arc<dyn AuthStore> = Arc::new(open_store(database_url).await?);
            let registry = AppRegistry::new(Arc::new(FileManifest::in_dir(&apps_dir)), store);
            let report = registry.refresh().await?;
            println!(
                "ok: apps created={} updated={} deleted={}, roles created={} updated={} deleted={}",
                report.apps_created,
                report.apps_updated,
                report.apps_deleted,
                report.roles_created,
                report.roles_updated,
                report.roles_deleted
            );
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
