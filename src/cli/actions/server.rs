use crate::security::{
    delivery::WebhookDelivery,
    store::{AccountStore, MemoryStore, PgStore, SessionStore, StoreBackend},
    Security, SecurityConfig,
};
use crate::warden;
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub store: StoreBackend,
    pub dsn: Option<String>,
    pub security: SecurityConfig,
    pub admin: Option<(String, SecretString)>,
    pub challenge_webhook: Option<Url>,
}

fn shared<T>(store: Arc<T>) -> (Arc<dyn SessionStore>, Arc<dyn AccountStore>)
where
    T: SessionStore + AccountStore + 'static,
{
    let sessions: Arc<dyn SessionStore> = store.clone();
    let accounts: Arc<dyn AccountStore> = store;
    (sessions, accounts)
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be reached, the admin cannot be
/// seeded, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let (sessions, accounts) = match args.store {
        StoreBackend::Memory => shared(Arc::new(MemoryStore::new())),
        StoreBackend::Postgres => {
            let dsn = args
                .dsn
                .as_deref()
                .context("missing required argument: --dsn")?;
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            shared(Arc::new(PgStore::new(pool)))
        }
    };

    let mut security = Security::new(args.security, sessions, accounts)?;
    if let Some(url) = args.challenge_webhook {
        security = security.with_delivery(Arc::new(WebhookDelivery::new(
            url,
            warden::APP_USER_AGENT,
        )?));
    }

    if let Some((email, password)) = &args.admin {
        if security.seed_initial_admin(email, password).await?.is_none() {
            info!("Initial admin {email} already exists");
        }
    }

    warden::new(args.port, security).await
}

fn log_startup_args(args: &Args) {
    let config = &args.security;
    let store = match args.store {
        StoreBackend::Memory => "memory",
        StoreBackend::Postgres => "postgres",
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("store", store.to_string()),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "n/a".to_string(), redact_dsn),
        ),
        ("algorithm", format!("{:?}", config.algorithm())),
        (
            "max_challenge_attempts",
            config.max_challenge_attempts().to_string(),
        ),
        (
            "session_refresh",
            config.authentication_session_refresh().to_string(),
        ),
        ("cookie_prefix", config.cookie().prefix.clone()),
        ("admin_set", args.admin.is_some().to_string()),
        (
            "challenge_webhook",
            args.challenge_webhook
                .as_ref()
                .map_or_else(|| "log".to_string(), ToString::to_string),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "warden {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(warden::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ = std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
