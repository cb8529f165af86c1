use crate::cli::actions::{server::Args, Action};
use crate::security::{store::StoreBackend, CookieConfig, SameSite, SecurityConfig};
use anyhow::{anyhow, Context, Result};
use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use url::Url;

fn security_config(matches: &clap::ArgMatches) -> Result<SecurityConfig> {
    let secret = matches
        .get_one::<String>("secret")
        .cloned()
        .context("missing required argument: --secret")?;
    let algorithm = matches
        .get_one::<String>("algorithm")
        .map_or(Ok(Algorithm::HS256), |value| value.parse::<Algorithm>())
        .context("invalid --algorithm")?;
    let same_site = matches
        .get_one::<String>("cookie-samesite")
        .map_or(Ok(SameSite::Strict), |value| value.parse::<SameSite>())?;

    let cookie = CookieConfig {
        prefix: matches
            .get_one::<String>("session-prefix")
            .cloned()
            .unwrap_or_default(),
        same_site,
        secure: matches.get_one::<bool>("cookie-secure").copied().unwrap_or(true),
        http_only: matches
            .get_one::<bool>("cookie-httponly")
            .copied()
            .unwrap_or(true),
        domain: matches.get_one::<String>("cookie-domain").cloned(),
        expires_on_client: matches.get_flag("cookie-expires-on-client"),
    };

    let mut config = SecurityConfig::new(SecretString::from(secret))
        .with_public_secret(
            matches
                .get_one::<String>("public-secret")
                .cloned()
                .map(SecretString::from),
        )
        .with_algorithm(algorithm)
        .with_cookie(cookie)
        .with_authentication_session_refresh(
            matches
                .get_one::<bool>("authentication-session-refresh")
                .copied()
                .unwrap_or(true),
        )
        .with_allow_login_with_username(matches.get_flag("allow-login-with-username"))
        .with_trust_forwarded_for(matches.get_flag("trust-proxy"));

    if let Some(attempts) = matches.get_one::<u32>("max-challenge-attempts") {
        config = config.with_max_challenge_attempts(*attempts);
    }
    if let Some(seconds) = matches.get_one::<i64>("captcha-session-expiration") {
        config = config.with_captcha_session_expiration(*seconds);
    }
    if let Some(seconds) = matches.get_one::<i64>("two-step-session-expiration") {
        config = config.with_two_step_session_expiration(*seconds);
    }
    if let Some(seconds) = matches.get_one::<i64>("authentication-session-expiration") {
        config = config.with_authentication_session_expiration(*seconds);
    }

    config.validate()?;
    Ok(config)
}

/// # Errors
/// Returns an error if required arguments are missing or the security
/// configuration is rejected.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let store = matches
        .get_one::<String>("store")
        .map_or(Ok(StoreBackend::Memory), |value| value.parse::<StoreBackend>())
        .map_err(|err| anyhow!(err))?;
    let dsn = matches.get_one::<String>("dsn").cloned();
    if store == StoreBackend::Postgres && dsn.is_none() {
        return Err(anyhow!("missing required argument: --dsn"));
    }

    let admin = match (
        matches.get_one::<String>("admin-email"),
        matches.get_one::<String>("admin-password"),
    ) {
        (Some(email), Some(password)) => {
            Some((email.clone(), SecretString::from(password.clone())))
        }
        _ => None,
    };

    let challenge_webhook = matches
        .get_one::<String>("challenge-webhook")
        .map(|value| Url::parse(value))
        .transpose()
        .context("invalid --challenge-webhook")?;

    Ok(Action::Server(Args {
        port,
        store,
        dsn,
        security: security_config(matches)?,
        admin,
        challenge_webhook,
    }))
}
