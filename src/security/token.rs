//! Signed session tokens.
//!
//! A token is a JWT whose claims reference a server-side session record. The
//! signature is verified before any claim is read; an absent token is reported
//! as `NotFound` so callers can tell "no session" from "forged session".

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use super::config::{is_hmac, SecurityConfig};
use super::error::{Result, SecurityError};
use super::model::{Session, SessionKind};

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub id: Uuid,
    pub kind: SessionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub iat: i64,
}

impl SessionClaims {
    fn from_session(session: &Session) -> Self {
        Self {
            id: session.id,
            kind: session.kind,
            exp: session.expires_at.map(|expires_at| expires_at.timestamp()),
            ip: session.ip.map(|ip| ip.to_string()),
            iat: session.created_at.timestamp(),
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.is_some_and(|exp| now.timestamp() >= exp)
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding: Option<EncodingKey>,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    /// Build a codec able to issue and verify tokens.
    ///
    /// # Errors
    /// Returns an error if a PEM key cannot be parsed for the configured algorithm.
    pub fn from_config(config: &SecurityConfig) -> anyhow::Result<Self> {
        let algorithm = config.algorithm();
        if is_hmac(algorithm) {
            let secret = config.secret().expose_secret().as_bytes();
            return Ok(Self::build(
                algorithm,
                Some(EncodingKey::from_secret(secret)),
                DecodingKey::from_secret(secret),
            ));
        }

        let public = config
            .public_secret()
            .ok_or_else(|| anyhow!("algorithm {algorithm:?} requires a public secret"))?;
        let encoding = encoding_key(algorithm, config.secret())?;
        let decoding = decoding_key(algorithm, public)?;
        Ok(Self::build(algorithm, Some(encoding), decoding))
    }

    /// Build a codec for services that only verify tokens issued elsewhere.
    ///
    /// # Errors
    /// Returns an error if the verification key cannot be parsed.
    pub fn verify_only(algorithm: Algorithm, public_secret: &SecretString) -> anyhow::Result<Self> {
        let decoding = if is_hmac(algorithm) {
            DecodingKey::from_secret(public_secret.expose_secret().as_bytes())
        } else {
            decoding_key(algorithm, public_secret)?
        };
        Ok(Self::build(algorithm, None, decoding))
    }

    fn build(algorithm: Algorithm, encoding: Option<EncodingKey>, decoding: DecodingKey) -> Self {
        let mut validation = Validation::new(algorithm);
        // Expiry is checked against our own optional `exp`, not the JWT default.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;
        Self {
            algorithm,
            encoding,
            decoding,
            validation,
        }
    }

    /// Sign a token referencing `session`.
    ///
    /// # Errors
    /// Returns an internal error if the codec is verify-only or signing fails.
    pub fn encode(&self, session: &Session) -> Result<String> {
        let key = self
            .encoding
            .as_ref()
            .ok_or_else(|| anyhow!("token codec is verify-only"))?;
        let claims = SessionClaims::from_session(session);
        let token = jsonwebtoken::encode(&Header::new(self.algorithm), &claims, key)
            .context("failed to sign session token")?;
        Ok(token)
    }

    /// Verify and decode a token of the expected kind.
    ///
    /// # Errors
    /// `NotFound` for an empty token, `InvalidToken` for a bad signature,
    /// malformed claims or a kind mismatch, `Expired` for elapsed claims.
    pub fn decode(&self, kind: SessionKind, token: &str) -> Result<SessionClaims> {
        self.decode_at(kind, token, Utc::now())
    }

    pub(crate) fn decode_at(
        &self,
        kind: SessionKind,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims> {
        let claims = self.decode_signed(kind, token)?;
        if claims.is_expired_at(now) {
            return Err(SecurityError::Expired.into());
        }
        Ok(claims)
    }

    /// Verify signature and kind of a token, leaving expiry to the caller.
    ///
    /// # Errors
    /// As [`TokenCodec::decode`] minus `Expired`.
    pub(crate) fn decode_signed(&self, kind: SessionKind, token: &str) -> Result<SessionClaims> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SecurityError::not_found(format!("No {kind} session provided.")).into());
        }

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|err| {
                debug!("rejected {kind} session token: {err}");
                SecurityError::invalid_token("Session token could not be decoded.")
            })?;
        let claims = data.claims;

        if claims.kind != kind {
            return Err(SecurityError::invalid_token(format!(
                "Expected a {kind} session token, got {}.",
                claims.kind
            ))
            .into());
        }
        Ok(claims)
    }
}

fn encoding_key(algorithm: Algorithm, secret: &SecretString) -> anyhow::Result<EncodingKey> {
    let pem = secret.expose_secret().as_bytes();
    let key = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => EncodingKey::from_rsa_pem(pem),
        Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => EncodingKey::from_ed_pem(pem),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Ok(EncodingKey::from_secret(pem))
        }
    };
    key.with_context(|| format!("failed to parse {algorithm:?} signing key"))
}

fn decoding_key(algorithm: Algorithm, secret: &SecretString) -> anyhow::Result<DecodingKey> {
    let pem = secret.expose_secret().as_bytes();
    let key = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Ok(DecodingKey::from_secret(pem))
        }
    };
    key.with_context(|| format!("failed to parse {algorithm:?} verification key"))
}
