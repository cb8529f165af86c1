//! # Warden (session lifecycle and challenge verification)
//!
//! `warden` issues signed session tokens backed by stored records and checks
//! them on every request.
//!
//! ## Sessions
//!
//! - **Authentication:** created by login, optionally refreshed in place,
//!   ended by logout.
//! - **Two-step:** carries a six digit code delivered out-of-band; used to
//!   verify accounts or confirm sensitive actions.
//! - **Captcha:** carries a six character code; the bearer is optional.
//!
//! Tokens reference records by id. Deactivating or deleting a record revokes
//! every token that points at it.
//!
//! ## Challenges
//!
//! Codes are stored salted and hashed, never in plaintext. Each session
//! allows a fixed number of attempts; the attempt counter and the consuming
//! deactivation are conditional store updates, so concurrent submissions can
//! neither exceed the ceiling nor consume a session twice.

pub mod cli;
pub mod security;
pub mod warden;
