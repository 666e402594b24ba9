//! Engram Policy - the capability gateway
//!
//! Sessions carry a random bearer token (stored only as a SHA-256 hash) and
//! clamp confidentiality scopes, capabilities, and namespaces against the
//! agent's policy. Retrieval results outside a session's reach are masked,
//! never dropped silently; writes are throttled by configurable quota
//! windows.

mod gateway;
mod masking;
mod scope;
mod token;

pub use gateway::{PolicyGateway, SessionGrant, SessionRequest};
pub use masking::{mask_item, MaskedItem, REDACTED};
pub use scope::detect_confidentiality_scope;
pub use token::{hash_token, mint_token};
