//! Credential verification and session issuance.

pub mod email;
mod issuer;
pub mod store;
mod verifier;

pub use email::BlockedDomains;
pub use issuer::{IssuedSession, LoginContext, TfaSettings};
pub use verifier::CredentialVerifier;
