//! Route handlers: the browser login flow, code redemption, OIDC and health.

pub mod health;
pub mod login;
pub mod oidc;
