//! External collaborators of the login flow.
//!
//! Each one is a trait with a production implementation and a local-dev stand-in,
//! so the flow can run without Google, a geoip service or a mailer.

pub mod geo;
pub mod google;
pub mod notify;
pub mod recaptcha;

use std::{future::Future, pin::Pin};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
