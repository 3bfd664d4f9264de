//! Shared types for the OpenID relying party workspace

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
