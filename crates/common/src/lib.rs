//! Common types shared across the Etsy shop toolkit

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
