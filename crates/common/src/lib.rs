//! Common types shared by the scraper crates

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
