//! Common types shared by the Flow gateway crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, mask};
