pub mod config;
pub mod credential;
pub mod error;
pub mod usage;

pub use error::{RelayError, Result};
