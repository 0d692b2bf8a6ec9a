pub mod backoff;
pub mod config;
pub mod error;
pub mod ids;
pub mod types;
pub mod urlnorm;

pub use error::{ErrorKind, Result, TheodoreError};
pub use ids::*;
