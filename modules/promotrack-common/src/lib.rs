pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, MAX_RETENTION_DAYS, MAX_RUN_TIMEOUT};
pub use error::PromoTrackError;
pub use types::*;
