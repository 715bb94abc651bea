pub mod config;
pub mod error;
pub mod types;

pub use config::DeaddropConfig;
pub use error::{DeaddropError, DeaddropResult};
pub use types::{EngineKind, LogFormat};
