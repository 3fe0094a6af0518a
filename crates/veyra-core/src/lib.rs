pub mod config;
pub mod error;
pub mod scope;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, VeyraError};
pub use types::*;
