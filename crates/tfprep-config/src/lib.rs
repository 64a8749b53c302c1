mod raw;
mod loader;
pub mod error;
pub mod request;

pub use error::ConfigError;
pub use loader::{load_settings, Settings, Tuning};
pub use request::RequestFields;
