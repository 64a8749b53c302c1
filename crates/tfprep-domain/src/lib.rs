pub mod error;
pub mod types;
pub mod validate;


pub use error::{NameRule, ValidationError, ValidationErrors};
pub use types::*;
pub use validate::validate_request;
