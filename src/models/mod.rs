pub mod enums;
pub mod requirement;
pub mod document;
pub mod evidence;
pub mod finding;

pub use enums::*;
pub use requirement::*;
pub use document::*;
pub use evidence::*;
pub use finding::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Invalid requirement {id}: {reason}")]
    InvalidRequirement { id: String, reason: String },
}
