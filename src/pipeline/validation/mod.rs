pub mod checks;
pub mod report;
pub mod similarity;

pub use checks::{CrossDocumentValidator, ValidationSettings};
pub use report::{TypeSummary, ValidationReport};
