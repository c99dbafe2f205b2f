//! DMARC aggregate reports: the XML model and extraction from emails.

mod extract;
pub mod model;

pub use extract::{Packaging, extract_reports};
pub use model::{Disposition, Feedback};
