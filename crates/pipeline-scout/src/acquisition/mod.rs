//! Two-tier content acquisition.
//!
//! Tier 1 is a plain HTTP GET whose visible text is judged for
//! sufficiency. Thin or failed responses escalate once to Tier 2, which
//! renders the page in an isolated browser context.

pub mod cascade;
pub mod error;
pub mod html_text;
pub mod http_client;
pub mod rendered;

pub use cascade::{AcquisitionCascade, AcquisitionResult, Acquirer};
pub use error::{AcquisitionError, AcquisitionErrorKind, AcquisitionMethod};
pub use http_client::{HttpClient, LightweightOutcome};
