// herringbone/src/lib.rs
//!
//! Herringbone: a security event pipeline.
//!
//! Raw log events flow through declarative parsing, optional enrichment and
//! regex rule matching; matched events become immutable detections, which a
//! windowed correlator groups into incidents for analyst triage.

pub mod error;
#[macro_use]
pub mod logging;
pub mod pipeline;

pub use error::{HerringboneError, Result};
