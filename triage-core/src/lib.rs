//! Domain model for epic-triage.
//!
//! Everything in this crate is pure: slug derivation, requirement validation,
//! rule precedence and the outcome/report types shared by the merge engine,
//! the run coordinator and the inspection API. Storage and network access
//! live in the `epic-triage` crate.

pub mod error;
pub mod models;

pub use error::TriageError;
