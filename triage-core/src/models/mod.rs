//! Domain models for epic-triage.
//!
//! # Core Concepts
//!
//! ## Persistent Entities
//!
//! - [`ProjectSlug`]: Stable project key derived from a human title. The sole join
//!   key between unrelated runs, so derivation is deterministic.
//! - [`EpicDocument`]: The current cumulative requirements document for a project.
//!   Replaced on every merge, but its content is always a merge of history.
//! - [`RuleSet`]: Effective generation rules, resolved attachment → stored → base.
//! - [`LedgerEntry`]: Append-only record of which requirement messages were folded
//!   into a project's epic.
//!
//! ## Per-run Values
//!
//! - [`Requirement`]: One parsed inbound requirement. Immutable once parsed.
//! - [`MergeOutcome`]: What happened to one requirement, tagged with the failing stage.
//! - [`RunReport`]: Everything a scheduled run did, persisted to the run journal.

mod epic;
mod ledger;
mod outcome;
mod project;
mod report;
mod requirement;
mod rules;

pub use epic::*;
pub use ledger::*;
pub use outcome::*;
pub use project::*;
pub use report::*;
pub use requirement::*;
pub use rules::*;
