pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod engine;
pub mod intake;
pub mod ledger;
pub mod store;
pub mod synthesis;

pub use triage_core::{error, models};
