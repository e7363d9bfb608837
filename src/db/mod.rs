//! Database module: pool setup and the work-queue repository.
//!
//! The queue protocol lives in `repo`: atomic batch claiming, done-marking
//! and book persistence. External modules should import from
//! `isbndump::db` — we re-export the repository API for convenience.

pub mod repo;

pub use repo::*;
