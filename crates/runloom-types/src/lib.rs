//! Shared domain types for Runloom.
//!
//! This crate holds the data model the engine and its storage backends agree
//! on: run and step records, the declarative graph IR, retry configuration,
//! the function catalog used for version stamping, and the error taxonomy.
//! It depends only on serde-family crates -- never on the engine or any
//! IO crate.

pub mod error;
pub mod graph;
pub mod retry;
pub mod run;
pub mod target;
