//! Data model for queries, candidates, entities and outcomes.

pub mod candidate;
pub mod config;
pub mod entity;
pub mod outcome;
pub mod query;
