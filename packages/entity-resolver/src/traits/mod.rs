//! Core trait abstractions for the resolver.
//!
//! These traits define the seams where applications plug in sources, cache
//! backends and the last-resort disambiguator.

pub mod cache;
pub mod disambiguator;
pub mod source;
