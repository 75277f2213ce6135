//! Last-resort disambiguators.

pub mod chat;

pub use chat::ChatDisambiguator;
