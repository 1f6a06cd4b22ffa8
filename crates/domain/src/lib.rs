//! Shared types for the DeckWeaver crates: errors, model-gateway message
//! and stream types, the deck data model, configuration, and trace events.

pub mod config;
pub mod deck;
pub mod error;
pub mod stream;
pub mod tool;
pub mod trace;
