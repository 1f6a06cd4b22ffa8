//! DeckWeaver gateway: the deck co-authoring runtime, its HTTP API and CLI.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;
