//! Real-time class duel coordinator.
//!
//! Hosts open a duel room for a class and a study set, students join over a
//! websocket, and everyone in the room receives the same shuffled
//! multiple-choice round plus a live scoreboard.

pub mod api;
pub mod auth;
pub mod config;
pub mod duel;
pub mod error;

pub use error::{DuelError, Result};
