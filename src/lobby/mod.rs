//! Pairing of waiting connections into duel sessions

pub mod service;

pub use service::{Lobby, SessionBinding};
