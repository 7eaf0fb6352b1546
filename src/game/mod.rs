//! Game session modules

pub mod rules;
pub mod session;

pub use session::{
    GameSession, PlayerHandle, Seat, SessionEvent, SessionHandle, SessionInput, SessionRegistry,
};
