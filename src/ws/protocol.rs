//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

/// The five hand signs a player can throw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Figure {
    Rock,
    Paper,
    Scissors,
    Lizard,
    Spock,
}

/// A player's submission for the current round.
///
/// The `lives` field is client-reported and advisory only; the server keeps
/// its own authoritative count and never reads this value into state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMove {
    pub figure: Figure,
    pub lives: u8,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Client pressed the start/ready button
    StartEvent,

    /// Figure submission for the current round
    PlayerRoll {
        #[serde(rename = "move")]
        mv: PlayerMove,
    },

    /// Request a rematch on the same connections
    RepeatGame,

    /// Client-side report of a bad request; also synthesized at the
    /// connection edge for frames that fail to decode
    IncorrectRequest { message: String },

    /// Client-side report of a bad server message
    IncorrectResponse { message: String },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// A start action is available
    StartButton,

    /// Game (re)started; exactly one player gets `my_turn: true`
    GameStarted { my_turn: bool, lives: u8 },

    /// Round resolved, play continues
    ChangePlayer { my_turn: bool, lives: u8 },

    /// Game over; `lose` is per-recipient
    GameResult { lose: bool },

    /// Peer disconnected before the game concluded
    GameAborted,

    /// Echo of a request the server could not act on
    IncorrectRequest { message: String },
}
