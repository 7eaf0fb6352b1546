//! Lobby service - pairs two waiting connections into a session

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::{
    GameSession, PlayerHandle, Seat, SessionEvent, SessionInput, SessionRegistry,
};
use crate::ws::protocol::ServerMsg;

/// A connection waiting for an opponent
struct WaitingPlayer {
    id: Uuid,
    outbound: mpsc::Sender<ServerMsg>,
    binding_tx: oneshot::Sender<SessionBinding>,
}

/// Delivered to a connection once its session exists
#[derive(Debug)]
pub struct SessionBinding {
    pub session_id: Uuid,
    pub seat: Seat,
    pub input_tx: mpsc::Sender<SessionInput>,
}

/// Pairs connections as they arrive: the first waits, the second completes
/// a session. Sessions run as their own tasks and unregister themselves.
pub struct Lobby {
    waiting: Mutex<Vec<WaitingPlayer>>,
    sessions: Arc<SessionRegistry>,
}

impl Lobby {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            waiting: Mutex::new(Vec::new()),
            sessions,
        }
    }

    /// Register a connection. The returned receiver resolves once an
    /// opponent is available; it is dropped without resolving only if the
    /// lobby itself shuts down.
    pub fn register(
        &self,
        player_id: Uuid,
        outbound: mpsc::Sender<ServerMsg>,
    ) -> oneshot::Receiver<SessionBinding> {
        let (binding_tx, binding_rx) = oneshot::channel();
        let player = WaitingPlayer {
            id: player_id,
            outbound,
            binding_tx,
        };

        let peer = {
            let mut waiting = self.waiting.lock();
            match waiting.pop() {
                Some(peer) => peer,
                None => {
                    waiting.push(player);
                    return binding_rx;
                }
            }
        };

        self.start_session(peer, player);
        binding_rx
    }

    /// Remove a connection that closed while still waiting for an opponent.
    pub fn unregister(&self, player_id: Uuid) {
        let mut waiting = self.waiting.lock();
        let before = waiting.len();
        waiting.retain(|p| p.id != player_id);
        if waiting.len() < before {
            info!(player_id = %player_id, "Player left the lobby before pairing");
        }
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().len()
    }

    fn start_session(&self, a: WaitingPlayer, b: WaitingPlayer) {
        let session_id = Uuid::new_v4();

        // Coin flip for who gets the opening turn
        let (first, second) = if rand::random::<bool>() { (a, b) } else { (b, a) };

        let (session, handle) = GameSession::new(
            session_id,
            [
                PlayerHandle {
                    id: first.id,
                    outbound: first.outbound,
                },
                PlayerHandle {
                    id: second.id,
                    outbound: second.outbound,
                },
            ],
        );

        self.sessions.insert(handle.clone());

        info!(
            session_id = %session_id,
            first = %first.id,
            second = %second.id,
            "Paired players into session"
        );

        for (seat, binding_tx, player_id) in [
            (Seat::First, first.binding_tx, first.id),
            (Seat::Second, second.binding_tx, second.id),
        ] {
            let binding = SessionBinding {
                session_id,
                seat,
                input_tx: handle.input_tx.clone(),
            };
            if binding_tx.send(binding).is_err() {
                // The connection vanished between queueing and pairing;
                // let the session abort through the normal path.
                warn!(
                    session_id = %session_id,
                    player_id = %player_id,
                    "Player gone before binding delivery"
                );
                let _ = handle.input_tx.try_send(SessionInput {
                    seat,
                    event: SessionEvent::Disconnected,
                });
            }
        }

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            session.run().await;
            sessions.remove(&session_id);
            info!(session_id = %session_id, "Session removed from registry");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby() -> Lobby {
        Lobby::new(Arc::new(SessionRegistry::new()))
    }

    #[tokio::test]
    async fn two_registrations_form_one_session() {
        let lobby = lobby();
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);

        let binding_a = lobby.register(Uuid::new_v4(), tx_a);
        assert_eq!(lobby.waiting_count(), 1);

        let binding_b = lobby.register(Uuid::new_v4(), tx_b);
        assert_eq!(lobby.waiting_count(), 0);
        assert_eq!(lobby.sessions.active_sessions(), 1);

        let binding_a = binding_a.await.unwrap();
        let binding_b = binding_b.await.unwrap();
        assert_eq!(binding_a.session_id, binding_b.session_id);
        assert_ne!(binding_a.seat, binding_b.seat);

        // Both players receive the start notification from the session task.
        assert!(matches!(
            rx_a.recv().await,
            Some(ServerMsg::GameStarted { lives: 3, .. })
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(ServerMsg::GameStarted { lives: 3, .. })
        ));
    }

    #[tokio::test]
    async fn unregister_withdraws_a_waiting_player() {
        let lobby = lobby();
        let (tx, _rx) = mpsc::channel(16);
        let player_id = Uuid::new_v4();

        let _binding = lobby.register(player_id, tx);
        assert_eq!(lobby.waiting_count(), 1);

        lobby.unregister(player_id);
        assert_eq!(lobby.waiting_count(), 0);
    }
}
