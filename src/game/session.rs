//! Duel session state machine and the actor task that owns it

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, Figure, ServerMsg};

use super::rules;

/// Lives each player starts a game with
pub const STARTING_LIVES: u8 = 3;

/// One of the two fixed player slots in a session.
///
/// Seats are assigned at pairing time and stable for the session lifetime;
/// `First` is the player marked with the opening turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    First,
    Second,
}

impl Seat {
    pub const BOTH: [Seat; 2] = [Seat::First, Seat::Second];

    pub fn other(self) -> Seat {
        match self {
            Seat::First => Seat::Second,
            Seat::Second => Seat::First,
        }
    }

    fn index(self) -> usize {
        match self {
            Seat::First => 0,
            Seat::Second => 1,
        }
    }
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, start notifications not yet sent
    AwaitingStart,
    /// Collecting pending moves for the current round
    AwaitingMoves,
    /// Both moves present, round being resolved
    Resolving,
    /// Result sent or session aborted; only a restart revives play
    Finished,
}

/// The session state machine, pure of any transport concern.
///
/// All game state lives here: the phase, both players' lives and
/// pending moves. Every inbound message goes through [`SessionState::handle`],
/// which returns the replies to deliver; the caller decides how they reach
/// the wire. Exactly one round resolution can happen per `handle` call, which
/// makes the no-double-resolution invariant hold by construction.
#[derive(Debug)]
pub struct SessionState {
    phase: Phase,
    lives: [u8; 2],
    moves: [Option<Figure>; 2],
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingStart,
            lives: [STARTING_LIVES; 2],
            moves: [None, None],
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn lives(&self, seat: Seat) -> u8 {
        self.lives[seat.index()]
    }

    /// Enter a fresh game: reset lives and moves, notify both players.
    /// Used both for the initial start and for `repeatGame` restarts.
    pub fn begin(&mut self) -> Vec<(Seat, ServerMsg)> {
        self.lives = [STARTING_LIVES; 2];
        self.moves = [None, None];
        self.phase = Phase::AwaitingMoves;

        Seat::BOTH
            .into_iter()
            .map(|seat| {
                (
                    seat,
                    ServerMsg::GameStarted {
                        my_turn: seat == Seat::First,
                        lives: STARTING_LIVES,
                    },
                )
            })
            .collect()
    }

    /// Mark the session finished without a result (forced termination path).
    pub fn finish(&mut self) {
        self.phase = Phase::Finished;
        self.moves = [None, None];
    }

    /// The single transition function: apply one client message from `seat`
    /// and return the replies it produced.
    pub fn handle(&mut self, seat: Seat, msg: ClientMsg) -> Vec<(Seat, ServerMsg)> {
        match msg {
            ClientMsg::StartEvent => Seat::BOTH
                .into_iter()
                .map(|s| (s, ServerMsg::StartButton))
                .collect(),

            ClientMsg::RepeatGame => self.begin(),

            // `mv.lives` is deliberately ignored: server lives are authoritative
            ClientMsg::PlayerRoll { mv } => self.handle_roll(seat, mv.figure),

            ClientMsg::IncorrectRequest { message } => {
                vec![(seat, ServerMsg::IncorrectRequest { message })]
            }

            ClientMsg::IncorrectResponse { message } => {
                error!(seat = ?seat, message = %message, "Client reported incorrect response");
                Vec::new()
            }
        }
    }

    fn handle_roll(&mut self, seat: Seat, figure: Figure) -> Vec<(Seat, ServerMsg)> {
        // A move outside the collecting phase (game over, not yet started)
        // is a silent no-op.
        if self.phase != Phase::AwaitingMoves {
            return Vec::new();
        }

        self.moves[seat.index()] = Some(figure);

        match (self.moves[0], self.moves[1]) {
            (Some(first), Some(second)) => self.resolve_round(first, second),
            _ => Vec::new(),
        }
    }

    /// Both pending moves are present: resolve the round and commit.
    fn resolve_round(&mut self, first: Figure, second: Figure) -> Vec<(Seat, ServerMsg)> {
        self.phase = Phase::Resolving;
        self.moves = [None, None];

        let first_survives = rules::resolve(first, second);
        let second_survives = rules::resolve(second, first);

        if first_survives && second_survives {
            // Tie: nobody is damaged, the round is a no-op and both players
            // must submit fresh moves.
            self.phase = Phase::AwaitingMoves;
            return Vec::new();
        }

        // The beat matrix admits no mutual loss, so exactly one side lost.
        let loser = if first_survives {
            Seat::Second
        } else {
            Seat::First
        };
        let winner = loser.other();
        self.lives[loser.index()] = self.lives[loser.index()].saturating_sub(1);

        if self.lives[loser.index()] == 0 {
            self.phase = Phase::Finished;
            return Seat::BOTH
                .into_iter()
                .map(|seat| {
                    (
                        seat,
                        ServerMsg::GameResult {
                            lose: self.lives[seat.index()] == 0,
                        },
                    )
                })
                .collect();
        }

        self.phase = Phase::AwaitingMoves;
        // The damaged player is marked to move next.
        vec![
            (
                winner,
                ServerMsg::ChangePlayer {
                    my_turn: false,
                    lives: self.lives[winner.index()],
                },
            ),
            (
                loser,
                ServerMsg::ChangePlayer {
                    my_turn: true,
                    lives: self.lives[loser.index()],
                },
            ),
        ]
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// What a connection feeds into the session
#[derive(Debug)]
pub enum SessionEvent {
    /// A decoded (or synthesized) client message
    Message(ClientMsg),
    /// The connection closed or errored
    Disconnected,
}

/// Input delivered to a session's actor task
#[derive(Debug)]
pub struct SessionInput {
    pub seat: Seat,
    pub event: SessionEvent,
}

/// One player's send side, as held by the session
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    pub id: Uuid,
    pub outbound: mpsc::Sender<ServerMsg>,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<SessionInput>,
}

/// The actor that owns a [`SessionState`] and both player handles.
///
/// All mutations run on this task, serialized by the input channel, so the
/// record-move/resolve/commit/emit sequence is atomic with respect to
/// concurrent arrivals from both connections.
pub struct GameSession {
    id: Uuid,
    state: SessionState,
    input_rx: mpsc::Receiver<SessionInput>,
    players: [PlayerHandle; 2],
}

impl GameSession {
    pub fn new(id: Uuid, players: [PlayerHandle; 2]) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(64);

        let handle = SessionHandle { id, input_tx };
        let session = Self {
            id,
            state: SessionState::new(),
            input_rx,
            players,
        };

        (session, handle)
    }

    /// Run the session until a player disconnects or both input senders drop.
    /// Dropping `self` afterwards closes the outbound channels, which tells
    /// the connection tasks to close their sockets.
    pub async fn run(mut self) {
        info!(
            session_id = %self.id,
            first = %self.players[0].id,
            second = %self.players[1].id,
            "Session started"
        );

        let replies = self.state.begin();
        self.dispatch(replies);

        while let Some(input) = self.input_rx.recv().await {
            match input.event {
                SessionEvent::Message(msg) => {
                    let replies = self.state.handle(input.seat, msg);
                    self.dispatch(replies);
                }
                SessionEvent::Disconnected => {
                    self.abort(input.seat);
                    break;
                }
            }
        }

        info!(session_id = %self.id, "Session ended");
    }

    fn dispatch(&self, replies: Vec<(Seat, ServerMsg)>) {
        for (seat, msg) in replies {
            self.send(seat, msg);
        }
    }

    /// Hand a message to the player's writer without ever waiting on it.
    /// A full or closed channel means a slow or vanished peer; the message
    /// is dropped so the actor keeps draining inputs, and a stale client
    /// view is accepted for these short-lived sessions.
    fn send(&self, seat: Seat, msg: ServerMsg) {
        let player = &self.players[seat.index()];
        if let Err(e) = player.outbound.try_send(msg) {
            warn!(
                session_id = %self.id,
                player_id = %player.id,
                error = %e,
                "Dropping outbound message"
            );
        }
    }

    /// Forced termination: `gone` dropped before the game concluded.
    /// Running inside the actor loop, which exits right after, makes a
    /// second trigger impossible.
    fn abort(&mut self, gone: Seat) {
        if self.state.phase() != Phase::Finished {
            self.state.finish();
            self.send(gone.other(), ServerMsg::GameAborted);
        }
        info!(
            session_id = %self.id,
            player_id = %self.players[gone.index()].id,
            "Player disconnected, session torn down"
        );
    }
}

/// Registry of all running sessions (health reporting)
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::PlayerMove;

    fn roll(figure: Figure) -> ClientMsg {
        ClientMsg::PlayerRoll {
            mv: PlayerMove { figure, lives: 3 },
        }
    }

    fn roll_claiming(figure: Figure, lives: u8) -> ClientMsg {
        ClientMsg::PlayerRoll {
            mv: PlayerMove { figure, lives },
        }
    }

    fn started_state() -> SessionState {
        let mut state = SessionState::new();
        state.begin();
        state
    }

    #[test]
    fn begin_marks_exactly_one_first_turn() {
        let mut state = SessionState::new();
        let replies = state.begin();
        assert_eq!(state.phase(), Phase::AwaitingMoves);
        assert_eq!(
            replies,
            vec![
                (
                    Seat::First,
                    ServerMsg::GameStarted {
                        my_turn: true,
                        lives: 3
                    }
                ),
                (
                    Seat::Second,
                    ServerMsg::GameStarted {
                        my_turn: false,
                        lives: 3
                    }
                ),
            ]
        );
    }

    #[test]
    fn first_move_produces_no_replies() {
        let mut state = started_state();
        let replies = state.handle(Seat::First, roll(Figure::Rock));
        assert!(replies.is_empty());
        assert_eq!(state.phase(), Phase::AwaitingMoves);
    }

    #[test]
    fn rock_beats_scissors_and_flags_follow_the_loser() {
        let mut state = started_state();
        assert!(state.handle(Seat::First, roll(Figure::Rock)).is_empty());
        let replies = state.handle(Seat::Second, roll(Figure::Scissors));

        assert_eq!(state.lives(Seat::First), 3);
        assert_eq!(state.lives(Seat::Second), 2);
        assert_eq!(replies.len(), 2);
        assert!(replies.contains(&(
            Seat::First,
            ServerMsg::ChangePlayer {
                my_turn: false,
                lives: 3
            }
        )));
        assert!(replies.contains(&(
            Seat::Second,
            ServerMsg::ChangePlayer {
                my_turn: true,
                lives: 2
            }
        )));
    }

    #[test]
    fn round_commits_once_and_clears_pending_moves() {
        let mut state = started_state();
        state.handle(Seat::First, roll(Figure::Rock));
        state.handle(Seat::Second, roll(Figure::Scissors));

        // A lone follow-up move must not resolve against a stale figure.
        let replies = state.handle(Seat::Second, roll(Figure::Paper));
        assert!(replies.is_empty());
        assert_eq!(state.lives(Seat::First), 3);
        assert_eq!(state.lives(Seat::Second), 2);
    }

    #[test]
    fn tie_damages_nobody_and_requires_fresh_moves() {
        let mut state = started_state();
        state.handle(Seat::First, roll(Figure::Spock));
        let replies = state.handle(Seat::Second, roll(Figure::Spock));

        assert!(replies.is_empty());
        assert_eq!(state.lives(Seat::First), 3);
        assert_eq!(state.lives(Seat::Second), 3);

        // The tie cleared both moves: one new move alone does not resolve.
        assert!(state.handle(Seat::First, roll(Figure::Rock)).is_empty());
        let replies = state.handle(Seat::Second, roll(Figure::Paper));
        assert_eq!(state.lives(Seat::First), 2);
        assert_eq!(replies.len(), 2);
    }

    #[test]
    fn third_loss_finishes_the_game() {
        let mut state = started_state();
        for _ in 0..2 {
            state.handle(Seat::First, roll(Figure::Rock));
            state.handle(Seat::Second, roll(Figure::Scissors));
        }
        assert_eq!(state.lives(Seat::Second), 1);

        state.handle(Seat::First, roll(Figure::Rock));
        let replies = state.handle(Seat::Second, roll(Figure::Scissors));

        assert_eq!(state.phase(), Phase::Finished);
        assert_eq!(state.lives(Seat::Second), 0);
        assert!(replies.contains(&(Seat::First, ServerMsg::GameResult { lose: false })));
        assert!(replies.contains(&(Seat::Second, ServerMsg::GameResult { lose: true })));
    }

    #[test]
    fn moves_after_finish_are_silent_noops() {
        let mut state = started_state();
        for _ in 0..3 {
            state.handle(Seat::First, roll(Figure::Rock));
            state.handle(Seat::Second, roll(Figure::Scissors));
        }
        assert_eq!(state.phase(), Phase::Finished);

        let replies = state.handle(Seat::Second, roll(Figure::Paper));
        assert!(replies.is_empty());
        assert_eq!(state.lives(Seat::Second), 0);
        assert_eq!(state.phase(), Phase::Finished);
    }

    #[test]
    fn lives_never_go_negative() {
        let mut state = started_state();
        // Two extra losing rounds past the finish must not push lives below 0.
        for _ in 0..5 {
            state.handle(Seat::First, roll(Figure::Paper));
            state.handle(Seat::Second, roll(Figure::Rock));
        }
        assert_eq!(state.lives(Seat::Second), 0);
        assert_eq!(state.lives(Seat::First), 3);
        assert_eq!(state.phase(), Phase::Finished);
    }

    #[test]
    fn client_reported_lives_are_ignored() {
        let mut state = started_state();
        state.handle(Seat::First, roll_claiming(Figure::Rock, 99));
        state.handle(Seat::Second, roll_claiming(Figure::Scissors, 0));

        // Lives follow only the server's own accounting.
        assert_eq!(state.lives(Seat::First), 3);
        assert_eq!(state.lives(Seat::Second), 2);
        assert_eq!(state.phase(), Phase::AwaitingMoves);
    }

    #[test]
    fn repeat_game_resets_from_finished() {
        let mut state = started_state();
        for _ in 0..3 {
            state.handle(Seat::First, roll(Figure::Lizard));
            state.handle(Seat::Second, roll(Figure::Rock));
        }
        assert_eq!(state.phase(), Phase::Finished);
        assert_eq!(state.lives(Seat::First), 0);

        let replies = state.handle(Seat::Second, ClientMsg::RepeatGame);
        assert_eq!(state.phase(), Phase::AwaitingMoves);
        assert_eq!(state.lives(Seat::First), 3);
        assert_eq!(state.lives(Seat::Second), 3);
        assert!(replies.contains(&(
            Seat::First,
            ServerMsg::GameStarted {
                my_turn: true,
                lives: 3
            }
        )));
    }

    #[test]
    fn repeat_game_discards_a_pending_move() {
        let mut state = started_state();
        state.handle(Seat::First, roll(Figure::Rock));
        state.handle(Seat::Second, ClientMsg::RepeatGame);

        // The pre-restart move must not count towards the new game's round.
        let replies = state.handle(Seat::Second, roll(Figure::Scissors));
        assert!(replies.is_empty());
        assert_eq!(state.lives(Seat::Second), 3);
    }

    #[test]
    fn start_event_reaches_both_players() {
        let mut state = started_state();
        let replies = state.handle(Seat::First, ClientMsg::StartEvent);
        assert_eq!(
            replies,
            vec![
                (Seat::First, ServerMsg::StartButton),
                (Seat::Second, ServerMsg::StartButton),
            ]
        );
    }

    #[test]
    fn incorrect_request_is_echoed_to_sender_only() {
        let mut state = started_state();
        state.handle(Seat::First, roll(Figure::Rock));
        let replies = state.handle(
            Seat::Second,
            ClientMsg::IncorrectRequest {
                message: "Unknown message type".to_string(),
            },
        );

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, Seat::Second);
        assert!(matches!(replies[0].1, ServerMsg::IncorrectRequest { .. }));
        // No state mutation
        assert_eq!(state.lives(Seat::First), 3);
        assert_eq!(state.lives(Seat::Second), 3);
        assert_eq!(state.phase(), Phase::AwaitingMoves);
    }

    mod actor {
        use super::*;
        use tokio::sync::mpsc;

        async fn spawn_session() -> (
            SessionHandle,
            mpsc::Receiver<ServerMsg>,
            mpsc::Receiver<ServerMsg>,
        ) {
            let (tx_a, mut rx_a) = mpsc::channel(16);
            let (tx_b, mut rx_b) = mpsc::channel(16);
            let (session, handle) = GameSession::new(
                Uuid::new_v4(),
                [
                    PlayerHandle {
                        id: Uuid::new_v4(),
                        outbound: tx_a,
                    },
                    PlayerHandle {
                        id: Uuid::new_v4(),
                        outbound: tx_b,
                    },
                ],
            );
            tokio::spawn(session.run());

            // Consume the start notifications
            assert!(matches!(
                rx_a.recv().await,
                Some(ServerMsg::GameStarted { my_turn: true, .. })
            ));
            assert!(matches!(
                rx_b.recv().await,
                Some(ServerMsg::GameStarted { my_turn: false, .. })
            ));

            (handle, rx_a, rx_b)
        }

        async fn send_roll(handle: &SessionHandle, seat: Seat, figure: Figure) {
            handle
                .input_tx
                .send(SessionInput {
                    seat,
                    event: SessionEvent::Message(roll(figure)),
                })
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn concurrent_moves_resolve_exactly_one_round() {
            let (handle, mut rx_a, mut rx_b) = spawn_session().await;

            send_roll(&handle, Seat::First, Figure::Rock).await;
            send_roll(&handle, Seat::Second, Figure::Scissors).await;

            assert_eq!(
                rx_a.recv().await,
                Some(ServerMsg::ChangePlayer {
                    my_turn: false,
                    lives: 3
                })
            );
            assert_eq!(
                rx_b.recv().await,
                Some(ServerMsg::ChangePlayer {
                    my_turn: true,
                    lives: 2
                })
            );
        }

        #[tokio::test]
        async fn disconnect_aborts_the_peer_once() {
            let (handle, mut rx_a, _rx_b) = spawn_session().await;

            handle
                .input_tx
                .send(SessionInput {
                    seat: Seat::Second,
                    event: SessionEvent::Disconnected,
                })
                .await
                .unwrap();
            // A second trigger is at worst a send into a closed channel.
            let _ = handle
                .input_tx
                .send(SessionInput {
                    seat: Seat::Second,
                    event: SessionEvent::Disconnected,
                })
                .await;

            assert_eq!(rx_a.recv().await, Some(ServerMsg::GameAborted));
            // The session dropped its senders: exactly one abort, then closed.
            assert_eq!(rx_a.recv().await, None);
        }

        #[tokio::test]
        async fn full_outbound_channel_does_not_stall_the_actor() {
            // Second's writer never drains its channel (capacity 1), as with
            // a client that keeps sending but stops reading its socket.
            let (tx_a, mut rx_a) = mpsc::channel(16);
            let (tx_b, _rx_b) = mpsc::channel(1);
            let (session, handle) = GameSession::new(
                Uuid::new_v4(),
                [
                    PlayerHandle {
                        id: Uuid::new_v4(),
                        outbound: tx_a,
                    },
                    PlayerHandle {
                        id: Uuid::new_v4(),
                        outbound: tx_b,
                    },
                ],
            );
            tokio::spawn(session.run());

            assert!(matches!(
                rx_a.recv().await,
                Some(ServerMsg::GameStarted { my_turn: true, .. })
            ));

            // A resolved round pushes into Second's already-full channel.
            send_roll(&handle, Seat::First, Figure::Rock).await;
            send_roll(&handle, Seat::Second, Figure::Scissors).await;
            assert!(matches!(
                rx_a.recv().await,
                Some(ServerMsg::ChangePlayer { .. })
            ));

            // The actor must still process First's disconnect and tear down,
            // which closes First's channel.
            handle
                .input_tx
                .send(SessionInput {
                    seat: Seat::First,
                    event: SessionEvent::Disconnected,
                })
                .await
                .unwrap();

            tokio::time::timeout(std::time::Duration::from_secs(1), async {
                while rx_a.recv().await.is_some() {}
            })
            .await
            .expect("session actor stalled on a full outbound channel");
        }

        #[tokio::test]
        async fn disconnect_after_result_sends_no_abort() {
            let (handle, mut rx_a, mut rx_b) = spawn_session().await;

            for _ in 0..3 {
                send_roll(&handle, Seat::First, Figure::Spock).await;
                send_roll(&handle, Seat::Second, Figure::Lizard).await;
                // First loses each round: spock loses to lizard
                let _ = rx_a.recv().await.unwrap();
                let _ = rx_b.recv().await.unwrap();
            }

            handle
                .input_tx
                .send(SessionInput {
                    seat: Seat::First,
                    event: SessionEvent::Disconnected,
                })
                .await
                .unwrap();

            // Game already finished: the peer's channel closes with no abort.
            assert_eq!(rx_b.recv().await, None);
        }
    }
}
