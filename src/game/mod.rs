//! Per-session game orchestrator.
//!
//! One long-lived task per game owns all mutation of its board, history and
//! clock. Each turn either awaits a human rendezvous or drives LLM attempts
//! under the retry budget, then debits the clock, commits the move and runs
//! the terminal checks, emitting the typed event stream along the way.

pub mod clock;
pub mod prompt;

pub use prompt::PromptSchema;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chess::{Board, MoveHistory, MoveRecord};
use crate::error::ArenaError;
use crate::llm::{ChatBackend, ChunkKind};
use crate::types::events::{
    ArenaEvent, BoardPayload, BoardRows, CapturedPieces, ChatPayload, ErrorPayload,
    GameOverPayload, LastMove, ModelLabels, MovePayload, StatePayload, ThinkingPayload,
};
use crate::types::{Color, Square};

use clock::ClockState;

/// Milliseconds credited back to the mover after a network-class LLM failure.
const NETWORK_REFUND_MS: i64 = 120_000;

/// Hard ply cap: games this long are declared drawn.
const MAX_PLIES: usize = 300;

/// Receiver for every event a game emits, bound to the session token by the
/// registry.
pub type EventSink = Arc<dyn Fn(ArenaEvent) + Send + Sync>;

/// What the human-move endpoint hands to the waiting turn loop.
#[derive(Debug)]
pub enum HumanSignal {
    /// A validated SAN string.
    Move(String),
    /// Abort sentinel: the loop exits.
    Abort,
}

/// Settings a game is created with.
pub struct GameSettings {
    /// White's chat backend; `None` when White is human.
    pub white: Option<Arc<dyn ChatBackend>>,
    /// Black's chat backend; `None` when Black is human.
    pub black: Option<Arc<dyn ChatBackend>>,
    /// Which side a human controls, if any.
    pub human_side: Option<Color>,
    /// LLM attempts per turn before forfeiting.
    pub max_retries: u32,
    /// Base time per side in milliseconds; `None` for an untimed game.
    pub base_time_ms: Option<i64>,
    /// Increment per move in milliseconds.
    pub increment_ms: i64,
    /// Prompt schema for LLM sides.
    pub prompt_schema: PromptSchema,
}

/// Board, history and derived per-move display state. Guarded by one mutex,
/// never held across an await.
struct BoardState {
    board: Board,
    history: MoveHistory,
    turn: Color,
    last_move: Option<(Square, Square)>,
}

enum LlmOutcome {
    Move(MoveRecord, Option<String>),
    Forfeit,
    Aborted,
}

enum HumanOutcome {
    Move(MoveRecord),
    Aborted,
}

/// A running (or finished) game. Created by the start handler, owned by the
/// session registry, driven by its own background task.
pub struct Game {
    white: Option<Arc<dyn ChatBackend>>,
    black: Option<Arc<dyn ChatBackend>>,
    human_side: Option<Color>,
    max_retries: u32,
    prompt_schema: PromptSchema,
    state: Mutex<BoardState>,
    clock: Mutex<ClockState>,
    result: Mutex<Option<String>>,
    aborted: AtomicBool,
    pending_human: Mutex<Option<oneshot::Sender<HumanSignal>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    sink: EventSink,
    cancel: CancellationToken,
}

impl Game {
    /// Build a game; call [`Game::start`] to run it.
    #[must_use]
    pub fn new(settings: GameSettings, sink: EventSink) -> Arc<Self> {
        let clock = match settings.base_time_ms {
            Some(base_ms) if base_ms > 0 => ClockState::bounded(base_ms, settings.increment_ms),
            _ => ClockState::unlimited(),
        };
        Arc::new(Self {
            white: settings.white,
            black: settings.black,
            human_side: settings.human_side,
            max_retries: settings.max_retries.max(1),
            prompt_schema: settings.prompt_schema,
            state: Mutex::new(BoardState {
                board: Board::new(),
                history: MoveHistory::new(),
                turn: Color::White,
                last_move: None,
            }),
            clock: Mutex::new(clock),
            result: Mutex::new(None),
            aborted: AtomicBool::new(false),
            pending_human: Mutex::new(None),
            finished_at: Mutex::new(None),
            sink,
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the turn loop and, for bounded games, the one-second clock
    /// ticker.
    pub fn start(self: &Arc<Self>) {
        let game = Arc::clone(self);
        tokio::spawn(async move { game.run().await });
        if !self.clock.lock().unlimited {
            let game = Arc::clone(self);
            tokio::spawn(async move { game.clock_tick_loop().await });
        }
    }

    /// Run the turn loop to completion. Emits `gameOver` as its final event.
    pub async fn run(self: Arc<Self>) {
        self.emit(ArenaEvent::status(format!(
            "Game started: {} vs {}",
            self.model_label(Color::White),
            self.model_label(Color::Black)
        )));
        self.emit_board();
        self.emit_clock();

        let outcome = self.run_loop().await;
        {
            let mut result = self.result.lock();
            if result.is_none() {
                *result = Some(outcome);
            }
        }
        let result = self.result.lock().clone().unwrap_or_default();
        let pgn = self.state.lock().history.pgn();
        *self.finished_at.lock() = Some(Utc::now());
        self.cancel.cancel();
        info!(%result, "game over");
        self.emit(ArenaEvent::GameOver(GameOverPayload { result, pgn }));
    }

    async fn run_loop(&self) -> String {
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                return self.result_or("Game stopped by user");
            }
            if let Some(result) = self.result.lock().clone() {
                return result;
            }

            let turn = self.state.lock().turn;
            self.emit(ArenaEvent::status(format!("{}'s turn", turn.name())));
            self.clock.lock().start_turn(Instant::now());

            // Acquire a move from the human rendezvous or the LLM.
            let (record, dialogue) = if self.human_side == Some(turn) {
                match self.await_human_move(turn).await {
                    HumanOutcome::Move(record) => (record, None),
                    HumanOutcome::Aborted => return self.result_or("Game stopped by user"),
                }
            } else {
                match self.acquire_llm_move(turn).await {
                    LlmOutcome::Move(record, dialogue) => (record, dialogue),
                    LlmOutcome::Aborted => return self.result_or("Game stopped by user"),
                    LlmOutcome::Forfeit => {
                        return format!(
                            "{} wins by forfeit ({} failed to make a legal move)",
                            turn.opposite().name(),
                            turn.name()
                        );
                    }
                }
            };

            // Debit the clock; a non-positive remainder is a loss on time.
            let flagged = {
                let mut clock = self.clock.lock();
                if clock.unlimited {
                    None
                } else {
                    Some(clock.debit(turn, Instant::now()) <= 0)
                }
            };
            if flagged.is_some() {
                self.emit_clock();
            }
            if flagged == Some(true) {
                return format!("{} wins on time", turn.opposite().name());
            }

            // Commit: append history, flip the side to move, report.
            let (move_number, board_payload) = {
                let mut state = self.state.lock();
                let move_number = state.history.next_move_number();
                state.history.push(record.notation.clone());
                state.last_move = Some((record.from, record.to));
                state.turn = turn.opposite();
                (move_number, board_payload_of(&state))
            };
            self.emit(ArenaEvent::Move(MovePayload {
                color: turn,
                model: self.model_label(turn),
                notation: record.notation.clone(),
                from: record.from.to_string(),
                to: record.to.to_string(),
                move_number,
                dialogue,
            }));
            self.emit(ArenaEvent::Board(board_payload));

            // Terminal checks, in order: mate, stalemate, fifty-move, the
            // check notice, then the ply cap.
            let opponent = turn.opposite();
            let (over, check_notice, too_long) = {
                let state = self.state.lock();
                let over = if state.board.is_checkmate(opponent) {
                    Some(format!("{} wins by checkmate!", turn.name()))
                } else if state.board.is_stalemate(opponent) {
                    Some("Draw by stalemate".to_string())
                } else if state.board.is_fifty_move_draw() {
                    Some("Draw by 50-move rule".to_string())
                } else {
                    None
                };
                let check_notice = over.is_none() && state.board.is_in_check(opponent);
                let too_long = over.is_none() && state.history.len() >= MAX_PLIES;
                (over, check_notice, too_long)
            };
            if let Some(result) = over {
                return result;
            }
            if check_notice {
                self.emit(ArenaEvent::status(format!(
                    "{} is in check!",
                    opponent.name()
                )));
            }
            if too_long {
                return "Draw by excessive length (150+ moves)".to_string();
            }
        }
    }

    async fn acquire_llm_move(&self, turn: Color) -> LlmOutcome {
        let backend = match turn {
            Color::White => self.white.clone(),
            Color::Black => self.black.clone(),
        }
        .expect("LLM side has a backend");
        let model = backend.model().to_string();
        let system = prompt::system_prompt(self.prompt_schema, turn);
        let base_user = prompt::user_message(&self.state.lock().history.pgn());
        let mut last_illegal: Option<String> = None;

        for attempt in 1..=self.max_retries {
            if self.aborted.load(Ordering::SeqCst) {
                return LlmOutcome::Aborted;
            }
            let user = match &last_illegal {
                Some(bad) => prompt::retry_user_message(&base_user, bad),
                None => base_user.clone(),
            };

            let mut thinking_acc = String::new();
            let chat_result = {
                let sink = &self.sink;
                let model = model.clone();
                let mut chunk_sink = |kind: ChunkKind, text: &str| {
                    if kind == ChunkKind::Thinking {
                        thinking_acc.push_str(text);
                        sink(ArenaEvent::Thinking(ThinkingPayload {
                            color: turn,
                            model: model.clone(),
                            text: text.to_string(),
                            accumulated: thinking_acc.clone(),
                        }));
                    }
                };
                backend.chat(&system, &user, &mut chunk_sink).await
            };

            match chat_result {
                Ok(raw) => {
                    let parsed = prompt::parse_response(&raw);
                    let move_number = self.state.lock().history.next_move_number();
                    self.emit(ArenaEvent::Chat(ChatPayload {
                        color: turn,
                        model: model.clone(),
                        raw,
                        parsed_move: parsed.san.clone(),
                        dialogue: parsed.dialogue.clone(),
                        thinking: (!thinking_acc.is_empty()).then(|| thinking_acc.clone()),
                        attempt,
                        move_number,
                    }));

                    let applied = self.state.lock().board.apply_san(&parsed.san, turn);
                    match applied {
                        Ok(record) => return LlmOutcome::Move(record, parsed.dialogue),
                        Err(error) => {
                            debug!(san = %parsed.san, %error, attempt, "illegal move from model");
                            last_illegal = Some(parsed.san);
                            self.emit(ArenaEvent::Error(ErrorPayload {
                                color: turn,
                                model: model.clone(),
                                message: error.to_string(),
                                attempt,
                                max_retries: self.max_retries,
                            }));
                        }
                    }
                }
                Err(error) => {
                    let network = error.is_network_class();
                    self.emit(ArenaEvent::Error(ErrorPayload {
                        color: turn,
                        model: model.clone(),
                        message: error.to_string(),
                        attempt,
                        max_retries: self.max_retries,
                    }));
                    if network {
                        let refunded = {
                            let mut clock = self.clock.lock();
                            if clock.unlimited {
                                false
                            } else {
                                clock.refund(turn, NETWORK_REFUND_MS);
                                true
                            }
                        };
                        if refunded {
                            self.emit_clock();
                            self.emit(ArenaEvent::status(format!(
                                "Network trouble reaching {}'s model; 120 seconds credited back",
                                turn.name()
                            )));
                        }
                    }
                }
            }
        }
        LlmOutcome::Forfeit
    }

    async fn await_human_move(&self, turn: Color) -> HumanOutcome {
        loop {
            let (tx, rx) = oneshot::channel();
            *self.pending_human.lock() = Some(tx);
            let signal = tokio::select! {
                _ = self.cancel.cancelled() => HumanSignal::Abort,
                signal = rx => signal.unwrap_or(HumanSignal::Abort),
            };
            match signal {
                HumanSignal::Abort => return HumanOutcome::Aborted,
                HumanSignal::Move(san) => {
                    let applied = self.state.lock().board.apply_san(&san, turn);
                    match applied {
                        Ok(record) => return HumanOutcome::Move(record),
                        // Validated at submission; if the position changed
                        // underneath us just wait for the next attempt.
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    async fn clock_tick_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.is_terminal() {
                        break;
                    }
                    let turn = self.state.lock().turn;
                    let payload = self.clock.lock().live_payload(turn, Instant::now());
                    self.emit(ArenaEvent::Clock(payload));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // External surface, called from HTTP handlers
    // ------------------------------------------------------------------

    /// Validate and hand a human SAN to the waiting turn loop.
    pub fn submit_human_move(&self, san: &str) -> Result<(), ArenaError> {
        if self.is_terminal() {
            return Err(ArenaError::GameFinished);
        }
        let human = self.human_side.ok_or(ArenaError::NoHumanSide)?;
        {
            let state = self.state.lock();
            if state.turn != human {
                return Err(ArenaError::NotYourTurn);
            }
            state.board.check_san(san, human)?;
        }
        let sender = self
            .pending_human
            .lock()
            .take()
            .ok_or(ArenaError::NotYourTurn)?;
        sender
            .send(HumanSignal::Move(san.to_string()))
            .map_err(|_| ArenaError::NotYourTurn)?;
        Ok(())
    }

    /// Legal destinations from a square, for UI highlighting.
    #[must_use]
    pub fn legal_destinations(&self, from: Square) -> Vec<Square> {
        self.state.lock().board.legal_destinations(from)
    }

    /// Stop the game: level-triggered; the loop notices at the next turn
    /// boundary or LLM attempt, and a pending human rendezvous is resolved
    /// with the abort sentinel.
    pub fn stop(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        {
            let mut result = self.result.lock();
            if result.is_none() {
                *result = Some("Game stopped by user".to_string());
            }
        }
        if let Some(sender) = self.pending_human.lock().take() {
            let _ = sender.send(HumanSignal::Abort);
        }
        self.cancel.cancel();
    }

    /// Terminal means a result is set or the game was aborted.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.aborted.load(Ordering::SeqCst) || self.result.lock().is_some()
    }

    /// The result string, once set.
    #[must_use]
    pub fn result(&self) -> Option<String> {
        self.result.lock().clone()
    }

    /// When the game finished, for the idle reaper.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }

    /// Full snapshot for the state endpoint and new subscribers.
    #[must_use]
    pub fn snapshot(&self) -> StatePayload {
        let state = self.state.lock();
        let clock = self.clock.lock();
        StatePayload {
            board: board_rows(&state.board),
            turn: state.turn,
            pgn: state.history.pgn(),
            move_count: state.history.len(),
            result: self.result.lock().clone(),
            models: ModelLabels {
                white: self.backend_label(Color::White),
                black: self.backend_label(Color::Black),
            },
            captured: captured_of(&state.board),
            clock: (!clock.unlimited).then(|| clock.live_payload(state.turn, Instant::now())),
            human_side: self.human_side,
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn emit(&self, event: ArenaEvent) {
        (self.sink)(event);
    }

    fn emit_board(&self) {
        let payload = board_payload_of(&self.state.lock());
        self.emit(ArenaEvent::Board(payload));
    }

    fn emit_clock(&self) {
        let payload = {
            let clock = self.clock.lock();
            if clock.unlimited {
                None
            } else {
                Some(clock.payload())
            }
        };
        if let Some(payload) = payload {
            self.emit(ArenaEvent::Clock(payload));
        }
    }

    fn result_or(&self, fallback: &str) -> String {
        self.result
            .lock()
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }

    fn model_label(&self, color: Color) -> String {
        self.backend_label(color)
            .unwrap_or_else(|| "human".to_string())
    }

    fn backend_label(&self, color: Color) -> Option<String> {
        let backend = match color {
            Color::White => self.white.as_ref(),
            Color::Black => self.black.as_ref(),
        };
        backend.map(|b| b.model().to_string())
    }

}

fn board_rows(board: &Board) -> BoardRows {
    board.to_rows().iter().map(|row| row.to_vec()).collect()
}

fn captured_of(board: &Board) -> CapturedPieces {
    CapturedPieces {
        by_white: board.captured_by(Color::White).to_vec(),
        by_black: board.captured_by(Color::Black).to_vec(),
    }
}

fn board_payload_of(state: &BoardState) -> BoardPayload {
    BoardPayload {
        squares: board_rows(&state.board),
        turn: state.turn,
        last_move: state.last_move.map(|(from, to)| LastMove {
            from: from.to_string(),
            to: to.to_string(),
        }),
        captured: captured_of(&state.board),
    }
}
