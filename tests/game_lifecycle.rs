//! End-to-end game scenarios with scripted chat backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chess_arena::game::{Game, GameSettings, PromptSchema};
use chess_arena::llm::{ChatBackend, ChunkSink, LlmError};
use chess_arena::testing::{CollectedEvents, ScriptedBackend};
use chess_arena::types::events::ArenaEvent;
use chess_arena::types::Color;

fn settings(
    white: Arc<dyn ChatBackend>,
    black: Arc<dyn ChatBackend>,
    max_retries: u32,
) -> GameSettings {
    GameSettings {
        white: Some(white),
        black: Some(black),
        human_side: None,
        max_retries,
        base_time_ms: None,
        increment_ms: 0,
        prompt_schema: PromptSchema::BareSan,
    }
}

/// A backend that always fails like a dead network.
struct UnreachableBackend;

#[async_trait]
impl ChatBackend for UnreachableBackend {
    fn model(&self) -> &str {
        "unreachable-model"
    }

    async fn chat(
        &self,
        _system: &str,
        _user: &str,
        _sink: ChunkSink<'_>,
    ) -> Result<String, LlmError> {
        Err(LlmError::Upstream {
            status: 502,
            body: "ECONNREFUSED upstream gateway".to_string(),
        })
    }
}

#[tokio::test]
async fn fools_mate_full_event_stream() {
    let events = CollectedEvents::new();
    let game = Game::new(
        settings(
            Arc::new(ScriptedBackend::new("alpha", &["f3", "g4"])),
            Arc::new(ScriptedBackend::new("beta", &["e5", "Qh4"]).with_thinking("hmm")),
            3,
        ),
        events.sink(),
    );
    Arc::clone(&game).run().await;

    let over = events.game_over().expect("gameOver emitted");
    assert_eq!(over.result, "Black wins by checkmate!");
    assert_eq!(over.pgn, "1. f3 e5 2. g4 Qh4");
    assert!(events.is_last_event_game_over());
    assert_eq!(events.count_kind("gameOver"), 1);

    // Four accepted moves, each chat preceding its move, board after each.
    assert_eq!(events.count_kind("chat"), 4);
    assert_eq!(events.count_kind("move"), 4);
    let all = events.all();
    let first_chat = all.iter().position(|e| e.kind() == "chat").unwrap();
    let first_move = all.iter().position(|e| e.kind() == "move").unwrap();
    assert!(first_chat < first_move);
    let last_board = all.iter().rposition(|e| e.kind() == "board").unwrap();
    let last_move = all.iter().rposition(|e| e.kind() == "move").unwrap();
    assert!(last_board > last_move, "board follows the move it reports");

    // Thinking chunks from the scripted black backend made it out.
    assert!(events.count_kind("thinking") > 0);

    // Move numbers advance by full moves.
    let moves = events.moves();
    assert_eq!(moves[0].move_number, 1);
    assert_eq!(moves[1].move_number, 1);
    assert_eq!(moves[2].move_number, 2);
    assert_eq!(moves[3].move_number, 2);
    assert_eq!(moves[3].color, Color::Black);
}

#[tokio::test]
async fn loyd_stalemate_line_draws() {
    let white = [
        "e3", "Qh5", "Qxa5", "Qxc7", "h4", "Qxd7", "Qxb7", "Qxb8", "Qxc8", "Qe6",
    ];
    let black = ["a5", "Ra6", "h5", "Rah6", "f6", "Kf7", "Qd3", "Qh7", "Kg6"];
    let events = CollectedEvents::new();
    let game = Game::new(
        settings(
            Arc::new(ScriptedBackend::new("w", &white)),
            Arc::new(ScriptedBackend::new("b", &black)),
            2,
        ),
        events.sink(),
    );
    Arc::clone(&game).run().await;

    assert_eq!(game.result().as_deref(), Some("Draw by stalemate"));
    assert!(events.is_last_event_game_over());
}

#[tokio::test]
async fn fifty_move_shuffle_draws() {
    let mut white = Vec::new();
    let mut black = Vec::new();
    for _ in 0..25 {
        white.extend_from_slice(&["Nf3", "Ng1"]);
        black.extend_from_slice(&["Nf6", "Ng8"]);
    }
    let white_refs: Vec<&str> = white.iter().copied().collect();
    let black_refs: Vec<&str> = black.iter().copied().collect();

    let events = CollectedEvents::new();
    let game = Game::new(
        settings(
            Arc::new(ScriptedBackend::new("w", &white_refs)),
            Arc::new(ScriptedBackend::new("b", &black_refs)),
            2,
        ),
        events.sink(),
    );
    Arc::clone(&game).run().await;

    assert_eq!(game.result().as_deref(), Some("Draw by 50-move rule"));
    assert_eq!(events.moves().len(), 100);
}

#[tokio::test]
async fn network_failure_refunds_clock_and_forfeits() {
    let events = CollectedEvents::new();
    let game = Game::new(
        GameSettings {
            white: Some(Arc::new(UnreachableBackend)),
            black: Some(Arc::new(ScriptedBackend::new("b", &[]))),
            human_side: None,
            max_retries: 2,
            base_time_ms: Some(60_000),
            increment_ms: 0,
            prompt_schema: PromptSchema::BareSan,
        },
        events.sink(),
    );
    Arc::clone(&game).run().await;

    assert_eq!(
        game.result().as_deref(),
        Some("Black wins by forfeit (White failed to make a legal move)")
    );
    assert_eq!(events.count_kind("error"), 2);

    // Every failed attempt was network-class: 120s credited back each time.
    let refunds = events
        .statuses()
        .iter()
        .filter(|s| s.contains("credited back"))
        .count();
    assert_eq!(refunds, 2);
    let clocks: Vec<i64> = events
        .all()
        .iter()
        .filter_map(|e| match e {
            ArenaEvent::Clock(c) => Some(c.white_time),
            _ => None,
        })
        .collect();
    assert!(
        clocks.iter().any(|&t| t > 60_000),
        "refund visible in a clock event: {clocks:?}"
    );
}

#[tokio::test]
async fn human_versus_script_round_trip() {
    let events = CollectedEvents::new();
    let game = Game::new(
        GameSettings {
            white: None,
            black: Some(Arc::new(ScriptedBackend::new("b", &["e5"]))),
            human_side: Some(Color::White),
            max_retries: 2,
            base_time_ms: None,
            increment_ms: 0,
            prompt_schema: PromptSchema::BareSan,
        },
        events.sink(),
    );
    game.start();

    // The loop parks on the human rendezvous; submission may race its
    // creation, so retry briefly.
    let mut accepted = false;
    for _ in 0..100 {
        match game.submit_human_move("e4") {
            Ok(()) => {
                accepted = true;
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    assert!(accepted, "human move accepted");

    // Wait for the scripted reply, then stop the game.
    let mut saw_black_move = false;
    for _ in 0..100 {
        if events.moves().len() >= 2 {
            saw_black_move = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_black_move, "black replied to the human move");
    let moves = events.moves();
    assert_eq!(moves[0].model, "human");
    assert_eq!(moves[0].notation, "e4");
    assert_eq!(moves[1].notation, "e5");

    // Out-of-turn and illegal submissions are rejected.
    assert!(game.submit_human_move("e4").is_err());

    game.stop();
    for _ in 0..100 {
        if events.is_last_event_game_over() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(events.is_last_event_game_over());
    assert_eq!(game.result().as_deref(), Some("Game stopped by user"));
}

#[tokio::test]
async fn illegal_human_moves_are_rejected_at_submission() {
    let events = CollectedEvents::new();
    let game = Game::new(
        GameSettings {
            white: None,
            black: Some(Arc::new(ScriptedBackend::new("b", &[]))),
            human_side: Some(Color::White),
            max_retries: 2,
            base_time_ms: None,
            increment_ms: 0,
            prompt_schema: PromptSchema::BareSan,
        },
        events.sink(),
    );
    game.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(game.submit_human_move("e5").is_err(), "illegal pawn jump");
    assert!(game.submit_human_move("Z9").is_err(), "unparseable");
    assert!(game.submit_human_move("e4").is_ok(), "legal move accepted");

    game.stop();
}

#[tokio::test(start_paused = true)]
async fn clock_accounting_balances() {
    // White thinks 1s per move with a 500ms increment; after the game the
    // debits, increments and base time reconcile exactly.
    let events = CollectedEvents::new();
    let game = Game::new(
        GameSettings {
            white: Some(Arc::new(
                ScriptedBackend::new("w", &["f3", "g4"]).with_delay(Duration::from_millis(1000)),
            )),
            black: Some(Arc::new(
                ScriptedBackend::new("b", &["e5", "Qh4"]).with_delay(Duration::from_millis(1000)),
            )),
            human_side: None,
            max_retries: 2,
            base_time_ms: Some(30_000),
            increment_ms: 500,
            prompt_schema: PromptSchema::BareSan,
        },
        events.sink(),
    );
    Arc::clone(&game).run().await;

    assert_eq!(game.result().as_deref(), Some("Black wins by checkmate!"));
    let final_clock = events
        .all()
        .iter()
        .rev()
        .find_map(|e| match e {
            ArenaEvent::Clock(c) => Some(*c),
            _ => None,
        })
        .expect("clock events emitted");
    // Two moves per side, each costing 1000ms and earning 500ms back.
    assert_eq!(final_clock.white_time, 30_000 - 2 * 1000 + 2 * 500);
    assert_eq!(final_clock.black_time, 30_000 - 2 * 1000 + 2 * 500);
}
