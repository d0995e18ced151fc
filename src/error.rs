//! Arena error taxonomy.

use crate::chess::ChessError;
use crate::types::Color;

/// Errors surfaced to the HTTP layer. Game-path failures never reach here;
/// they are expressed as `error`, `status` or `gameOver` events instead.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// No game exists for the session token.
    #[error("no game for this session")]
    NoGame,

    /// A non-terminal game already exists for the session token.
    #[error("a game is already in progress for this session")]
    GameInProgress,

    /// The game has already ended.
    #[error("game is already over")]
    GameFinished,

    /// The game has no human-controlled side.
    #[error("no human side in this game")]
    NoHumanSide,

    /// It is not the human side's turn.
    #[error("not your turn")]
    NotYourTurn,

    /// The submitted move was rejected by the rules engine.
    #[error(transparent)]
    Chess(#[from] ChessError),

    /// Shared-credential cooldown is active for this token.
    #[error("shared-credential games are rate limited; try again later")]
    Cooldown {
        /// Milliseconds until the window expires.
        remaining_ms: i64,
    },

    /// An LLM side was requested without a usable credential.
    #[error("missing API credential for {side}")]
    MissingCredential {
        /// The side lacking configuration.
        side: Color,
    },

    /// Startup or request configuration is invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },

    /// The model-list proxy failed upstream.
    #[error("model list request failed: {reason}")]
    ModelList {
        /// What went wrong.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(ArenaError::NoGame.to_string(), "no game for this session");
        assert_eq!(
            ArenaError::MissingCredential { side: Color::Black }.to_string(),
            "missing API credential for black"
        );
        let err = ArenaError::Chess(ChessError::UnparsableSan("Z9".into()));
        assert_eq!(err.to_string(), "cannot parse move: Z9");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ArenaError>();
    }
}
