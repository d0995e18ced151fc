//! HTTP API route handlers.
//!
//! Thin surface over the registry and games: token issuance, the SSE event
//! stream, game lifecycle endpoints and the model-list proxy. All errors
//! leave as `{error}` JSON with conventional status codes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::chess::Board;
use crate::config::{ArenaConfig, SideDefaults};
use crate::error::ArenaError;
use crate::game::{Game, GameSettings};
use crate::llm::{ExchangeLog, LlmClient, RateLimiter};
use crate::registry::SessionRegistry;
use crate::types::events::{
    ArenaEvent, BoardPayload, CapturedPieces, ModelLabels, StatePayload,
};
use crate::types::{Color, Square};

/// Shared application state.
pub struct AppState {
    /// Session registry and broadcast fabric.
    pub registry: Arc<SessionRegistry>,
    /// Server configuration.
    pub config: ArenaConfig,
    /// Outbound HTTP client, shared by LLM clients and the model proxy.
    pub http: reqwest::Client,
    /// Process-wide chat rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Append-only LLM exchange log.
    pub exchange_log: Arc<ExchangeLog>,
    /// Model-list cache keyed by `(models URL, credential)`.
    model_cache: DashMap<(String, String), CachedModels>,
}

#[derive(Clone)]
struct CachedModels {
    models: Vec<ModelInfo>,
    fetched_at: tokio::time::Instant,
}

/// One entry of the model-list response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelInfo {
    /// Model identifier.
    pub id: String,
    /// Display name (the id when the upstream has no separate name).
    pub name: String,
}

impl AppState {
    /// Build the shared state from configuration.
    #[must_use]
    pub fn new(config: ArenaConfig) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(
            config.subscriber_capacity,
            config.cooldown_window,
        ));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_interval));
        let exchange_log = Arc::new(ExchangeLog::new(&config.exchange_log_path));
        Arc::new(Self {
            registry,
            config,
            http: reqwest::Client::new(),
            limiter,
            exchange_log,
            model_cache: DashMap::new(),
        })
    }
}

/// Create the HTTP router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/token", post(issue_token))
        .route("/api/game/stream", get(game_stream))
        .route("/api/game/start", post(start_game))
        .route("/api/game/state", get(game_state))
        .route("/api/game/move", post(submit_move))
        .route("/api/game/legal-moves", get(legal_moves))
        .route("/api/game/stop", post(stop_game))
        .route("/api/game/reset", post(reset_game))
        .route("/api/models", post(list_models))
        .route("/api/models/default", post(list_models_default))
        .with_state(state)
}

// ============================================================================
// Requests
// ============================================================================

/// Session token query parameter.
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    /// The opaque session token.
    pub token: String,
}

impl TokenQuery {
    fn validated(&self) -> Result<&str, ApiError> {
        if self.token.trim().is_empty() {
            return Err(ApiError::bad_request("missing session token"));
        }
        Ok(&self.token)
    }
}

/// Body of a game-start request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartRequest {
    /// Custom endpoint for White.
    pub white_api_url: Option<String>,
    /// Custom credential for White.
    pub white_api_key: Option<String>,
    /// Model for White.
    pub white_model: Option<String>,
    /// Custom endpoint for Black.
    pub black_api_url: Option<String>,
    /// Custom credential for Black.
    pub black_api_key: Option<String>,
    /// Model for Black.
    pub black_model: Option<String>,
    /// Retry budget override.
    pub max_retries: Option<u32>,
    /// Base time per side, in minutes (fractional allowed). Absent or zero
    /// means unlimited.
    pub base_time: Option<f64>,
    /// Increment per move, in seconds.
    pub increment: Option<f64>,
    /// `"white"`, `"black"` or `"none"`.
    pub human_side: Option<String>,
    /// Cooldown bypass password.
    pub password: Option<String>,
}

/// Body of a human move submission.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    /// SAN of the move.
    #[serde(rename = "move")]
    pub san: String,
}

/// Query of the legal-moves endpoint.
#[derive(Debug, Deserialize)]
pub struct LegalMovesQuery {
    /// The opaque session token.
    pub token: String,
    /// Source file (0-7).
    pub file: u8,
    /// Source rank (0-7).
    pub rank: u8,
}

/// Body of a model-list request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsRequest {
    /// Chat endpoint or API base URL.
    pub api_url: String,
    /// Bearer credential.
    pub api_key: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Generate a fresh session token.
async fn issue_token(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let token = state.registry.issue_token();
    Json(json!({ "token": token }))
}

/// SSE stream for a session. New subscribers receive a `state` frame first
/// when a game exists.
async fn game_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let token = query.validated()?;
    let broadcaster = state.registry.broadcaster();
    let (id, rx) = broadcaster.subscribe(token);
    let guard = SubscriptionGuard {
        broadcaster,
        token: token.to_string(),
        id,
    };

    let initial: Vec<ArenaEvent> = state
        .registry
        .game(token)
        .map(|game| ArenaEvent::State(game.snapshot()))
        .into_iter()
        .collect();

    let events = stream::iter(initial)
        .chain(ReceiverStream::new(rx))
        .map(move |event| {
            let _subscribed = &guard;
            Ok(sse_frame(&event))
        });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Unsubscribes when the SSE stream is dropped.
struct SubscriptionGuard {
    broadcaster: Arc<crate::registry::Broadcaster>,
    token: String,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.token, self.id);
    }
}

fn sse_frame(event: &ArenaEvent) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().event(event.kind()).data(data)
}

/// Start a game for a session.
async fn start_game(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    Json(request): Json<StartRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = query.validated()?;

    // Conflict with a live game wins over every other failure mode.
    if let Some(existing) = state.registry.game(token) {
        if !existing.is_terminal() {
            return Err(ArenaError::GameInProgress.into());
        }
    }

    let human_side = parse_human_side(request.human_side.as_deref())?;

    let white_custom = SideRequest {
        api_url: request.white_api_url.clone(),
        api_key: request.white_api_key.clone(),
        model: request.white_model.clone(),
    };
    let black_custom = SideRequest {
        api_url: request.black_api_url.clone(),
        api_key: request.black_api_key.clone(),
        model: request.black_model.clone(),
    };

    let mut sides = [None, None];
    for (slot, color, custom, defaults) in [
        (0, Color::White, &white_custom, &state.config.white_defaults),
        (1, Color::Black, &black_custom, &state.config.black_defaults),
    ] {
        if human_side == Some(color) {
            continue;
        }
        sides[slot] = Some(resolve_side(color, custom, defaults)?);
    }

    let bypass = matches!(
        (&request.password, &state.config.bypass_password),
        (Some(given), Some(expected)) if given == expected
    );
    let shared = (human_side != Some(Color::White) && white_custom.uses_shared_credentials())
        || (human_side != Some(Color::Black) && black_custom.uses_shared_credentials());
    if shared && !bypass {
        state.registry.check_and_stamp_cooldown(token)?;
    }

    let [white_resolved, black_resolved] = sides;
    let make_backend = |resolved: ResolvedSide| -> Arc<dyn crate::llm::ChatBackend> {
        Arc::new(LlmClient::new(
            state.http.clone(),
            resolved.api_url,
            resolved.api_key,
            resolved.model,
            Arc::clone(&state.limiter),
            Arc::clone(&state.exchange_log),
        ))
    };

    let settings = GameSettings {
        white: white_resolved.map(&make_backend),
        black: black_resolved.map(&make_backend),
        human_side,
        max_retries: request.max_retries.unwrap_or(state.config.max_retries),
        base_time_ms: request
            .base_time
            .filter(|minutes| *minutes > 0.0)
            .map(|minutes| (minutes * 60_000.0) as i64),
        increment_ms: request
            .increment
            .filter(|seconds| *seconds > 0.0)
            .map_or(0, |seconds| (seconds * 1000.0) as i64),
        prompt_schema: state.config.prompt_schema,
    };

    let game = Game::new(settings, state.registry.sink_for(token));
    state.registry.insert_game(token, Arc::clone(&game))?;
    game.start();
    info!(token, "game started");

    Ok(Json(json!({
        "message": "Game started",
        "state": game.snapshot(),
        "bypass": bypass,
    })))
}

/// Current snapshot, or the default position when no game exists.
async fn game_state(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<StatePayload>, ApiError> {
    let token = query.validated()?;
    let payload = state
        .registry
        .game(token)
        .map_or_else(default_state, |game| game.snapshot());
    Ok(Json(payload))
}

/// Submit a human move to the waiting game loop.
async fn submit_move(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = query.validated()?;
    let game = state.registry.game(token).ok_or(ArenaError::NoGame)?;
    game.submit_human_move(&request.san)?;
    Ok(Json(json!({ "ok": true, "move": request.san })))
}

/// Legal destination squares for UI highlighting.
async fn legal_moves(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LegalMovesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if query.token.trim().is_empty() {
        return Err(ApiError::bad_request("missing session token"));
    }
    let from = Square::new(query.file, query.rank)
        .ok_or_else(|| ApiError::bad_request("file and rank must be 0-7"))?;
    let moves: Vec<Square> = state
        .registry
        .game(&query.token)
        .map(|game| game.legal_destinations(from))
        .unwrap_or_default();
    Ok(Json(json!({ "moves": moves })))
}

/// Stop the session's game.
async fn stop_game(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = query.validated()?;
    let game = state.registry.game(token).ok_or(ArenaError::NoGame)?;
    game.stop();
    Ok(Json(json!({ "message": "Game stopped" })))
}

/// Stop and delete the session's game, telling remaining subscribers.
async fn reset_game(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = query.validated()?;
    if let Some(game) = state.registry.remove_game(token) {
        game.stop();
    }
    let broadcaster = state.registry.broadcaster();
    broadcaster.emit(token, &ArenaEvent::status("Game reset"));
    let fresh = default_state();
    broadcaster.emit(
        token,
        &ArenaEvent::Board(BoardPayload {
            squares: fresh.board,
            turn: fresh.turn,
            last_move: None,
            captured: fresh.captured,
        }),
    );
    Ok(Json(json!({ "message": "Game reset" })))
}

/// Model list via client-supplied endpoint and credential.
async fn list_models(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let models = fetch_models(&state, &request.api_url, &request.api_key).await?;
    Ok(Json(json!({ "models": models })))
}

/// Model list via the server-side default credentials.
async fn list_models_default(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let defaults = [&state.config.white_defaults, &state.config.black_defaults]
        .into_iter()
        .find(|d| d.is_usable())
        .ok_or_else(|| ApiError::bad_request("no default API credentials configured"))?;
    let api_url = defaults.api_url.clone().unwrap_or_default();
    let api_key = defaults.api_key.clone().unwrap_or_default();
    let models = fetch_models(&state, &api_url, &api_key).await?;
    Ok(Json(json!({ "models": models })))
}

// ============================================================================
// Model proxy internals
// ============================================================================

/// Derive a models URL: strip trailing `/chat` and `/completions` segments,
/// then append `/models`.
fn derive_models_url(api_url: &str) -> String {
    let mut base = api_url.trim_end_matches('/');
    loop {
        if let Some(stripped) = base.strip_suffix("/completions") {
            base = stripped;
        } else if let Some(stripped) = base.strip_suffix("/chat") {
            base = stripped;
        } else {
            break;
        }
    }
    format!("{base}/models")
}

async fn fetch_models(
    state: &AppState,
    api_url: &str,
    api_key: &str,
) -> Result<Vec<ModelInfo>, ApiError> {
    let models_url = derive_models_url(api_url);
    let cache_key = (models_url.clone(), api_key.to_string());

    if let Some(cached) = state.model_cache.get(&cache_key) {
        if cached.fetched_at.elapsed() < state.config.model_cache_ttl {
            return Ok(cached.models.clone());
        }
    }

    let response = state
        .http
        .get(&models_url)
        .bearer_auth(api_key)
        .send()
        .await
        .map_err(|error| {
            warn!(%models_url, %error, "model list request failed");
            ArenaError::ModelList {
                reason: error.to_string(),
            }
        })?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ArenaError::ModelList {
            reason: format!("upstream returned {status}: {body}"),
        }
        .into());
    }
    let value: serde_json::Value = response.json().await.map_err(|error| ArenaError::ModelList {
        reason: error.to_string(),
    })?;

    let mut models = parse_model_list(&value);
    models.sort_by(|a, b| a.id.cmp(&b.id));
    state.model_cache.insert(
        cache_key,
        CachedModels {
            models: models.clone(),
            fetched_at: tokio::time::Instant::now(),
        },
    );
    Ok(models)
}

fn parse_model_list(value: &serde_json::Value) -> Vec<ModelInfo> {
    let entries = value["data"]
        .as_array()
        .or_else(|| value["models"].as_array());
    entries
        .map(|list| {
            list.iter()
                .filter_map(|entry| {
                    let id = entry["id"].as_str()?.to_string();
                    let name = entry["name"].as_str().unwrap_or(&id).to_string();
                    Some(ModelInfo { id, name })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Start internals
// ============================================================================

struct SideRequest {
    api_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

impl SideRequest {
    /// Shared-credential means both the custom endpoint and the custom
    /// credential were omitted, so the server defaults get used.
    fn uses_shared_credentials(&self) -> bool {
        self.api_url.is_none() && self.api_key.is_none()
    }
}

struct ResolvedSide {
    api_url: String,
    api_key: String,
    model: String,
}

fn resolve_side(
    color: Color,
    custom: &SideRequest,
    defaults: &SideDefaults,
) -> Result<ResolvedSide, ArenaError> {
    let api_url = custom
        .api_url
        .clone()
        .or_else(|| defaults.api_url.clone())
        .ok_or(ArenaError::MissingCredential { side: color })?;
    let api_key = custom
        .api_key
        .clone()
        .or_else(|| defaults.api_key.clone())
        .ok_or(ArenaError::MissingCredential { side: color })?;
    let model = custom
        .model
        .clone()
        .or_else(|| defaults.model.clone())
        .ok_or_else(|| ArenaError::InvalidConfig {
            reason: format!("no model configured for {color}"),
        })?;
    Ok(ResolvedSide {
        api_url,
        api_key,
        model,
    })
}

fn parse_human_side(value: Option<&str>) -> Result<Option<Color>, ApiError> {
    match value {
        None | Some("none") | Some("") => Ok(None),
        Some("white") => Ok(Some(Color::White)),
        Some("black") => Ok(Some(Color::Black)),
        Some(other) => Err(ApiError::bad_request(format!(
            "humanSide must be white, black or none, got {other}"
        ))),
    }
}

/// The state payload served when no game exists: a fresh starting position.
fn default_state() -> StatePayload {
    let board = Board::new();
    StatePayload {
        board: board.to_rows().iter().map(|row| row.to_vec()).collect(),
        turn: Color::White,
        pgn: String::new(),
        move_count: 0,
        result: None,
        models: ModelLabels::default(),
        captured: CapturedPieces::default(),
        clock: None,
        human_side: None,
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Application error: a status code and an `{error}` JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": message.into() }),
        }
    }
}

impl From<ArenaError> for ApiError {
    fn from(error: ArenaError) -> Self {
        let status = match &error {
            ArenaError::GameInProgress => StatusCode::CONFLICT,
            ArenaError::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            ArenaError::ModelList { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = match &error {
            ArenaError::Cooldown { remaining_ms } => json!({
                "error": error.to_string(),
                "remainingMs": remaining_ms,
                "bypass": false,
            }),
            _ => json!({ "error": error.to_string() }),
        };
        Self { status, body }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_url_derivation() {
        assert_eq!(
            derive_models_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com/v1/models"
        );
        assert_eq!(
            derive_models_url("https://api.example.com/v1/completions"),
            "https://api.example.com/v1/models"
        );
        assert_eq!(
            derive_models_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/models"
        );
        assert_eq!(
            derive_models_url("https://api.example.com/v1"),
            "https://api.example.com/v1/models"
        );
    }

    #[test]
    fn model_list_parses_openai_shape() {
        let value = json!({ "data": [
            { "id": "zeta" },
            { "id": "alpha", "name": "Alpha One" },
        ]});
        let models = parse_model_list(&value);
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "zeta");
        assert_eq!(models[1].name, "Alpha One");
    }

    #[test]
    fn human_side_parsing() {
        assert_eq!(parse_human_side(None).unwrap(), None);
        assert_eq!(parse_human_side(Some("none")).unwrap(), None);
        assert_eq!(parse_human_side(Some("white")).unwrap(), Some(Color::White));
        assert_eq!(parse_human_side(Some("black")).unwrap(), Some(Color::Black));
        assert!(parse_human_side(Some("purple")).is_err());
    }

    #[test]
    fn shared_credential_detection() {
        let omitted = SideRequest {
            api_url: None,
            api_key: None,
            model: Some("m".into()),
        };
        assert!(omitted.uses_shared_credentials());
        let custom = SideRequest {
            api_url: Some("http://localhost".into()),
            api_key: None,
            model: None,
        };
        assert!(!custom.uses_shared_credentials());
    }

    #[test]
    fn cooldown_error_carries_remaining_ms() {
        let api_error: ApiError = ArenaError::Cooldown { remaining_ms: 5000 }.into();
        assert_eq!(api_error.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(api_error.body["remainingMs"], 5000);
        assert_eq!(api_error.body["bypass"], false);
    }

    #[test]
    fn conflict_maps_to_409() {
        let api_error: ApiError = ArenaError::GameInProgress.into();
        assert_eq!(api_error.status, StatusCode::CONFLICT);
    }

    #[test]
    fn start_request_accepts_camel_case() {
        let request: StartRequest = serde_json::from_str(
            r#"{"whiteModel": "m1", "baseTime": 0.05, "humanSide": "black", "maxRetries": 2}"#,
        )
        .unwrap();
        assert_eq!(request.white_model.as_deref(), Some("m1"));
        assert_eq!(request.base_time, Some(0.05));
        assert_eq!(request.human_side.as_deref(), Some("black"));
        assert_eq!(request.max_retries, Some(2));
    }

    #[test]
    fn default_state_is_a_fresh_board() {
        let payload = default_state();
        assert_eq!(payload.move_count, 0);
        assert_eq!(payload.turn, Color::White);
        assert_eq!(payload.board.len(), 8);
        assert!(payload.result.is_none());
    }
}
