//! HTTP API.
//!
//! Thin JSON CRUD over storage plus `POST /play`, which starts a game in
//! the background and answers with its id.

use std::future::Future;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::model::{Engine, Game, GameId, MoveRecord};
use crate::runner::RunnerFactory;
use crate::storage::Storage;

type ApiError = (StatusCode, String);
type ApiResult<T> = std::result::Result<T, ApiError>;

fn api_error(err: Error) -> ApiError {
    let status = match &err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyExists(_) | Error::AlreadyFinished(_) => StatusCode::CONFLICT,
        Error::InvalidEngine(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn parse_game_id(raw: &str) -> ApiResult<GameId> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid game id: {raw}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDto {
    pub id: String,
    pub family: String,
    pub variant: String,
    pub version: String,
    pub image: String,
}

impl From<Engine> for EngineDto {
    fn from(engine: Engine) -> Self {
        Self {
            id: engine.id(),
            family: engine.family,
            variant: engine.variant,
            version: engine.version,
            image: engine.image,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEngineRequest {
    pub family: String,
    pub variant: String,
    pub version: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRequest {
    pub white: String,
    pub black: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayResponse {
    pub game_id: GameId,
}

#[derive(Debug, Default, Deserialize)]
pub struct GamesQuery {
    /// Only games this engine played in.
    pub engine: Option<String>,
}

pub fn router<S: Storage, F: RunnerFactory>(arena: Arena<S, F>) -> Router {
    Router::new()
        .route("/engines", get(list_engines::<S, F>).post(create_engine::<S, F>))
        .route("/engines/{id}", get(get_engine::<S, F>).delete(delete_engine::<S, F>))
        .route("/play", post(play::<S, F>))
        .route("/games", get(list_games::<S, F>))
        .route("/games/{id}", get(get_game::<S, F>))
        .route("/games/{id}/moves", get(list_moves::<S, F>))
        .layer(TraceLayer::new_for_http())
        .with_state(arena)
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<S, F>(
    listener: TcpListener,
    arena: Arena<S, F>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()>
where
    S: Storage,
    F: RunnerFactory,
{
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, router(arena))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("http server stopped");
    Ok(())
}

async fn list_engines<S: Storage, F: RunnerFactory>(
    State(arena): State<Arena<S, F>>,
) -> ApiResult<Json<Vec<EngineDto>>> {
    let engines = arena.storage().list_engines().await.map_err(api_error)?;
    Ok(Json(engines.into_iter().map(EngineDto::from).collect()))
}

async fn create_engine<S: Storage, F: RunnerFactory>(
    State(arena): State<Arena<S, F>>,
    Json(req): Json<CreateEngineRequest>,
) -> ApiResult<(StatusCode, Json<EngineDto>)> {
    let engine = Engine::new(req.family, req.variant, req.version, req.image);
    arena
        .storage()
        .store_engine(&engine)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(EngineDto::from(engine))))
}

async fn get_engine<S: Storage, F: RunnerFactory>(
    State(arena): State<Arena<S, F>>,
    Path(id): Path<String>,
) -> ApiResult<Json<EngineDto>> {
    let engine = arena.storage().get_engine(&id).await.map_err(api_error)?;
    Ok(Json(EngineDto::from(engine)))
}

async fn delete_engine<S: Storage, F: RunnerFactory>(
    State(arena): State<Arena<S, F>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    arena.storage().delete_engine(&id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn play<S: Storage, F: RunnerFactory>(
    State(arena): State<Arena<S, F>>,
    Json(req): Json<PlayRequest>,
) -> ApiResult<(StatusCode, Json<PlayResponse>)> {
    let game_id = arena
        .start_match(&req.white, &req.black)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(PlayResponse { game_id })))
}

async fn list_games<S: Storage, F: RunnerFactory>(
    State(arena): State<Arena<S, F>>,
    Query(query): Query<GamesQuery>,
) -> ApiResult<Json<Vec<Game>>> {
    let games = match query.engine {
        Some(engine_id) => arena.storage().games_for_engine(&engine_id).await,
        None => arena.storage().list_games().await,
    }
    .map_err(api_error)?;
    Ok(Json(games))
}

async fn get_game<S: Storage, F: RunnerFactory>(
    State(arena): State<Arena<S, F>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Game>> {
    let game_id = parse_game_id(&id)?;
    let game = arena.storage().get_game(game_id).await.map_err(api_error)?;
    Ok(Json(game))
}

async fn list_moves<S: Storage, F: RunnerFactory>(
    State(arena): State<Arena<S, F>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<MoveRecord>>> {
    let game_id = parse_game_id(&id)?;
    // Distinguish an unknown game from one with no moves yet.
    arena.storage().get_game(game_id).await.map_err(api_error)?;
    let moves = arena
        .storage()
        .moves_in_game(game_id)
        .await
        .map_err(api_error)?;
    Ok(Json(moves))
}
