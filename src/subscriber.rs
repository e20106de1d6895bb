//! Standing subscriber that writes every game event to storage.

use std::sync::Arc;

use tracing::debug;

use crate::broker::{Broker, SubscriptionHandle, WILDCARD, callback};
use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::storage::Storage;

/// Subscribe to all events on all channels and persist them.
///
/// Storage failures are logged by the bus; they never reach the game.
pub fn persist_events<S: Storage>(broker: &Broker, storage: Arc<S>) -> SubscriptionHandle {
    broker.subscribe(
        WILDCARD,
        EventKind::ALL,
        callback(move |event| {
            let storage = Arc::clone(&storage);
            async move { store_event(storage.as_ref(), event).await }
        }),
    )
}

pub async fn store_event<S: Storage>(storage: &S, event: Event) -> Result<()> {
    debug!(game_id = %event.game_id(), kind = ?event.kind(), "storing event");
    match event {
        Event::StartGame { game } => storage.store_game(&game).await,
        Event::MakeMove {
            game_id,
            mv,
            fen_before,
            engine_id,
        } => {
            storage
                .store_move(game_id, &mv, &fen_before, &engine_id)
                .await
        }
        Event::EndGame { game_id, outcome } => storage.finish_game(game_id, outcome).await,
        Event::AbortGame { game_id, reason } => storage.abort_game(game_id, &reason).await,
        Event::AbortStart { mut game, reason } => {
            game.failure = Some(reason);
            storage.store_game(&game).await
        }
    }
}
