//! Match launcher: turns a pair of engine ids into a running game.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{Instrument, info, warn};

use crate::broker::Broker;
use crate::error::Result;
use crate::game::{GameConfig, play_game};
use crate::model::{Engine, Game, GameId, GameOutcome};
use crate::runner::RunnerFactory;
use crate::storage::Storage;

/// Everything needed to start games. Cheap to clone.
pub struct Arena<S, F> {
    storage: Arc<S>,
    runners: Arc<F>,
    broker: Broker,
    config: GameConfig,
    /// Games spawned by `start_match` that have not returned yet.
    active: Arc<AtomicUsize>,
}

impl<S, F> Clone for Arena<S, F> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            runners: Arc::clone(&self.runners),
            broker: self.broker.clone(),
            config: self.config.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl<S: Storage, F: RunnerFactory> Arena<S, F> {
    pub fn new(storage: Arc<S>, runners: Arc<F>, broker: Broker, config: GameConfig) -> Self {
        Self {
            storage,
            runners,
            broker,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Number of background games still being played.
    pub fn active_matches(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Look up both engines and allocate a game for them.
    pub async fn prepare(&self, white_id: &str, black_id: &str) -> Result<(Game, Engine, Engine)> {
        let white = self.storage.get_engine(white_id).await?;
        let black = self.storage.get_engine(black_id).await?;
        let game = Game::new(&white, &black);
        Ok((game, white, black))
    }

    /// Play a prepared game to the end on the current task.
    pub async fn run_match(&self, game: Game, white: Engine, black: Engine) -> Result<GameOutcome> {
        let mut white = self.runners.runner(white);
        let mut black = self.runners.runner(black);
        play_game(&game, &mut white, &mut black, &self.broker, &self.config).await
    }

    /// Start a game in the background and return its id right away.
    ///
    /// Fails only if an engine is unknown. The game's progress is reported
    /// through events; it becomes visible in storage once both engines are
    /// up, or once starting them has failed.
    pub async fn start_match(&self, white_id: &str, black_id: &str) -> Result<GameId> {
        let (game, white, black) = self.prepare(white_id, black_id).await?;
        let game_id = game.game_id;
        info!(%game_id, white = %game.white, black = %game.black, "match requested");

        let arena = self.clone();
        let span = tracing::info_span!("arena.match", %game_id);
        self.active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(
            async move {
                if let Err(e) = arena.run_match(game, white, black).await {
                    warn!(error = %e, "match ended without a result");
                }
                arena.active.fetch_sub(1, Ordering::SeqCst);
            }
            .instrument(span),
        );
        Ok(game_id)
    }
}
