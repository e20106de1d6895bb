mod common;

use std::sync::Arc;
use std::time::Duration;

use chessnet::arena::Arena;
use chessnet::board::Board;
use chessnet::broker::{Broker, callback};
use chessnet::db::Db;
use chessnet::error::Error;
use chessnet::event::{Event, EventKind};
use chessnet::game::{GameConfig, play_game};
use chessnet::model::{Game, GameOutcome};
use chessnet::storage::Storage;
use chessnet::subscriber::persist_events;
use common::{
    FakeScheduler, ScriptedRunner, ScriptedRunners, TaskBehavior, UciBehavior, alphazero,
    fast_manager, spawn_uci_engine, stockfish,
};
use tokio::sync::mpsc;

/// Collect everything published on the game's channel.
fn watch(broker: &Broker, game: &Game) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    broker.subscribe(
        game.game_id.to_string(),
        EventKind::ALL,
        callback(move |event| {
            let tx = tx.clone();
            async move {
                tx.send(event).ok();
                Ok(())
            }
        }),
    );
    rx
}

async fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        events.push(event);
    }
    events
}

fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(Event::kind).collect()
}

fn fast_config() -> GameConfig {
    GameConfig {
        move_time_ms: 10,
        move_grace_ms: 2_000,
        max_plies: None,
    }
}

#[tokio::test]
async fn fools_mate_ends_with_black_win() {
    let game = Game::new(&stockfish(), &alphazero());
    let broker = Broker::new();
    let mut rx = watch(&broker, &game);
    let mut white = ScriptedRunner::new(stockfish(), &["f2f3", "g2g4"]);
    let mut black = ScriptedRunner::new(alphazero(), &["e7e5", "d8h4"]);

    let outcome = play_game(&game, &mut white, &mut black, &broker, &fast_config())
        .await
        .unwrap();
    assert_eq!(outcome, GameOutcome::BlackWins);

    assert_eq!(white.shutdowns, ["game finished: 0-1"]);
    assert_eq!(black.shutdowns, ["game finished: 0-1"]);

    let events = drain(&mut rx).await;
    assert_eq!(
        kinds(&events),
        [
            EventKind::StartGame,
            EventKind::MakeMove,
            EventKind::MakeMove,
            EventKind::MakeMove,
            EventKind::MakeMove,
            EventKind::EndGame,
        ]
    );
    match events.last() {
        Some(Event::EndGame { outcome, .. }) => assert_eq!(*outcome, GameOutcome::BlackWins),
        other => panic!("expected EndGame, got {other:?}"),
    }
}

#[tokio::test]
async fn moves_are_attributed_to_the_engine_that_made_them() {
    let game = Game::new(&stockfish(), &alphazero());
    let broker = Broker::new();
    let mut rx = watch(&broker, &game);
    let mut white = ScriptedRunner::new(stockfish(), &["f2f3", "g2g4"]);
    let mut black = ScriptedRunner::new(alphazero(), &["e7e5", "d8h4"]);

    play_game(&game, &mut white, &mut black, &broker, &fast_config())
        .await
        .unwrap();

    let mut replay = Board::new();
    let moves: Vec<_> = drain(&mut rx)
        .await
        .into_iter()
        .filter_map(|event| match event {
            Event::MakeMove {
                mv,
                fen_before,
                engine_id,
                ..
            } => Some((mv, fen_before, engine_id)),
            _ => None,
        })
        .collect();

    let expected_san = ["f3", "e5", "g4", "Qh4#"];
    for (ply, (mv, fen_before, engine_id)) in moves.iter().enumerate() {
        let mover = if ply % 2 == 0 { &game.white } else { &game.black };
        assert_eq!(engine_id, mover);
        assert_eq!(*fen_before, replay.fen());
        assert_eq!(mv.san, expected_san[ply]);
        replay.play_uci(&mv.uci).unwrap();
    }
    assert_eq!(moves.len(), 4);
}

#[tokio::test]
async fn engine_failure_mid_game_aborts_and_shuts_both_down() {
    let game = Game::new(&stockfish(), &alphazero());
    let broker = Broker::new();
    let mut rx = watch(&broker, &game);
    let mut white = ScriptedRunner::new(stockfish(), &["e2e4"]).then_fail("engine crashed");
    let mut black = ScriptedRunner::new(alphazero(), &["e7e5"]);

    let err = play_game(&game, &mut white, &mut black, &broker, &fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{err}");

    for runner in [&white, &black] {
        assert_eq!(runner.shutdowns.len(), 1);
        assert!(runner.shutdowns[0].starts_with("game aborted"));
        assert!(runner.shutdowns[0].contains("engine crashed"));
    }

    let events = drain(&mut rx).await;
    assert_eq!(
        kinds(&events),
        [
            EventKind::StartGame,
            EventKind::MakeMove,
            EventKind::MakeMove,
            EventKind::AbortGame,
        ]
    );
    match events.last() {
        Some(Event::AbortGame { reason, .. }) => assert!(reason.contains("engine crashed")),
        other => panic!("expected AbortGame, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_start_publishes_only_abort_start_and_stops_the_other_engine() {
    let game = Game::new(&stockfish(), &alphazero());
    let broker = Broker::new();
    let mut rx = watch(&broker, &game);
    let mut white = ScriptedRunner::new(stockfish(), &[]).failing_run("no capacity");
    let mut black = ScriptedRunner::new(alphazero(), &["e7e5"]);

    let err = play_game(&game, &mut white, &mut black, &broker, &fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provisioning(_)), "{err}");

    assert_eq!(black.runs, 1);
    assert_eq!(black.plays, 0);
    assert_eq!(black.shutdowns.len(), 1);
    assert!(black.shutdowns[0].contains("no capacity"));
    assert_eq!(white.plays, 0);

    // No StartGame, only the start failure with the game attached.
    let events = drain(&mut rx).await;
    assert_eq!(kinds(&events), [EventKind::AbortStart]);
    match &events[0] {
        Event::AbortStart { game: failed, reason } => {
            assert_eq!(failed.game_id, game.game_id);
            assert!(reason.contains("no capacity"));
        }
        other => panic!("expected AbortStart, got {other:?}"),
    }
}

#[tokio::test]
async fn ply_cap_without_outcome_aborts() {
    let game = Game::new(&stockfish(), &alphazero());
    let broker = Broker::new();
    let mut rx = watch(&broker, &game);
    let mut white = ScriptedRunner::new(stockfish(), &["g1f3", "f3g1"]);
    let mut black = ScriptedRunner::new(alphazero(), &["g8f6", "f6g8"]);
    let config = GameConfig {
        max_plies: Some(4),
        ..fast_config()
    };

    let err = play_game(&game, &mut white, &mut black, &broker, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoOutcome));
    assert_eq!(white.plays + black.plays, 4);

    let events = drain(&mut rx).await;
    assert_eq!(events.first().map(Event::kind), Some(EventKind::StartGame));
    assert_eq!(events.last().map(Event::kind), Some(EventKind::AbortGame));
    assert!(!kinds(&events).contains(&EventKind::EndGame));
}

#[tokio::test]
async fn illegal_move_is_rejected_before_publishing() {
    let game = Game::new(&stockfish(), &alphazero());
    let broker = Broker::new();
    let mut rx = watch(&broker, &game);
    let mut white = ScriptedRunner::new(stockfish(), &["e2e5"]);
    let mut black = ScriptedRunner::new(alphazero(), &[]);

    let err = play_game(&game, &mut white, &mut black, &broker, &fast_config())
        .await
        .unwrap_err();
    match err {
        Error::IllegalMove { mv, .. } => assert_eq!(mv, "e2e5"),
        other => panic!("expected IllegalMove, got {other}"),
    }

    let events = drain(&mut rx).await;
    assert_eq!(kinds(&events), [EventKind::StartGame, EventKind::AbortGame]);
}

#[tokio::test]
async fn remote_game_is_persisted_consistently() {
    let addr = spawn_uci_engine(UciBehavior::Normal).await;
    let scheduler = Arc::new(FakeScheduler::new(TaskBehavior::Ready(addr)));
    let manager = fast_manager(Arc::clone(&scheduler));

    let db = Arc::new(Db::in_memory().await.unwrap());
    db.store_engine(&stockfish()).await.unwrap();
    db.store_engine(&alphazero()).await.unwrap();

    let broker = Broker::new();
    persist_events(&broker, Arc::clone(&db));
    let config = GameConfig {
        max_plies: Some(200),
        ..fast_config()
    };
    let arena = Arena::new(Arc::clone(&db), Arc::new(manager), broker, config);

    let (game, white, black) = arena
        .prepare(&stockfish().id(), &alphazero().id())
        .await
        .unwrap();
    let game_id = game.game_id;
    let result = arena.run_match(game, white, black).await;

    // Both containers were released exactly once.
    assert_eq!(scheduler.launched().len(), 2);
    assert_eq!(scheduler.stopped().len(), 2);

    // Wait for the persisting subscriber to catch up with the last event.
    let mut stored = None;
    for _ in 0..500 {
        if let Ok(game) = db.get_game(game_id).await {
            if game.outcome.is_some() || game.failure.is_some() {
                stored = Some(game);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stored = stored.expect("game result was never persisted");
    let moves = db.moves_in_game(game_id).await.unwrap();

    let mut replay = Board::new();
    for (ply, record) in moves.iter().enumerate() {
        assert_eq!(record.fen_before, replay.fen());
        let mover = if ply % 2 == 0 { &stored.white } else { &stored.black };
        assert_eq!(&record.engine_id, mover);
        let applied = replay.play_uci(&record.mv.uci).unwrap();
        assert_eq!(applied.san, record.mv.san);
    }

    match result {
        Ok(outcome) => {
            assert_eq!(stored.outcome, Some(outcome));
            assert_eq!(replay.outcome(), Some(outcome));
        }
        Err(Error::NoOutcome) => {
            assert_eq!(stored.outcome, None);
            assert!(stored.failure.is_some());
            assert_eq!(moves.len(), 200);
        }
        Err(e) => panic!("unexpected game error: {e}"),
    }
}

#[test]
fn closed_subscriber_has_stored_the_game_before_the_runtime_exits() {
    let path = std::env::temp_dir().join(format!("chessnet-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());

    // Play on one runtime and drop it, as the CLI does when `main` returns.
    let first = tokio::runtime::Runtime::new().unwrap();
    let (game_id, outcome) = first.block_on(async {
        let db = Arc::new(Db::connect(&url).await.unwrap());
        db.migrate().await.unwrap();
        db.store_engine(&stockfish()).await.unwrap();
        db.store_engine(&alphazero()).await.unwrap();

        let broker = Broker::new();
        let persisted = persist_events(&broker, Arc::clone(&db));
        let runners = ScriptedRunners::default()
            .with_script(&stockfish(), &["f2f3", "g2g4"])
            .with_script(&alphazero(), &["e7e5", "d8h4"]);
        let arena = Arena::new(db, Arc::new(runners), broker.clone(), fast_config());

        let (game, white, black) = arena
            .prepare(&stockfish().id(), &alphazero().id())
            .await
            .unwrap();
        let game_id = game.game_id;
        let outcome = arena.run_match(game, white, black).await.unwrap();
        broker.close(persisted).await;
        (game_id, outcome)
    });
    drop(first);

    let second = tokio::runtime::Runtime::new().unwrap();
    second.block_on(async {
        let db = Db::connect(&url).await.unwrap();
        let stored = db.get_game(game_id).await.unwrap();
        assert_eq!(stored.outcome, Some(outcome));
        assert_eq!(db.moves_in_game(game_id).await.unwrap().len(), 4);
    });
    drop(second);

    for suffix in ["", "-wal", "-shm"] {
        std::fs::remove_file(format!("{}{suffix}", path.display())).ok();
    }
}

#[tokio::test]
async fn background_matches_are_counted_until_they_finish() {
    let db = Arc::new(Db::in_memory().await.unwrap());
    db.store_engine(&stockfish()).await.unwrap();
    db.store_engine(&alphazero()).await.unwrap();
    let runners = ScriptedRunners::default()
        .with_script(&stockfish(), &["f2f3", "g2g4"])
        .with_script(&alphazero(), &["e7e5", "d8h4"]);
    let arena = Arena::new(db, Arc::new(runners), Broker::new(), fast_config());

    arena
        .start_match(&stockfish().id(), &alphazero().id())
        .await
        .unwrap();
    // The spawned game has not been polled yet on this runtime.
    assert_eq!(arena.active_matches(), 1);

    for _ in 0..200 {
        if arena.active_matches() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(arena.active_matches(), 0);
}
