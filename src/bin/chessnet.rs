//! chessnet CLI: run the match server, manage engines, inspect games.

use std::sync::Arc;

use chessnet::arena::Arena;
use chessnet::broker::{Broker, callback};
use chessnet::config::{Config, RunnerKind};
use chessnet::db::Db;
use chessnet::event::{Event, EventKind};
use chessnet::manager::EngineManager;
use chessnet::model::{Engine, Game, GameId};
use chessnet::runner::{ProcessRunners, RunnerFactory};
use chessnet::scheduler::DockerScheduler;
use chessnet::server;
use chessnet::storage::Storage;
use chessnet::subscriber::persist_events;
use chessnet::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "chessnet", about = "Chess engine match orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and play requested games
    Serve,
    /// Engine registry
    Engine {
        #[command(subcommand)]
        action: EngineAction,
    },
    /// Stored games
    Game {
        #[command(subcommand)]
        action: GameAction,
    },
    /// Play one game in the foreground and print the result
    Play {
        /// Engine id playing white (family#variant#version)
        white: String,
        /// Engine id playing black
        black: String,
    },
}

#[derive(Subcommand)]
enum EngineAction {
    /// Register an engine
    Add {
        family: String,
        variant: String,
        version: String,
        /// Container image (or executable path for the process runner)
        image: String,
    },
    /// List registered engines
    List,
    /// Remove an engine
    Remove { id: String },
}

#[derive(Subcommand)]
enum GameAction {
    /// List games
    List {
        /// Only games this engine played in
        #[arg(long)]
        engine: Option<String>,
    },
    /// Show a game
    Show {
        /// Game ID (full UUID or prefix)
        id: String,
    },
    /// Print a game's moves
    Moves {
        /// Game ID (full UUID or prefix)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve => {
            let _guard = init_telemetry(TelemetryConfig::from(&config))?;
            let db = open_db(&config).await?;
            match config.runner {
                RunnerKind::Docker => {
                    let manager =
                        EngineManager::new(DockerScheduler::default(), config.settings.manager.clone());
                    cmd_serve(&config, db, manager).await
                }
                RunnerKind::Process => cmd_serve(&config, db, ProcessRunners).await,
            }
        }
        Command::Play { white, black } => {
            let _guard = init_telemetry(TelemetryConfig::from(&config))?;
            let db = open_db(&config).await?;
            match config.runner {
                RunnerKind::Docker => {
                    let manager =
                        EngineManager::new(DockerScheduler::default(), config.settings.manager.clone());
                    cmd_play(&config, db, manager, &white, &black).await
                }
                RunnerKind::Process => cmd_play(&config, db, ProcessRunners, &white, &black).await,
            }
        }
        Command::Engine { action } => {
            let db = open_db(&config).await?;
            match action {
                EngineAction::Add {
                    family,
                    variant,
                    version,
                    image,
                } => {
                    let engine = Engine::new(family, variant, version, image);
                    db.store_engine(&engine).await?;
                    println!("Registered {}", engine.id());
                    Ok(())
                }
                EngineAction::List => cmd_engine_list(&db).await,
                EngineAction::Remove { id } => {
                    db.delete_engine(&id).await?;
                    println!("Removed {id}");
                    Ok(())
                }
            }
        }
        Command::Game { action } => {
            let db = open_db(&config).await?;
            match action {
                GameAction::List { engine } => cmd_game_list(&db, engine).await,
                GameAction::Show { id } => cmd_game_show(&db, &id).await,
                GameAction::Moves { id } => cmd_game_moves(&db, &id).await,
            }
        }
    }
}

async fn open_db(config: &Config) -> anyhow::Result<Db> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_serve<F: RunnerFactory>(config: &Config, db: Db, runners: F) -> anyhow::Result<()> {
    let storage = Arc::new(db);
    let broker = Broker::new();
    let persisted = persist_events(&broker, Arc::clone(&storage));

    let arena = Arena::new(
        storage,
        Arc::new(runners),
        broker.clone(),
        config.settings.game.clone(),
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(runner = %config.runner, "serving");
    server::serve(listener, arena.clone(), async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    let active = arena.active_matches();
    if active > 0 {
        warn!(active, "games still in progress are abandoned and will stay unfinished");
    }
    let pending = broker.close(persisted).await;
    info!(pending, "stored remaining events");
    Ok(())
}

async fn cmd_play<F: RunnerFactory>(
    config: &Config,
    db: Db,
    runners: F,
    white: &str,
    black: &str,
) -> anyhow::Result<()> {
    let storage = Arc::new(db);
    let broker = Broker::new();
    let persisted = persist_events(&broker, Arc::clone(&storage));

    let arena = Arena::new(
        storage,
        Arc::new(runners),
        broker.clone(),
        config.settings.game.clone(),
    );
    let (game, white, black) = arena.prepare(white, black).await?;
    println!("Game {}: {} vs {}", game.game_id, game.white, game.black);

    let printer = broker.subscribe(
        game.game_id.to_string(),
        [EventKind::MakeMove],
        callback(|event| async move {
            if let Event::MakeMove { mv, engine_id, .. } = event {
                println!("  {:<8} {}", mv.san, engine_id);
            }
            Ok(())
        }),
    );

    let result = arena.run_match(game, white, black).await;
    // Moves and the result are written by the subscriber; let it finish
    // before the runtime shuts down.
    broker.close(printer).await;
    broker.close(persisted).await;
    let outcome = result?;
    println!("Result: {outcome}");
    Ok(())
}

async fn cmd_engine_list(db: &Db) -> anyhow::Result<()> {
    let engines = db.list_engines().await?;
    if engines.is_empty() {
        println!("No engines registered.");
        return Ok(());
    }

    println!("{:<40}  IMAGE", "ID");
    println!("{}", "-".repeat(80));
    for engine in &engines {
        println!("{:<40}  {}", engine.id(), engine.image);
    }
    println!("\n{} engine(s)", engines.len());
    Ok(())
}

async fn cmd_game_list(db: &Db, engine: Option<String>) -> anyhow::Result<()> {
    let games = match engine {
        Some(id) => db.games_for_engine(&id).await?,
        None => db.list_games().await?,
    };
    if games.is_empty() {
        println!("No games found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<30}  {:<30}  {:<8}  STARTED",
        "ID", "WHITE", "BLACK", "RESULT"
    );
    println!("{}", "-".repeat(100));
    for game in &games {
        println!(
            "{:<8}  {:<30}  {:<30}  {:<8}  {}",
            &game.game_id.to_string()[..8],
            game.white,
            game.black,
            result_label(game),
            game.started_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} game(s)", games.len());
    Ok(())
}

fn result_label(game: &Game) -> &'static str {
    match (&game.outcome, &game.failure) {
        (Some(outcome), _) => outcome.as_str(),
        (None, Some(_)) => "aborted",
        (None, None) => "*",
    }
}

/// Resolve a full game id or a unique prefix of one.
async fn resolve_game_id(db: &Db, id: &str) -> anyhow::Result<GameId> {
    if let Ok(game_id) = id.parse::<GameId>() {
        return Ok(game_id);
    }
    let games = db.list_games().await?;
    let matches: Vec<GameId> = games
        .iter()
        .map(|game| game.game_id)
        .filter(|game_id| game_id.to_string().starts_with(id))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no game matching prefix '{id}'"),
        [game_id] => Ok(*game_id),
        _ => anyhow::bail!("{} games match prefix '{id}', be more specific", matches.len()),
    }
}

async fn cmd_game_show(db: &Db, id: &str) -> anyhow::Result<()> {
    let game = db.get_game(resolve_game_id(db, id).await?).await?;
    let moves = db.moves_in_game(game.game_id).await?;

    println!("ID:       {}", game.game_id);
    println!("Started:  {}", game.started_at);
    println!("White:    {}", game.white);
    println!("Black:    {}", game.black);
    println!("Result:   {}", result_label(&game));
    if let Some(ref failure) = game.failure {
        println!("Failure:  {failure}");
    }
    println!("Moves:    {}", moves.len());
    Ok(())
}

async fn cmd_game_moves(db: &Db, id: &str) -> anyhow::Result<()> {
    let game_id = resolve_game_id(db, id).await?;
    let moves = db.moves_in_game(game_id).await?;
    for (ply, record) in moves.iter().enumerate() {
        let number = ply / 2 + 1;
        let prefix = if ply % 2 == 0 {
            format!("{number}.")
        } else {
            format!("{number}...")
        };
        println!(
            "{prefix:<6} {:<8} {:<6} {}",
            record.mv.san, record.mv.uci, record.engine_id
        );
    }
    Ok(())
}
