//! # chessnet
//!
//! Plays chess engines against each other. Each engine runs in its own
//! short-lived container; games are driven over UCI, every move is
//! published on an in-process event bus, and a storage subscriber records
//! engines, games and moves in SQLite.

pub mod arena;
pub mod board;
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod game;
pub mod manager;
pub mod model;
pub mod runner;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod subscriber;
pub mod telemetry;
pub mod transport;
pub mod uci;
