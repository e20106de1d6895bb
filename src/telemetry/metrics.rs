//! Metric instruments for chessnet.
//!
//! Instruments come from the `"chessnet"` meter on the globally registered
//! `MeterProvider`; with no provider installed they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("chessnet")
}

/// Counter: games whose engines both came up.
pub fn games_started() -> Counter<u64> {
    meter()
        .u64_counter("chessnet.games.started")
        .with_description("Games started with both engines ready")
        .build()
}

/// Counter: games that reached a terminal position.
/// Labels: `outcome` ("1-0" | "0-1" | "1/2-1/2").
pub fn games_finished() -> Counter<u64> {
    meter()
        .u64_counter("chessnet.games.finished")
        .with_description("Games that reached an outcome")
        .build()
}

/// Counter: games that failed before or during play.
/// Labels: `stage` ("start" | "play").
pub fn games_aborted() -> Counter<u64> {
    meter()
        .u64_counter("chessnet.games.aborted")
        .with_description("Games that ended without an outcome")
        .build()
}

/// Counter: moves accepted from engines.
pub fn moves_played() -> Counter<u64> {
    meter()
        .u64_counter("chessnet.moves.played")
        .with_description("Legal moves accepted from engines")
        .build()
}

/// Counter: engine provisioning attempts.
/// Labels: `result` ("ok" | "timeout" | "stopped" | "error").
pub fn provisions() -> Counter<u64> {
    meter()
        .u64_counter("chessnet.engine.provisions")
        .with_description("Engine container provisioning attempts")
        .build()
}

/// Histogram: time from launch request to a reachable engine, in seconds.
pub fn provision_duration_secs() -> Histogram<f64> {
    meter()
        .f64_histogram("chessnet.engine.provision_duration")
        .with_description("Time to provision an engine container")
        .with_unit("s")
        .build()
}

/// Counter: event handlers that returned an error or panicked.
/// Labels: `result` ("error" | "panic").
pub fn event_dispatch_failures() -> Counter<u64> {
    meter()
        .u64_counter("chessnet.events.dispatch_failures")
        .with_description("Event handlers that failed")
        .build()
}
