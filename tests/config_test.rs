use std::collections::HashMap;
use std::io::Write as _;

use chessnet::config::{Config, RunnerKind, Settings};
use secrecy::ExposeSecret;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn loads_required_fields_with_defaults() {
    let config = Config::from_lookup(lookup(&[("DATABASE_URL", "sqlite://test.db")])).unwrap();
    assert_eq!(config.database_url.expose_secret(), "sqlite://test.db");
    assert_eq!(config.bind.to_string(), "127.0.0.1:8080");
    assert_eq!(config.runner, RunnerKind::Docker);
    assert_eq!(config.log_level, "info");
    assert!(config.otel_endpoint.is_none());
    assert_eq!(config.settings, Settings::default());
}

#[test]
fn fails_without_database_url() {
    let err = Config::from_lookup(lookup(&[])).unwrap_err();
    assert!(err.to_string().contains("DATABASE_URL"));
}

#[test]
fn rejects_unknown_runner() {
    let result = Config::from_lookup(lookup(&[
        ("DATABASE_URL", "sqlite://test.db"),
        ("CHESSNET_RUNNER", "kubernetes"),
    ]));
    assert!(result.is_err());
}

#[test]
fn settings_file_overrides_defaults() {
    let mut file = tempfile_path("settings");
    writeln!(
        file.1,
        r#"
[manager]
cluster = "arena"
poll_schedule_secs = [0, 1]

[game]
move_time_ms = 250
max_plies = 400
"#
    )
    .unwrap();

    let config = Config::from_lookup(lookup(&[
        ("DATABASE_URL", "sqlite://test.db"),
        ("CHESSNET_RUNNER", "process"),
        ("CHESSNET_CONFIG", file.0.to_str().unwrap()),
    ]))
    .unwrap();
    std::fs::remove_file(&file.0).ok();

    assert_eq!(config.runner, RunnerKind::Process);
    assert_eq!(config.settings.manager.cluster, "arena");
    assert_eq!(config.settings.manager.poll_schedule_secs, vec![0, 1]);
    // untouched keys keep their defaults
    assert_eq!(config.settings.manager.engine_port, 3333);
    assert_eq!(config.settings.manager.capacity_provider, "FARGATE_SPOT");
    assert_eq!(config.settings.game.move_time_ms, 250);
    assert_eq!(config.settings.game.max_plies, Some(400));
}

#[test]
fn settings_reject_unknown_tables() {
    assert!(Settings::from_toml("[tournament]\nrounds = 3\n").is_err());
}

fn tempfile_path(name: &str) -> (std::path::PathBuf, std::fs::File) {
    let path = std::env::temp_dir().join(format!(
        "chessnet-{name}-{}.toml",
        uuid::Uuid::new_v4().simple()
    ));
    let file = std::fs::File::create(&path).unwrap();
    (path, file)
}
