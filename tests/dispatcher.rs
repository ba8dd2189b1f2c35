use serde_json::{json, Value};
use sshmux::app::App;
use sshmux::config::Settings;
use sshmux::errors::ToolErrorKind;
use sshmux::server::Server;
use std::sync::Arc;

fn app() -> Arc<App> {
    Arc::new(App::with_settings(Settings::default()).expect("app"))
}

#[tokio::test]
async fn unknown_tool_is_a_config_error_with_catalog() {
    let app = app();
    let err = Server::dispatch(&app, "ssh_exec", &json!({}))
        .await
        .expect_err("unknown tool");
    assert_eq!(err.kind, ToolErrorKind::ConfigError);
    let known = err
        .details
        .as_ref()
        .and_then(|d| d.get("known_tools"))
        .and_then(|v| v.as_array())
        .expect("known_tools");
    assert!(known.iter().any(|v| v.as_str() == Some("ssh_execute")));
}

#[tokio::test]
async fn missing_required_arguments_fail_before_any_io() {
    let app = app();
    let err = Server::dispatch(&app, "ssh_execute", &json!({"host": "h1"}))
        .await
        .expect_err("missing args");
    assert_eq!(err.kind, ToolErrorKind::ConfigError);
    assert!(err.message.contains("command"));
}

#[tokio::test]
async fn blocked_command_is_refused_without_connecting() {
    let app = app();
    let started = std::time::Instant::now();
    let err = Server::dispatch(
        &app,
        "ssh_execute",
        &json!({
            "host": "10.255.255.1",
            "username": "root",
            "password": "pw",
            "command": "rm -rf /",
        }),
    )
    .await
    .expect_err("must be blocked");
    assert_eq!(err.kind, ToolErrorKind::SafetyBlocked);
    // refusal happens at the gate, well before any dial timeout could pass
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
    let stats = app.pool.stats();
    assert_eq!(stats.get("in_use").and_then(Value::as_u64), Some(0));
    assert_eq!(stats.get("idle").and_then(Value::as_u64), Some(0));
}

#[tokio::test]
async fn execute_without_credentials_is_auth_failure() {
    let app = app();
    let err = Server::dispatch(
        &app,
        "ssh_execute",
        &json!({"host": "h1", "username": "u", "command": "ls"}),
    )
    .await
    .expect_err("no credentials anywhere");
    assert_eq!(err.kind, ToolErrorKind::AuthFailure);
    assert_eq!(err.host.as_deref(), Some("h1"));
}

#[tokio::test]
async fn stored_credentials_round_trip() {
    let app = app();
    let result = Server::dispatch(
        &app,
        "auth_store_credentials",
        &json!({"host": "db1", "username": "deploy", "password": "s3cret"}),
    )
    .await
    .expect("store");
    assert_eq!(result.get("ok"), Some(&Value::Bool(true)));
    assert_eq!(
        result.get("auth_mode").and_then(Value::as_str),
        Some("password")
    );
    assert!(app.keystore.get("db1", "deploy").is_some());

    let err = Server::dispatch(
        &app,
        "auth_store_credentials",
        &json!({"host": "db1", "username": "deploy"}),
    )
    .await
    .expect_err("credential material required");
    assert_eq!(err.kind, ToolErrorKind::ConfigError);
}

#[tokio::test]
async fn clear_cache_reports_removed_entries() {
    let app = app();
    let result = Server::dispatch(&app, "ssh_clear_cache", &json!({}))
        .await
        .expect("clear");
    assert_eq!(result.get("removed").and_then(Value::as_u64), Some(0));

    let result = Server::dispatch(&app, "ssh_clear_cache", &json!({"host": "h9"}))
        .await
        .expect("clear host");
    assert_eq!(result.get("host").and_then(Value::as_str), Some("h9"));
}

#[tokio::test]
async fn session_info_exposes_substrate_state() {
    let app = app();
    let result = Server::dispatch(&app, "ssh_session_info", &Value::Null)
        .await
        .expect("info");
    assert!(result.get("cache").is_some());
    assert!(result.get("pool").is_some());
    assert!(result.get("interactive_sessions").is_some());
    assert_eq!(
        result
            .get("cache")
            .and_then(|c| c.get("maxsize"))
            .and_then(Value::as_u64),
        Some(128)
    );
}

#[tokio::test]
async fn interactive_send_on_unknown_session_fails() {
    let app = app();
    let err = Server::dispatch(
        &app,
        "dir_interactive",
        &json!({"op": "send", "session_id": "nope", "input": "pwd\n"}),
    )
    .await
    .expect_err("unknown session");
    assert_eq!(err.kind, ToolErrorKind::SessionNotFound);

    let err = Server::dispatch(
        &app,
        "dir_interactive",
        &json!({"op": "close", "session_id": "nope"}),
    )
    .await
    .expect_err("unknown session");
    assert_eq!(err.kind, ToolErrorKind::SessionNotFound);
}

#[tokio::test]
async fn interactive_rejects_unknown_op() {
    let app = app();
    let err = Server::dispatch(&app, "dir_interactive", &json!({"op": "restart"}))
        .await
        .expect_err("unknown op");
    assert_eq!(err.kind, ToolErrorKind::ConfigError);
    assert!(err.message.contains("open"));
}

#[tokio::test]
async fn allowlist_mode_blocks_everything_else() {
    let mut settings = Settings::default();
    settings.allowlist_only = true;
    let app = Arc::new(App::with_settings(settings).expect("app"));
    let err = Server::dispatch(
        &app,
        "ssh_execute",
        &json!({
            "host": "h1",
            "username": "u",
            "password": "pw",
            "command": "touch /tmp/x",
        }),
    )
    .await
    .expect_err("not in allowlist");
    assert_eq!(err.kind, ToolErrorKind::SafetyBlocked);
}

#[tokio::test]
async fn shaping_arguments_are_validated_up_front() {
    let app = app();
    let err = Server::dispatch(
        &app,
        "ssh_execute",
        &json!({
            "host": "h1",
            "username": "u",
            "password": "pw",
            "command": "ls",
            "token_mode": "truncate",
        }),
    )
    .await
    .expect_err("max_tokens required");
    assert_eq!(err.kind, ToolErrorKind::ConfigError);
    assert!(err.message.contains("max_tokens"));
}

#[tokio::test]
async fn shutdown_refuses_further_work() {
    let app = app();
    app.shutdown().await;
    let err = Server::dispatch(
        &app,
        "ssh_execute",
        &json!({"host": "h1", "username": "u", "password": "pw", "command": "ls"}),
    )
    .await
    .expect_err("pool is down");
    assert_eq!(err.kind, ToolErrorKind::PoolShuttingDown);
}
