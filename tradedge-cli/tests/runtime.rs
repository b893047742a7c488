use std::fs;
use std::time::Duration;

use anyhow::Result;
use tradedge_alerts::AlertMetrics;
use tradedge_cli::live::{LiveSessionSettings, ShutdownSignal};
use tradedge_cli::telemetry::spawn_metrics_server;
use tradedge_config::load_config_from;
use tradedge_core::{ConnectionState, UntaggedTradePolicy};

#[tokio::test]
async fn metrics_endpoint_serves_registry() -> Result<()> {
    let metrics = AlertMetrics::new();
    metrics.update_connection_state(ConnectionState::Connected);
    let shutdown = ShutdownSignal::manual();
    let (addr, handle) =
        spawn_metrics_server(metrics.registry(), "127.0.0.1:0".parse()?, shutdown.clone())?;

    let body = reqwest::get(format!("http://{addr}/metrics"))
        .await?
        .text()
        .await?;
    assert!(body.contains("tradedge_channel_connected 1"));

    let missing = reqwest::get(format!("http://{addr}/health")).await?;
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

#[test]
fn layered_files_produce_session_settings() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("default.toml"),
        r#"
[gateway]
rest_url = "https://gateway.example"
request_timeout_secs = 7

[channel]
app_key = "abc"
channel_name = "trades"

[entitlements]
refresh_interval_secs = 60
untagged_policy = "everyone"

[live]
metrics_addr = ""
display_utc_offset_minutes = 330
"#,
    )?;
    fs::write(
        dir.path().join("prod.toml"),
        "[bulk]\nmax_attempts = 5\nretry_delay_ms = 250\n",
    )?;
    let config = load_config_from(dir.path(), Some("prod"))?;
    let settings = LiveSessionSettings::from_config(&config)?;

    assert_eq!(settings.twm.base_url, "https://gateway.example");
    assert_eq!(settings.twm.request_timeout, Duration::from_secs(7));
    assert_eq!(settings.retry.max_attempts, 5);
    assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
    assert_eq!(settings.refresh_interval, Duration::from_secs(60));
    assert_eq!(settings.untagged_policy, UntaggedTradePolicy::Everyone);
    assert_eq!(settings.pusher.app_key, "abc");
    assert_eq!(settings.display_offset.local_minus_utc(), 19_800);
    assert!(settings.metrics_addr.is_none());
    assert!(settings.messaging.is_none());
    Ok(())
}
