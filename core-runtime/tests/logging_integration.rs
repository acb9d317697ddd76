//! Integration tests for logging and configuration

use bridge_traits::logging::{LogLevel, MemoryLogger};
use core_runtime::config::{CoreConfig, API_URL_ENV};
use core_runtime::logging::{
    init_logging, text_preview, LogFormat, LoggingConfig, LOG_FILTER_ENV, LOG_FORMAT_ENV,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}

#[test]
fn test_logging_from_env() {
    std::env::set_var(LOG_FILTER_ENV, "core_playback=trace");
    std::env::set_var(LOG_FORMAT_ENV, "compact");
    let config = LoggingConfig::from_env();
    std::env::remove_var(LOG_FILTER_ENV);
    std::env::remove_var(LOG_FORMAT_ENV);

    assert_eq!(config.filter.as_deref(), Some("core_playback=trace"));
    assert_eq!(config.format, LogFormat::Compact);
}

#[test]
fn test_text_preview_keeps_short_text() {
    assert_eq!(text_preview("Ciao a tutti", 40), "Ciao a tutti");
    assert!(text_preview(&"a".repeat(500), 40).ends_with("(500 chars)"));
}

// Only one global subscriber may be installed per process, so every
// assertion on the installed subscriber lives in this one test.
#[tokio::test]
async fn test_init_logging_forwards_to_sink_once() {
    let sink = MemoryLogger::new();
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_logger_sink(Arc::new(sink.clone()));

    init_logging(config).expect("first initialization succeeds");
    assert!(init_logging(LoggingConfig::default()).is_err());

    tracing::info!(target: "core_playback::engine", attempt = 1u64, "stream ended");

    // the sink layer hands entries to a spawned task inside a runtime
    for _ in 0..50 {
        if sink.contains("stream ended") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(sink.contains("stream ended"));
}

#[test]
fn test_from_env_reads_api_url() {
    std::env::set_var(API_URL_ENV, "https://speech.example.org/");
    let builder = CoreConfig::from_env();
    std::env::remove_var(API_URL_ENV);

    let config = builder
        .http_client(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
        .build()
        .unwrap();
    assert_eq!(config.api_url, "https://speech.example.org");
}
