use retain_core::config::{ConfigError, OutputMode, RetainConfig};
use serde_json::{json, Value};

#[test]
fn golden_default_config_serialization() {
    let config = RetainConfig::v0();
    let value: Value = serde_json::to_value(&config).unwrap();
    assert_eq!(
        value,
        json!({
            "version": "1",
            "cache_id": "default",
            "setup_id": "default",
            "output": "store",
            "prescan": false,
            "scan_limit_percent": 50,
            "scan_limit_min_pages": 2,
            "window_pages": null,
            "max_scan_nodes": 1000000,
            "max_marks_per_page": 1000000,
            "large_image_pixels": 1048576,
            "significant_area": 4.0,
            "merge_lookahead": 8,
            "max_resource_depth": 64,
            "poll_interval_ms": 50
        })
    );

    // Field order is part of the format.
    let raw = serde_json::to_string(&config).unwrap();
    let version = raw.find("\"version\"").unwrap();
    let cache_id = raw.find("\"cache_id\"").unwrap();
    let poll = raw.find("\"poll_interval_ms\"").unwrap();
    assert!(version < cache_id && cache_id < poll);
}

#[test]
fn missing_fields_take_defaults() {
    let config = RetainConfig::from_json(r#"{ "cache_id": "invoices", "window_pages": 4, "output": "export" }"#)
        .unwrap();
    assert_eq!(config.cache_id, "invoices");
    assert_eq!(config.window_pages, Some(4));
    assert_eq!(config.output, OutputMode::Export);
    assert_eq!(config.scan_limit_percent, RetainConfig::v0().scan_limit_percent);
}

#[test]
fn round_trip_is_lossless() {
    let config = RetainConfig {
        prescan: true,
        window_pages: Some(3),
        ..RetainConfig::v0()
    };
    let raw = serde_json::to_string(&config).unwrap();
    assert_eq!(RetainConfig::from_json(&raw).unwrap(), config);
}

#[test]
fn invalid_values_are_rejected() {
    for raw in [
        r#"{ "scan_limit_percent": 101 }"#,
        r#"{ "window_pages": 0 }"#,
        r#"{ "poll_interval_ms": 0 }"#,
        r#"{ "max_scan_nodes": 0 }"#,
        r#"{ "significant_area": -1.0 }"#,
    ] {
        match RetainConfig::from_json(raw) {
            Err(ConfigError::Invalid(_)) => {}
            other => panic!("expected {raw} to be invalid, got {other:?}"),
        }
    }
    assert!(matches!(
        RetainConfig::from_json("{ not json"),
        Err(ConfigError::Parse(_))
    ));
}
