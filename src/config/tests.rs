use clap::Parser;

use super::*;

fn raw_with_backend() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.backend.host = Some("shop.example.com".to_string());
    raw
}

#[test]
fn defaults_follow_documented_values() {
    let settings = Settings::from_raw(raw_with_backend()).expect("valid settings");

    assert_eq!(settings.server.addr.to_string(), "127.0.0.1:8080");
    assert_eq!(
        settings.backend.base_url.as_str(),
        "https://shop.example.com/"
    );
    assert_eq!(settings.backend.timeout, Duration::from_secs(30));
    assert_eq!(settings.backend.pool_max_idle_per_host, 10);
    assert_eq!(settings.backend.pool_idle_timeout, Duration::from_secs(90));
    assert!(!settings.cache.local_enabled);
    assert!(settings.cache.stale_enabled);
    assert!(settings.cache.force_https);
    assert_eq!(settings.cache.fresh_ttl, Duration::from_secs(60));
    assert_eq!(settings.cache.stale_ttl, Duration::from_secs(432_000));
    assert_eq!(settings.cache.vary_cookie, "X-Magento-Vary");
    assert_eq!(settings.cache.excluded_prefixes.len(), 5);
    assert_eq!(settings.remote.url, None);
    assert_eq!(settings.remote.key_prefix, "");
    assert_eq!(settings.admission.rate_per_second.get(), 250);
    assert_eq!(settings.admission.burst.get(), 500);
    assert!(settings.admin.uses_default_secret());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = raw_with_backend();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.local_enabled = Some(false);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        cache_local_enabled: Some(true),
        backend_host: Some("origin.internal:8443".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(settings.cache.local_enabled);
    assert_eq!(
        settings.backend.base_url.as_str(),
        "https://origin.internal:8443/"
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = raw_with_backend();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn backend_host_is_required() {
    let err = Settings::from_raw(RawSettings::default()).expect_err("missing host");
    assert!(matches!(err, LoadError::Invalid { key: "backend.host", .. }));

    let mut blank = RawSettings::default();
    blank.backend.host = Some("   ".to_string());
    assert!(Settings::from_raw(blank).is_err());
}

#[test]
fn backend_scheme_and_host_are_validated() {
    let mut raw = raw_with_backend();
    raw.backend.scheme = Some("ftp".to_string());
    let err = Settings::from_raw(raw).expect_err("bad scheme");
    assert!(matches!(err, LoadError::Invalid { key: "backend.scheme", .. }));

    let mut raw = RawSettings::default();
    raw.backend.host = Some("shop.example.com/base".to_string());
    let err = Settings::from_raw(raw).expect_err("host with path");
    assert!(matches!(err, LoadError::Invalid { key: "backend.host", .. }));

    let mut raw = raw_with_backend();
    raw.backend.scheme = Some("HTTP".to_string());
    let settings = Settings::from_raw(raw).expect("scheme is case-insensitive");
    assert_eq!(settings.backend.base_url.scheme(), "http");
}

#[test]
fn zero_limits_are_rejected() {
    let mut raw = raw_with_backend();
    raw.admission.rate_per_second = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero rate");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "admission.rate_per_second",
            ..
        }
    ));

    let mut raw = raw_with_backend();
    raw.cache.fresh_ttl_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = raw_with_backend();
    raw.cache.max_entries = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cache_strings_are_normalized() {
    let mut raw = raw_with_backend();
    raw.cache.key_host = Some("  ".to_string());
    raw.cache.vary_cookie = Some(String::new());
    raw.remote.url = Some(" redis://127.0.0.1:6379/11 ".to_string());
    raw.remote.hash_field = Some("d".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.key_host, None);
    assert_eq!(settings.cache.vary_cookie, "X-Magento-Vary");
    assert_eq!(
        settings.remote.url.as_deref(),
        Some("redis://127.0.0.1:6379/11")
    );
    assert_eq!(settings.remote.hash_field.as_deref(), Some("d"));
}

#[test]
fn exclusion_prefixes_must_be_paths() {
    let mut raw = raw_with_backend();
    raw.cache.excluded_prefixes = Some(vec!["admin".to_string()]);
    let err = Settings::from_raw(raw).expect_err("relative prefix");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.excluded_prefixes",
            ..
        }
    ));
}

#[test]
fn empty_admin_secret_is_rejected() {
    let mut raw = raw_with_backend();
    raw.admin.secret_key = Some(" ".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = raw_with_backend();
    raw.admin.secret_key = Some("s3cret".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.admin.uses_default_secret());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["fastcache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "fastcache",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--backend-host",
        "shop.example.com",
        "--cache-local-enabled",
        "true",
        "--remote-url",
        "redis://cache:6379/11",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.backend_host.as_deref(),
                Some("shop.example.com")
            );
            assert_eq!(serve.overrides.cache_local_enabled, Some(true));
            assert_eq!(
                serve.overrides.remote_url.as_deref(),
                Some("redis://cache:6379/11")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_key_arguments() {
    let args = CliArgs::parse_from([
        "fastcache",
        "key",
        "--url",
        "https://shop.example.com/women.html",
        "--vary",
        "abc123",
        "--https",
    ]);

    match args.command.expect("key command") {
        Command::Key(key) => {
            assert_eq!(key.url, "https://shop.example.com/women.html");
            assert_eq!(key.vary.as_deref(), Some("abc123"));
            assert!(key.https);
        }
        _ => panic!("wrong command parsed"),
    }
}

fn raw_from_env(vars: &[(&str, &str)]) -> Result<RawSettings, LoadError> {
    let vars: config::Map<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    Ok(Config::builder()
        .add_source(environment_source().source(Some(vars)))
        .build()?
        .try_deserialize()?)
}

#[test]
fn env_lists_are_comma_split_and_scalars_stay_typed() {
    let raw = raw_from_env(&[
        ("FASTCACHE__BACKEND__HOST", "shop.example.com"),
        ("FASTCACHE__CACHE__EXCLUDED_PREFIXES", "/a,/b"),
        ("FASTCACHE__CACHE__STATIC_EXTENSIONS", "css,woff2"),
        ("FASTCACHE__CACHE__LOCAL_ENABLED", "true"),
        ("FASTCACHE__CACHE__FRESH_TTL_SECONDS", "120"),
        ("FASTCACHE__SERVER__PORT", "9090"),
        ("FASTCACHE__ADMIN__SECRET_KEY", "12345"),
        ("FASTCACHE__REMOTE__KEY_PREFIX", "zc:k:"),
    ])
    .expect("environment deserializes");

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.excluded_prefixes, ["/a", "/b"]);
    assert_eq!(settings.cache.static_extensions, ["css", "woff2"]);
    assert!(settings.cache.local_enabled);
    assert_eq!(settings.cache.fresh_ttl, Duration::from_secs(120));
    assert_eq!(settings.server.addr.port(), 9090);
    assert_eq!(settings.admin.secret_key, "12345");
    assert_eq!(settings.remote.key_prefix, "zc:k:");
}

#[test]
fn single_env_list_value_is_a_one_item_list() {
    let raw = raw_from_env(&[("FASTCACHE__CACHE__EXCLUDED_PREFIXES", "/checkout")])
        .expect("environment deserializes");

    assert_eq!(raw.cache.excluded_prefixes, Some(vec!["/checkout".to_string()]));
}

#[test]
fn inflate_limits_default_and_reject_zero() {
    let settings = Settings::from_raw(raw_with_backend()).expect("valid settings");
    assert_eq!(settings.backend.max_response_bytes, 64 * 1024 * 1024);
    assert_eq!(settings.remote.max_value_bytes, 64 * 1024 * 1024);

    let mut raw = raw_with_backend();
    raw.backend.max_response_bytes = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero response limit");
    assert!(matches!(err, LoadError::Invalid { key: "backend.max_response_bytes", .. }));

    let mut raw = raw_with_backend();
    raw.remote.max_value_bytes = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero value limit");
    assert!(matches!(err, LoadError::Invalid { key: "remote.max_value_bytes", .. }));

    let mut raw = raw_with_backend();
    raw.backend.max_response_bytes = Some(2048);
    raw.remote.max_value_bytes = Some(4096);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.backend.max_response_bytes, 2048);
    assert_eq!(settings.remote.max_value_bytes, 4096);
}
