//! Configuration loading from TOML files and environment overrides.

use std::io::Write;
use std::time::Duration;

use temandifa_core::OperationKind;
use temandifa_gateway::config::loader::load_config;
use temandifa_store::StoreFallback;

const SECRET_LINE: &str = "signing_secret = \"0123456789abcdef0123456789abcdef\"";

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_file_values_override_defaults() {
    let file = write_config(&format!(
        r#"
[logging]
level = "debug"

[redis]
enabled = false
fallback = "none"

[cache.ttl]
ocr = "3h"

[breaker.defaults]
failure_ratio = 0.5

[breaker.overrides.vqa]
open_timeout = "2m"

[rate_limit.public]
limit = 120
window = "30s"

[auth]
{SECRET_LINE}
access_token_lifetime = "10m"
revocation_check = "fail_open"

[shutdown]
grace = "2s"
"#
    ));

    let cfg = load_config(file.path().to_str()).unwrap();

    assert_eq!(cfg.logging.level, "debug");
    assert!(!cfg.redis.enabled);
    assert_eq!(cfg.redis.fallback, StoreFallback::None);
    assert_eq!(cfg.cache.ttl.ocr, Duration::from_secs(3 * 60 * 60));
    assert_eq!(cfg.cache.ttl.vqa, Duration::from_secs(24 * 60 * 60));

    let vqa = cfg.breaker.config_for(OperationKind::Vqa);
    assert_eq!(vqa.policy.open_timeout, Duration::from_secs(120));
    assert!((vqa.policy.failure_ratio - 0.5).abs() < f64::EPSILON);
    assert_eq!(vqa.call_timeout, Duration::from_secs(90));
    let detect = cfg.breaker.config_for(OperationKind::Detect);
    assert_eq!(detect.policy.open_timeout, Duration::from_secs(30));

    assert_eq!(cfg.rate_limit.public.limit, 120);
    assert_eq!(cfg.rate_limit.public.window, Duration::from_secs(30));
    assert_eq!(cfg.auth.access_token_lifetime, Duration::from_secs(600));
    assert_eq!(cfg.auth.issuer, "temandifa");
    assert_eq!(cfg.shutdown.grace, Duration::from_secs(2));
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(&format!(
        r#"
[rate_limit.authenticated]
limit = 10

[auth]
{SECRET_LINE}
"#
    ));

    // Only this test touches these variables.
    unsafe {
        std::env::set_var("TEMANDIFA__RATE_LIMIT__AUTHENTICATED__LIMIT", "25");
        std::env::set_var("TEMANDIFA__RATE_LIMIT__AUTHENTICATED__WINDOW", "90s");
    }
    let result = load_config(file.path().to_str());
    unsafe {
        std::env::remove_var("TEMANDIFA__RATE_LIMIT__AUTHENTICATED__LIMIT");
        std::env::remove_var("TEMANDIFA__RATE_LIMIT__AUTHENTICATED__WINDOW");
    }

    let cfg = result.unwrap();
    assert_eq!(cfg.rate_limit.authenticated.limit, 25);
    assert_eq!(cfg.rate_limit.authenticated.window, Duration::from_secs(90));
}

#[test]
fn test_short_secret_is_rejected() {
    let file = write_config("[auth]\nsigning_secret = \"too-short\"\n");
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(err.contains("signing_secret"), "unexpected error: {err}");
}

#[test]
fn test_invalid_breaker_ratio_is_rejected() {
    let file = write_config(&format!(
        "[breaker.overrides.ocr]\nfailure_ratio = 0.0\n\n[auth]\n{SECRET_LINE}\n"
    ));
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(err.contains("failure_ratio"), "unexpected error: {err}");
}

#[test]
fn test_malformed_duration_is_rejected() {
    let file = write_config(&format!("[shutdown]\ngrace = \"soon\"\n\n[auth]\n{SECRET_LINE}\n"));
    assert!(load_config(file.path().to_str()).is_err());
}

#[test]
fn test_out_of_range_durations_are_rejected() {
    let file = write_config(&format!(
        "[rate_limit.public]\nlimit = 5\nwindow = \"20000y\"\n\n[auth]\n{SECRET_LINE}\n"
    ));
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(err.contains("rate_limit.public.window"), "unexpected error: {err}");

    let file = write_config(&format!("[auth]\n{SECRET_LINE}\nrefresh_token_lifetime = \"400d\"\n"));
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(err.contains("refresh_token_lifetime"), "unexpected error: {err}");
}
