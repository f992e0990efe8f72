//! The gateway assembled over an in-memory store: admission, inference with
//! caching and breakers, logout and shutdown.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use temandifa_auth::DeviceMeta;
use temandifa_core::OperationKind;
use temandifa_core::metrics::{self, names};
use temandifa_gateway::{
    AppConfig, BackendError, Gateway, GatewayError, InferenceBackend, InferenceRequest,
};
use temandifa_resilience::{CircuitState, LimitScope};
use temandifa_store::MemoryStore;

/// Backend that fails every call for one kind and echoes the input otherwise.
#[derive(Default)]
struct FlakyBackend {
    failing: Option<OperationKind>,
    calls: AtomicUsize,
}

impl FlakyBackend {
    fn failing(kind: OperationKind) -> Self {
        Self {
            failing: Some(kind),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for FlakyBackend {
    async fn infer(&self, request: &InferenceRequest) -> Result<Vec<u8>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing == Some(request.kind) {
            return Err(BackendError::unavailable("connection refused"));
        }
        Ok(format!("{}:{}", request.kind, request.input.len()).into_bytes())
    }
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.signing_secret = "0123456789abcdef0123456789abcdef".into();
    cfg
}

fn gateway(cfg: AppConfig) -> Gateway {
    Gateway::with_store(cfg, MemoryStore::new_shared()).unwrap()
}

/// Wait for background cache writes to land.
async fn settle(gateway: &Gateway) {
    for _ in 0..100 {
        if gateway.cache().pending_writes() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache writes did not finish");
}

#[tokio::test]
async fn test_identical_input_reaches_backend_once() {
    let gateway = gateway(config());
    let backend = Arc::new(FlakyBackend::default());
    let inference = gateway.inference(backend.clone());
    let image = vec![7u8; 4096];

    let first = inference.run(&InferenceRequest::detect(image.clone())).await.unwrap();
    assert!(!first.cached);
    settle(&gateway).await;

    let second = inference.run(&InferenceRequest::detect(image.clone())).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.payload, first.payload);
    assert_eq!(backend.calls(), 1);

    // Same bytes under another operation are a different result.
    inference.run(&InferenceRequest::transcribe(image)).await.unwrap();
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_failing_dependency_trips_only_its_breaker() {
    let gateway = gateway(config());
    let backend = Arc::new(FlakyBackend::failing(OperationKind::Vqa));
    let inference = gateway.inference(backend.clone());

    for i in 0..5u8 {
        let err = inference
            .run(&InferenceRequest::vqa(vec![i], "what is this?"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DownstreamFailure { .. }), "got {err:?}");
        assert_eq!(err.status_code(), 502);
    }
    assert_eq!(gateway.breakers().state(OperationKind::Vqa), CircuitState::Open);

    let err = inference
        .run(&InferenceRequest::vqa(vec![9], "and this?"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BreakerOpen { kind: OperationKind::Vqa, .. }));
    assert_eq!(err.status_code(), 503);
    assert!(err.retry_after().is_some_and(|d| d > Duration::ZERO));
    assert_eq!(backend.calls(), 5, "open breaker must not call the backend");

    // Other operations are unaffected.
    let detect = inference.run(&InferenceRequest::detect(vec![1, 2, 3])).await.unwrap();
    assert!(!detect.cached);
    assert_eq!(gateway.breakers().state(OperationKind::Detect), CircuitState::Closed);

    // Failures are never cached.
    settle(&gateway).await;
    assert_eq!(tokio_test::assert_ok!(gateway.cache().clear_by_prefix("vqa").await), 0);
}

#[tokio::test]
async fn test_public_rate_limit_rejects_with_headers() {
    let mut cfg = config();
    cfg.rate_limit.public.limit = 3;
    let gateway = gateway(cfg);

    for _ in 0..3 {
        gateway.admission().admit_public("10.0.0.1").await.unwrap();
    }
    let err = gateway.admission().admit_public("10.0.0.1").await.unwrap_err();
    assert_eq!(err.status_code(), 429);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    let GatewayError::RateLimited { scope, headers, .. } = err else {
        panic!("expected rate limit rejection");
    };
    assert_eq!(scope, LimitScope::Public);
    assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
    assert!(headers.contains(&("Retry-After", "60".to_string())));

    // Another client has its own window.
    gateway.admission().admit_public("10.0.0.2").await.unwrap();
}

#[tokio::test]
async fn test_inference_admission_is_per_user() {
    let mut cfg = config();
    cfg.rate_limit.authenticated.limit = 2;
    let gateway = gateway(cfg);
    let pair = gateway.tokens().issue_pair("user-1", &DeviceMeta::default()).await.unwrap();
    let header = format!("Bearer {}", pair.access_token);

    let admitted = gateway
        .admission()
        .admit_inference("10.0.0.1", Some(&header))
        .await
        .unwrap();
    assert_eq!(admitted.user_id, "user-1");
    assert_eq!(admitted.rate.remaining, 1);

    // Same user from another address shares the authenticated budget.
    gateway.admission().admit_inference("10.0.0.2", Some(&header)).await.unwrap();
    let err = gateway
        .admission()
        .admit_inference("10.0.0.3", Some(&header))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::RateLimited {
            scope: LimitScope::Authenticated,
            ..
        }
    ));

    let err = gateway.admission().admit_user("10.0.0.1", None).await.unwrap_err();
    assert!(matches!(err, GatewayError::MissingCredentials));
}

#[tokio::test]
async fn test_logged_out_token_is_refused() {
    let gateway = gateway(config());
    let pair = gateway.tokens().issue_pair("user-2", &DeviceMeta::default()).await.unwrap();
    let header = format!("Bearer {}", pair.access_token);
    gateway.admission().admit_user("10.0.0.1", Some(&header)).await.unwrap();

    gateway
        .tokens()
        .logout(&pair.refresh_token, &pair.access_token)
        .await
        .unwrap();

    let err = gateway
        .admission()
        .admit_user("10.0.0.1", Some(&header))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(err.error_code(), "token_revoked");
}

#[tokio::test]
async fn test_shutdown_drains_background_work() {
    let gateway = gateway(config());
    gateway.start();

    let inference = gateway.inference(Arc::new(FlakyBackend::default()));
    inference.run(&InferenceRequest::ocr(vec![1; 64], "eng")).await.unwrap();

    let outcome = gateway.shutdown().await;
    assert!(outcome.completed);
    assert_eq!(outcome.abandoned, 0);
    assert_eq!(gateway.cache().pending_writes(), 0);

    // The write made before shutdown is readable.
    let key = gateway
        .cache()
        .fingerprint("ocr", &InferenceRequest::ocr(vec![1; 64], "eng").fingerprint_parts());
    assert!(gateway.cache().get(&key).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_idle_rate_windows_are_reclaimed() {
    let mut cfg = config();
    cfg.rate_limit.public.window = Duration::from_secs(1);
    cfg.redis.memory_sweep_interval_ms = 500;
    let store = MemoryStore::new_shared();
    let gateway = Gateway::with_store(cfg, store.clone()).unwrap();
    gateway.start();

    for i in 0..300 {
        let ip = format!("10.1.{}.{}", i / 250, i % 250);
        gateway.admission().admit_public(&ip).await.unwrap();
    }
    assert_eq!(store.held_entries(), 300);

    // Nobody comes back; the sweep drops every expired window.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(store.held_entries(), 0);

    assert!(gateway.shutdown().await.completed);
}

#[tokio::test]
async fn test_metrics_exposition() {
    metrics::init_metrics();
    let gateway = gateway(config());
    let inference = gateway.inference(Arc::new(FlakyBackend::default()));
    inference.run(&InferenceRequest::detect(vec![5; 32])).await.unwrap();

    let text = gateway.metrics_text().expect("recorder installed");
    assert!(text.contains(names::CACHE_MISSES_TOTAL), "{text}");
}
