//! 통합 테스트 -- publish부터 배치 전송까지 전체 흐름 검증
//!
//! 수집기 대신 배치를 기록하는 mock 전송을 사용합니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use warden_appsec::error::AppSecError;
use warden_appsec::flush::FlushOutcome;
use warden_appsec::tracer::{APPSEC_EVENT_TAG, MANUAL_KEEP_TAG};
use warden_appsec::{
    Address, AppSec, AppSecBuilder, AppSecConfig, EventBatch, ExecutionContext, RuleLoader,
    TraceSpan, Transport, WafRule,
};
use warden_core::pipeline::{HealthStatus, Pipeline};

/// 배치를 기록하는 전송
#[derive(Default)]
struct MockTransport {
    delay: Duration,
    batches: Mutex<Vec<EventBatch>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn batches(&self) -> Vec<EventBatch> {
        self.batches.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn send_batch(&self, batch: &EventBatch) -> Result<(), AppSecError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.batches.lock().unwrap().push(batch.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 설정된 태그를 기록하는 span
struct RecordingSpan {
    tags: Mutex<Vec<(String, String)>>,
}

impl TraceSpan for RecordingSpan {
    fn span_id(&self) -> u64 {
        4242
    }

    fn trace_id(&self) -> u64 {
        9001
    }

    fn resource(&self) -> Option<String> {
        Some("GET /login".to_owned())
    }

    fn set_tag(&self, key: &str, value: &str) {
        self.tags
            .lock()
            .unwrap()
            .push((key.to_owned(), value.to_owned()));
    }
}

const RULES: &str = r#"
version: "2.1"
rules:
  - id: sqli-tautology
    name: SQL injection tautology
    tags: {type: sql_injection, category: attack_attempt}
    conditions:
      - operator: match_regex
        inputs: [http.url]
        value: "(?i)or\\s+1=1"
  - id: scanner-ua
    name: Security scanner
    tags: {type: security_scanner, category: attack_attempt}
    conditions:
      - operator: phrase_match
        inputs: ["http.headers:user-agent", http.user_agent]
        value: [sqlmap, nikto]
  - id: future-body
    name: Body inspection
    conditions:
      - operator: contains
        inputs: [server.request.body]
        value: "<script>"
"#;

fn rules() -> Vec<WafRule> {
    RuleLoader::parse_yaml(RULES, "recommended.yml").unwrap()
}

fn build(
    config: AppSecConfig,
    rules: Vec<WafRule>,
    transport: &Arc<MockTransport>,
) -> AppSec<Arc<MockTransport>> {
    AppSecBuilder::new()
        .config(config)
        .rules(rules)
        .transport(Arc::clone(transport))
        .build()
        .expect("failed to build appsec")
}

fn publish_attack(appsec: &AppSec<Arc<MockTransport>>, ctx: &mut ExecutionContext) {
    appsec
        .publish(ctx, Address::HttpMethod, json!("GET"))
        .unwrap();
    appsec
        .publish(ctx, Address::HttpUrl, json!("/login?user=admin' or 1=1--"))
        .unwrap();
}

/// 요청 사실은 정리되어 이벤트에 기록된다
#[tokio::test]
async fn test_reported_event_is_sanitized() {
    let transport = Arc::new(MockTransport::default());
    let appsec = build(AppSecConfig::default(), rules(), &transport);

    let mut ctx = appsec.new_context();
    appsec
        .publish(
            &mut ctx,
            Address::HttpHeaders,
            json!({
                "host": "shop.example.com",
                "user-agent": "Mozilla/5.0",
                "cookie": "session=secret",
                "authorization": "Bearer token",
                "x-forwarded-for": ["10.0.0.1", "10.0.0.2"]
            }),
        )
        .unwrap();
    appsec
        .publish(&mut ctx, Address::HttpClientIp, json!("203.0.113.9"))
        .unwrap();
    appsec
        .publish(&mut ctx, Address::HttpClientPort, json!(51234))
        .unwrap();
    publish_attack(&appsec, &mut ctx);

    let outcome = appsec.flush_now().await;
    assert_eq!(outcome, FlushOutcome::Sent { events: 1 });

    let batches = transport.batches();
    let event = &batches[0].events[0];
    assert_eq!(event.rule.id, "sqli-tautology");

    let request = &event.context.http.request;
    assert_eq!(request.url.as_deref(), Some("/login"));
    assert_eq!(request.method.as_deref(), Some("GET"));
    assert_eq!(request.remote_ip.as_deref(), Some("203.0.113.9"));
    assert_eq!(request.remote_port, Some(51234));
    assert!(request.headers.contains_key("host"));
    assert_eq!(request.headers["x-forwarded-for"].len(), 2);
    assert!(!request.headers.contains_key("cookie"));
    assert!(!request.headers.contains_key("authorization"));

    let wire = serde_json::to_string(&batches[0]).unwrap();
    assert!(!wire.contains("session=secret"));
    assert!(!wire.contains("Bearer"));
}

/// 레지스트리에 없는 주소를 쓰는 룰만 건너뛴다
#[tokio::test]
async fn test_unknown_address_rule_is_skipped() {
    let transport = Arc::new(MockTransport::default());
    let appsec = build(AppSecConfig::default(), rules(), &transport);

    assert!(appsec.detection_enabled());
    assert_eq!(appsec.rule_count(), 2);
    assert_eq!(appsec.skipped_rules(), ["future-body".to_owned()]);
}

/// 같은 주소 집합의 룰은 하나의 구독으로 합쳐진다
#[tokio::test]
async fn test_duplicate_address_sets_collapse() {
    let rules = RuleLoader::parse_yaml(
        r#"
- id: a
  name: A
  conditions:
    - operator: equals
      inputs: [http.method, http.url]
      value: DELETE
- id: b
  name: B
  conditions:
    - operator: contains
      inputs: [http.url, http.method]
      value: "/admin"
"#,
        "dup.yml",
    )
    .unwrap();
    let transport = Arc::new(MockTransport::default());
    let appsec = build(AppSecConfig::default(), rules, &transport);
    assert_eq!(appsec.gateway().subscription_count(), 1);

    let mut ctx = appsec.new_context();
    appsec
        .publish(&mut ctx, Address::HttpMethod, json!("DELETE"))
        .unwrap();
    appsec
        .publish(&mut ctx, Address::HttpUrl, json!("/admin/users"))
        .unwrap();
    assert_eq!(appsec.backlog_len(), 2);
}

/// 백로그가 가득 차면 새 이벤트는 버려진다
#[tokio::test]
async fn test_backlog_full_drops_new_events() {
    let config = AppSecConfig {
        max_backlog: 2,
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::default());
    let appsec = build(config, rules(), &transport);

    for _ in 0..3 {
        let mut ctx = appsec.new_context();
        publish_attack(&appsec, &mut ctx);
    }

    assert_eq!(appsec.backlog_len(), 2);
    assert_eq!(appsec.reporter().backlog().dropped_count(), 1);
    assert!(appsec.reporter().backlog().is_full());
}

/// span이 연결되면 trace 유지 태그와 식별자가 기록된다
#[tokio::test]
async fn test_span_is_tagged_and_linked() {
    let transport = Arc::new(MockTransport::default());
    let appsec = build(AppSecConfig::default(), rules(), &transport);

    let span = Arc::new(RecordingSpan {
        tags: Mutex::new(Vec::new()),
    });
    let mut ctx = ExecutionContext::with_span(span.clone());
    publish_attack(&appsec, &mut ctx);

    let tags = span.tags.lock().unwrap().clone();
    assert!(tags.contains(&(MANUAL_KEEP_TAG.to_owned(), "true".to_owned())));
    assert!(tags.contains(&(APPSEC_EVENT_TAG.to_owned(), "true".to_owned())));

    appsec.flush_now().await;
    let event = &transport.batches()[0].events[0];
    assert_eq!(event.context.span.id, Some(4242));
    assert_eq!(event.context.trace.id, Some(9001));
    assert_eq!(
        event.context.http.request.resource.as_deref(),
        Some("GET /login")
    );
}

/// 같은 주소를 두 번 publish 하면 에러
#[tokio::test]
async fn test_duplicate_publish_is_rejected() {
    let transport = Arc::new(MockTransport::default());
    let appsec = build(AppSecConfig::default(), rules(), &transport);

    let mut ctx = appsec.new_context();
    appsec
        .publish(&mut ctx, Address::HttpMethod, json!("GET"))
        .unwrap();
    let err = appsec
        .publish(&mut ctx, Address::HttpMethod, json!("POST"))
        .unwrap_err();
    assert!(err.to_string().contains("http.method"));
    assert_eq!(ctx.get(Address::HttpMethod), Some(&json!("GET")));
}

/// 디렉토리에서 룰을 읽어 파이프라인을 구성한다
#[tokio::test]
async fn test_rules_loaded_from_directory() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    std::fs::write(dir.path().join("10-base.yml"), RULES).unwrap();
    std::fs::write(
        dir.path().join("20-extra.json"),
        r#"[{"id": "trace-method", "name": "TRACE", "conditions": [
            {"operator": "equals", "inputs": ["http.method"], "value": "TRACE"}]}]"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

    let rules = RuleLoader::load_directory(dir.path()).await.unwrap();
    assert_eq!(rules.len(), 4);

    let transport = Arc::new(MockTransport::default());
    let appsec = build(AppSecConfig::default(), rules, &transport);
    assert_eq!(appsec.rule_count(), 3);

    let mut ctx = appsec.new_context();
    appsec
        .publish(&mut ctx, Address::HttpMethod, json!("TRACE"))
        .unwrap();
    assert_eq!(appsec.backlog_len(), 1);
}

/// 시작 후 주기 플러시가 동작하고 정지 시 남은 이벤트를 보낸다
#[tokio::test(start_paused = true)]
async fn test_lifecycle_with_periodic_flush() {
    let config = AppSecConfig {
        flush_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::default());
    let mut appsec = build(config, rules(), &transport);

    assert!(matches!(
        appsec.health_check().await,
        HealthStatus::Unhealthy(_)
    ));
    appsec.start().await.unwrap();
    assert!(appsec.scheduler().is_running());
    assert!(appsec.health_check().await.is_healthy());

    let mut ctx = appsec.new_context();
    publish_attack(&appsec, &mut ctx);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.batches().len(), 1);
    assert_eq!(appsec.backlog_len(), 0);

    let mut ctx = appsec.new_context();
    publish_attack(&appsec, &mut ctx);

    appsec.stop().await.unwrap();
    assert!(!appsec.scheduler().is_running());
    assert_eq!(transport.batches().len(), 2);
    assert!(appsec.stop().await.is_err());
}

/// 느린 전송 중에도 배치는 겹치지 않고 이벤트는 유실되지 않는다
#[tokio::test(start_paused = true)]
async fn test_slow_transport_never_overlaps() {
    let config = AppSecConfig {
        flush_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(175)));
    let mut appsec = build(config, rules(), &transport);
    appsec.start().await.unwrap();

    for _ in 0..20 {
        let mut ctx = appsec.new_context();
        publish_attack(&appsec, &mut ctx);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    appsec.stop().await.unwrap();
    // 진행 중이던 전송 완료 대기
    tokio::time::sleep(Duration::from_millis(500)).await;

    let sent: usize = transport.batches().iter().map(EventBatch::len).sum();
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(sent + appsec.backlog_len(), 20);
}

/// 엔진 로드 실패 시 요청 처리는 계속되고 상태는 저하로 보고된다
#[tokio::test]
async fn test_engine_failure_degrades_but_serves() {
    let rules = RuleLoader::parse_yaml(
        r#"
- id: broken
  name: Broken pattern
  conditions:
    - operator: match_regex
      inputs: [http.url]
      value: "(unclosed"
"#,
        "broken.yml",
    )
    .unwrap();
    let transport = Arc::new(MockTransport::default());
    let mut appsec = build(AppSecConfig::default(), rules, &transport);
    assert!(!appsec.detection_enabled());

    appsec.start().await.unwrap();
    let mut ctx = appsec.new_context();
    publish_attack(&appsec, &mut ctx);
    assert_eq!(appsec.backlog_len(), 0);
    assert!(matches!(
        appsec.health_check().await,
        HealthStatus::Degraded(_)
    ));
    appsec.stop().await.unwrap();
}

/// 정규식이 잘못된 룰은 그 룰만 빠지고 나머지 탐지는 동작한다
#[tokio::test]
async fn test_bad_regex_rule_keeps_valid_rules_active() {
    let rules = RuleLoader::parse_yaml(
        r#"
- id: trace-method
  name: TRACE method
  conditions:
    - operator: equals
      inputs: [http.method]
      value: TRACE
- id: broken
  name: Broken pattern
  conditions:
    - operator: match_regex
      inputs: [http.url]
      value: "(unclosed"
"#,
        "mixed.yml",
    )
    .unwrap();
    let transport = Arc::new(MockTransport::default());
    let appsec = build(AppSecConfig::default(), rules, &transport);
    assert!(appsec.detection_enabled());
    assert_eq!(appsec.rule_count(), 1);

    let mut ctx = appsec.new_context();
    appsec
        .publish(&mut ctx, Address::HttpMethod, json!("TRACE"))
        .unwrap();
    assert_eq!(appsec.backlog_len(), 1);

    appsec.flush_now().await;
    assert_eq!(transport.batches()[0].events[0].rule.id, "trace-method");
}
