//! 탐지 어댑터 -- 룰을 게이트웨이 구독으로 설치하고 매칭을 보고합니다.
//!
//! [`WafAdapter::install`]은 룰의 입력 주소를 레지스트리로 검증하고,
//! 주소 집합(지문)별로 하나의 구독을 등록합니다. 구독 콜백은 어댑터 자신입니다.
//!
//! 평가 실패는 요청을 실패시키지 않습니다. 엔진 에러는 경고 로그 후
//! 해당 평가를 건너뛰고, 시간 예산 초과는 경고 후 부분 결과를 보고합니다.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, warn};

use warden_core::metrics as m;

use super::WafEngine;
use crate::context::ExecutionContext;
use crate::event::RuleInfo;
use crate::gateway::{Gateway, Subscriber, fingerprint};
use crate::reporter::Reporter;
use crate::rule::WafRule;

/// 어댑터 인스턴스 ID 발급기 (매처 상태 arena 키)
static NEXT_ADAPTER_ID: AtomicU64 = AtomicU64::new(1);

/// 게이트웨이와 탐지 엔진 사이의 어댑터
pub struct WafAdapter {
    id: u64,
    engine: Arc<dyn WafEngine>,
    rules: HashMap<String, RuleInfo>,
    reporter: Arc<Reporter>,
    timeout: Duration,
    subscriptions: AtomicUsize,
    skipped_rules: Vec<String>,
    evaluations: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
}

impl WafAdapter {
    /// 룰을 검증하고 지문별로 구독을 등록합니다.
    ///
    /// 레지스트리에 없는 주소를 참조하는 룰은 경고 후 건너뜁니다.
    pub fn install(
        gateway: &Gateway,
        rules: Vec<WafRule>,
        engine: Arc<dyn WafEngine>,
        reporter: Arc<Reporter>,
        timeout: Duration,
    ) -> Arc<Self> {
        let mut groups = BTreeSet::new();
        let mut infos = HashMap::with_capacity(rules.len());
        let mut skipped_rules = Vec::new();

        for rule in rules {
            match rule.addresses() {
                Ok(addresses) => {
                    groups.insert(addresses);
                    infos.insert(
                        rule.id.clone(),
                        RuleInfo {
                            id: rule.id,
                            name: rule.name,
                            tags: rule.tags,
                        },
                    );
                }
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "rule skipped");
                    skipped_rules.push(rule.id);
                }
            }
        }

        let adapter = Arc::new(Self {
            id: NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed),
            engine,
            rules: infos,
            reporter,
            timeout,
            subscriptions: AtomicUsize::new(0),
            skipped_rules,
            evaluations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        });

        let mut registered = 0;
        for addresses in &groups {
            let callback: Arc<dyn Subscriber> = adapter.clone();
            if gateway.add_subscription(addresses, callback) {
                registered += 1;
            } else {
                debug!(fingerprint = %fingerprint(addresses), "subscription already present");
            }
        }

        adapter.subscriptions.store(registered, Ordering::Relaxed);

        info!(
            engine = adapter.engine.name(),
            rules = adapter.rule_count(),
            subscriptions = adapter.subscription_count(),
            skipped = adapter.skipped_rules.len(),
            "waf adapter installed"
        );
        adapter
    }

    /// 설치된 룰 수
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 등록한 구독 수
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::Relaxed)
    }

    /// 건너뛴 룰 ID
    pub fn skipped_rules(&self) -> &[String] {
        &self.skipped_rules
    }

    /// 엔진 실행 수
    pub fn evaluation_count(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// 엔진 실행 실패 수
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// 시간 예산 초과 수
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// 컨텍스트의 현재 값으로 엔진을 실행하고 매칭을 보고합니다.
    pub fn evaluate(&self, ctx: &mut ExecutionContext) {
        let engine = Arc::clone(&self.engine);
        let (state, values) = ctx.matcher_state(self.id, || engine.new_context());
        let result = state.run(values, self.timeout);

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        counter!(m::APPSEC_WAF_EVALUATIONS_TOTAL).increment(1);

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                counter!(m::APPSEC_WAF_ERRORS_TOTAL).increment(1);
                warn!(context = ctx.key(), error = %e, "waf evaluation failed, skipping");
                return;
            }
        };

        if result.timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            counter!(m::APPSEC_WAF_TIMEOUTS_TOTAL).increment(1);
            warn!(
                context = ctx.key(),
                budget_us = self.timeout.as_micros() as u64,
                matches = result.matches.len(),
                "waf evaluation exceeded time budget"
            );
        }

        for matched in result.matches {
            let Some(rule) = self.rules.get(&matched.rule_id) else {
                warn!(rule_id = %matched.rule_id, "match for unknown rule, skipping");
                continue;
            };
            self.reporter
                .report_attack(ctx, rule.clone(), matched.conditions);
        }
    }
}

impl Subscriber for WafAdapter {
    fn invoke(&self, ctx: &mut ExecutionContext) {
        self.evaluate(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::backlog::Backlog;
    use crate::context::AddressMap;
    use crate::error::AppSecError;
    use crate::rule::RuleLoader;
    use crate::tracer::ServiceInfo;
    use crate::waf::{BuiltinWaf, MatchDescriptor, WafContext, WafMatch, WafResult};
    use serde_json::json;

    const RULES: &str = r#"
- id: scanner-ua
  name: Scanner
  conditions:
    - operator: phrase_match
      inputs: ["http.headers:user-agent"]
      value: [sqlmap]
- id: admin-post
  name: Admin POST
  conditions:
    - operator: equals
      inputs: [http.method]
      value: POST
    - operator: starts_with
      inputs: [http.url]
      value: /admin
- id: future
  name: Uses an address outside the registry
  conditions:
    - operator: contains
      inputs: [server.request.body]
      value: x
"#;

    fn reporter() -> Arc<Reporter> {
        Arc::new(Reporter::new(
            Arc::new(Backlog::new(100)),
            ServiceInfo::default(),
            None,
        ))
    }

    fn install(gateway: &Gateway, engine: Arc<dyn WafEngine>, reporter: Arc<Reporter>) -> Arc<WafAdapter> {
        let rules = RuleLoader::parse_yaml(RULES, "rules.yml").unwrap();
        WafAdapter::install(gateway, rules, engine, reporter, Duration::from_millis(5))
    }

    fn builtin() -> Arc<dyn WafEngine> {
        let rules = RuleLoader::parse_yaml(RULES, "rules.yml").unwrap();
        let (valid, _) = crate::rule::partition_by_registry(rules);
        Arc::new(BuiltinWaf::new(&valid).unwrap())
    }

    #[test]
    fn install_skips_unknown_addresses_and_groups_by_fingerprint() {
        let gateway = Gateway::new();
        let adapter = install(&gateway, builtin(), reporter());

        assert_eq!(adapter.rule_count(), 2);
        assert_eq!(adapter.skipped_rules(), ["future".to_owned()]);
        assert_eq!(adapter.subscription_count(), 2);
        assert_eq!(gateway.subscription_count(), 2);
    }

    #[test]
    fn match_is_reported_once_per_context() {
        let gateway = Gateway::new();
        let reporter = reporter();
        let adapter = install(&gateway, builtin(), Arc::clone(&reporter));

        let mut ctx = gateway.new_context();
        gateway
            .publish(&mut ctx, Address::HttpHeaders, json!({"user-agent": "sqlmap/1.0"}))
            .unwrap();
        gateway.publish(&mut ctx, Address::HttpMethod, json!("GET")).unwrap();
        gateway.publish(&mut ctx, Address::HttpUrl, json!("/")).unwrap();

        assert_eq!(adapter.evaluation_count(), 2);
        assert_eq!(reporter.backlog().len(), 1);
        assert_eq!(ctx.matcher_state_count(), 1);
    }

    struct FailingEngine;

    struct FailingContext;

    impl WafContext for FailingContext {
        fn run(&mut self, _: &AddressMap, _: Duration) -> Result<WafResult, AppSecError> {
            Err(AppSecError::Engine("native engine crashed".to_owned()))
        }
    }

    impl WafEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn new_context(&self) -> Box<dyn WafContext> {
            Box::new(FailingContext)
        }
    }

    #[test]
    fn engine_error_is_not_propagated() {
        let gateway = Gateway::new();
        let reporter = reporter();
        let adapter = install(&gateway, Arc::new(FailingEngine), Arc::clone(&reporter));

        let mut ctx = gateway.new_context();
        gateway.publish(&mut ctx, Address::HttpMethod, json!("POST")).unwrap();
        gateway.publish(&mut ctx, Address::HttpUrl, json!("/admin")).unwrap();

        assert_eq!(adapter.error_count(), 1);
        assert!(reporter.backlog().is_empty());
    }

    struct UnknownRuleEngine;

    struct UnknownRuleContext;

    impl WafContext for UnknownRuleContext {
        fn run(&mut self, _: &AddressMap, _: Duration) -> Result<WafResult, AppSecError> {
            Ok(WafResult {
                matches: vec![
                    WafMatch {
                        rule_id: "not-installed".to_owned(),
                        conditions: Vec::new(),
                    },
                    WafMatch {
                        rule_id: "admin-post".to_owned(),
                        conditions: vec![MatchDescriptor {
                            operator: "equals".to_owned(),
                            operator_value: "POST".to_owned(),
                            parameters: Vec::new(),
                            highlight: Vec::new(),
                        }],
                    },
                ],
                timed_out: true,
            })
        }
    }

    impl WafEngine for UnknownRuleEngine {
        fn name(&self) -> &str {
            "unknown-rule"
        }

        fn new_context(&self) -> Box<dyn WafContext> {
            Box::new(UnknownRuleContext)
        }
    }

    #[test]
    fn unknown_rule_skipped_and_timeout_reports_partial_results() {
        let gateway = Gateway::new();
        let reporter = reporter();
        let adapter = install(&gateway, Arc::new(UnknownRuleEngine), Arc::clone(&reporter));

        let mut ctx = gateway.new_context();
        gateway.publish(&mut ctx, Address::HttpMethod, json!("POST")).unwrap();
        gateway.publish(&mut ctx, Address::HttpUrl, json!("/admin")).unwrap();

        assert_eq!(adapter.timeout_count(), 1);
        let events = reporter.backlog().drain_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule.id, "admin-post");
        assert_eq!(events[0].rule.name, "Admin POST");
    }
}
