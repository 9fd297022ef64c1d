//! 이벤트 리포터 -- 매칭 결과를 공격 이벤트로 만들어 백로그에 기록합니다.
//!
//! 요청 사실(메서드, URL, 원격 주소, 허용 목록 헤더)은 실행 컨텍스트에서
//! 가져옵니다. 값이 없으면 이벤트에서 생략될 뿐 에러가 되지 않습니다.
//!
//! 컨텍스트에 span이 연결되어 있으면 trace를 유지하도록 태그를 설정하고
//! span/trace ID를 이벤트에 기록합니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use serde_json::Value;
use tracing::{debug, info};

use warden_core::metrics as m;

use crate::address::Address;
use crate::backlog::Backlog;
use crate::context::ExecutionContext;
use crate::event::{
    AttackEvent, EventContext, HostContext, HttpContext, HttpRequestContext, RuleInfo,
    ServiceContext, SpanContext, TagsContext, TraceContext,
};
use crate::tracer::{APPSEC_EVENT_TAG, MANUAL_KEEP_TAG, ServiceInfo};
use crate::waf::MatchDescriptor;

/// 이벤트에 기록하는 요청 헤더 (소문자)
pub const HEADER_ALLOW_LIST: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "content-length",
    "content-type",
    "forwarded",
    "forwarded-for",
    "host",
    "referer",
    "true-client-ip",
    "user-agent",
    "via",
    "x-client-ip",
    "x-cluster-client-ip",
    "x-forwarded",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
];

/// 공격 이벤트 리포터
pub struct Reporter {
    backlog: Arc<Backlog>,
    service: ServiceInfo,
    hostname: Option<String>,
}

impl Reporter {
    /// 새 리포터를 생성합니다.
    pub fn new(backlog: Arc<Backlog>, service: ServiceInfo, hostname: Option<String>) -> Self {
        Self {
            backlog,
            service,
            hostname,
        }
    }

    /// 공유 백로그를 반환합니다.
    pub fn backlog(&self) -> &Arc<Backlog> {
        &self.backlog
    }

    /// 공격 이벤트를 만들어 백로그에 기록합니다.
    ///
    /// 백로그가 가득 찼으면 아무것도 만들지 않고 `None`을 반환합니다.
    pub fn report_attack(
        &self,
        ctx: &ExecutionContext,
        rule: RuleInfo,
        rule_match: Vec<MatchDescriptor>,
    ) -> Option<AttackEvent> {
        if self.backlog.is_full() {
            self.reject(&rule.id);
            return None;
        }

        let mut context = EventContext {
            host: HostContext {
                hostname: self.hostname.clone(),
                ..HostContext::default()
            },
            http: HttpContext {
                request: request_facts(ctx),
                ..HttpContext::default()
            },
            service: ServiceContext {
                name: self.service.name.clone(),
                environment: self.service.environment.clone(),
                version: self.service.version.clone(),
                ..ServiceContext::default()
            },
            tags: TagsContext {
                values: self.service.tags.clone(),
                ..TagsContext::default()
            },
            ..EventContext::default()
        };

        if let Some(span) = ctx.span() {
            context.span = SpanContext {
                id: Some(span.span_id()),
                ..SpanContext::default()
            };
            context.trace = TraceContext {
                id: Some(span.trace_id()),
                ..TraceContext::default()
            };
            context.http.request.resource = span.resource();
        }

        let event = AttackEvent::new(rule, rule_match, context);
        if !self.backlog.try_push(event.clone()) {
            self.reject(&event.rule.id);
            return None;
        }

        // 백로그에 들어간 이벤트가 있을 때만 trace 유지
        if let Some(span) = ctx.span() {
            span.set_tag(MANUAL_KEEP_TAG, "true");
            span.set_tag(APPSEC_EVENT_TAG, "true");
        }

        counter!(m::APPSEC_EVENTS_REPORTED_TOTAL).increment(1);
        gauge!(m::APPSEC_BACKLOG_SIZE).set(self.backlog.len() as f64);
        info!(
            rule_id = %event.rule.id,
            event_id = %event.event_id,
            context = ctx.key(),
            "attack detected"
        );
        Some(event)
    }

    fn reject(&self, rule_id: &str) {
        self.backlog.record_rejected();
        counter!(m::APPSEC_EVENTS_DROPPED_TOTAL).increment(1);
        debug!(
            rule_id,
            capacity = self.backlog.capacity(),
            "backlog full, attack event dropped"
        );
    }
}

/// 컨텍스트에서 요청 사실을 수집합니다.
fn request_facts(ctx: &ExecutionContext) -> HttpRequestContext {
    HttpRequestContext {
        method: ctx.get(Address::HttpMethod).and_then(as_string),
        url: ctx
            .get(Address::HttpUrl)
            .and_then(Value::as_str)
            .map(strip_query),
        resource: None,
        remote_ip: ctx.get(Address::HttpClientIp).and_then(as_string),
        remote_port: ctx.get(Address::HttpClientPort).and_then(as_port),
        headers: ctx
            .get(Address::HttpHeaders)
            .map(allowed_headers)
            .unwrap_or_default(),
    }
}

/// 쿼리 문자열과 프래그먼트를 제거합니다.
pub fn strip_query(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].to_owned()
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// 허용 목록에 있는 헤더만 소문자 이름으로 모읍니다.
fn allowed_headers(headers: &Value) -> BTreeMap<String, Vec<String>> {
    let Value::Object(map) = headers else {
        return BTreeMap::new();
    };

    map.iter()
        .filter_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            if !HEADER_ALLOW_LIST.contains(&name.as_str()) {
                return None;
            }
            let values: Vec<String> = match value {
                Value::Array(items) => items.iter().filter_map(as_string).collect(),
                other => as_string(other).into_iter().collect(),
            };
            (!values.is_empty()).then_some((name, values))
        })
        .collect()
}
