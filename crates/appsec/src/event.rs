//! 공격 이벤트 -- 수집기로 전송되는 탐지 결과
//!
//! 이벤트는 생성 후 변경되지 않습니다. 선택적 값은 직렬화 시 생략되지만,
//! 문서화된 하위 객체(`host`, `http`, `library`, `service`, `span`, `tags`, `trace`)는
//! 항상 존재합니다.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::waf::MatchDescriptor;

/// 이벤트 타입
pub const EVENT_TYPE: &str = "appsec";
/// 이벤트 스키마 버전
pub const EVENT_VERSION: &str = "1.0.0";
/// `http` 컨텍스트 버전
pub const HTTP_CONTEXT_VERSION: &str = "1.0.0";
/// 그 외 컨텍스트 버전
pub const CONTEXT_VERSION: &str = "0.1.0";
/// 런타임 종류
pub const RUNTIME_TYPE: &str = "rust";

/// 이벤트에 기록되는 룰 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    /// 룰 ID
    pub id: String,
    /// 룰 이름
    pub name: String,
    /// 룰 태그
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// 공격 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackEvent {
    /// 이벤트 고유 ID (UUID v4)
    pub event_id: String,
    /// 이벤트 타입 (`appsec`)
    pub event_type: String,
    /// 이벤트 스키마 버전
    pub event_version: String,
    /// 탐지 시각
    pub detected_at: DateTime<Utc>,
    /// 매칭된 룰
    pub rule: RuleInfo,
    /// 조건별 매칭 상세
    pub rule_match: Vec<MatchDescriptor>,
    /// 요청, 서비스, tracer 컨텍스트
    pub context: EventContext,
}

impl AttackEvent {
    /// 새 이벤트를 생성합니다. ID와 탐지 시각이 할당됩니다.
    pub fn new(rule: RuleInfo, rule_match: Vec<MatchDescriptor>, context: EventContext) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: EVENT_TYPE.to_owned(),
            event_version: EVENT_VERSION.to_owned(),
            detected_at: Utc::now(),
            rule,
            rule_match,
            context,
        }
    }
}

/// 이벤트 컨텍스트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub host: HostContext,
    pub http: HttpContext,
    pub library: LibraryContext,
    pub service: ServiceContext,
    pub span: SpanContext,
    pub tags: TagsContext,
    pub trace: TraceContext,
}

/// 호스트 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostContext {
    pub context_version: String,
    pub os_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Default for HostContext {
    fn default() -> Self {
        Self {
            context_version: CONTEXT_VERSION.to_owned(),
            os_type: std::env::consts::OS.to_owned(),
            hostname: None,
        }
    }
}

/// HTTP 요청 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpContext {
    pub context_version: String,
    pub request: HttpRequestContext,
}

impl Default for HttpContext {
    fn default() -> Self {
        Self {
            context_version: HTTP_CONTEXT_VERSION.to_owned(),
            request: HttpRequestContext::default(),
        }
    }
}

/// 요청 사실
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// 쿼리 문자열과 프래그먼트가 제거된 URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    /// 허용 목록 헤더 (소문자 이름 -> 값 목록)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
}

/// 라이브러리 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryContext {
    pub context_version: String,
    pub runtime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    pub lib_version: String,
}

impl Default for LibraryContext {
    fn default() -> Self {
        Self {
            context_version: CONTEXT_VERSION.to_owned(),
            runtime_type: RUNTIME_TYPE.to_owned(),
            runtime_version: option_env!("CARGO_PKG_RUST_VERSION")
                .filter(|v| !v.is_empty())
                .map(str::to_owned),
            lib_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// 서비스 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContext {
    pub context_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for ServiceContext {
    fn default() -> Self {
        Self {
            context_version: CONTEXT_VERSION.to_owned(),
            name: None,
            environment: None,
            version: None,
        }
    }
}

/// span 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    pub context_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Default for SpanContext {
    fn default() -> Self {
        Self {
            context_version: CONTEXT_VERSION.to_owned(),
            id: None,
        }
    }
}

/// 전역 태그
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsContext {
    pub context_version: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Default for TagsContext {
    fn default() -> Self {
        Self {
            context_version: CONTEXT_VERSION.to_owned(),
            values: Vec::new(),
        }
    }
}

/// trace 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub context_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Default for TraceContext {
    fn default() -> Self {
        Self {
            context_version: CONTEXT_VERSION.to_owned(),
            id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waf::MatchParameter;

    fn sample_event() -> AttackEvent {
        AttackEvent::new(
            RuleInfo {
                id: "crs-913-110".to_owned(),
                name: "Acunetix".to_owned(),
                tags: BTreeMap::from([("type".to_owned(), "security_scanner".to_owned())]),
            },
            vec![MatchDescriptor {
                operator: "phrase_match".to_owned(),
                operator_value: "acunetix-product".to_owned(),
                parameters: vec![MatchParameter {
                    address: "http.headers".to_owned(),
                    key_path: vec!["acunetix-product".to_owned()],
                    value: "Acunetix".to_owned(),
                }],
                highlight: vec!["acunetix-product".to_owned()],
            }],
            EventContext::default(),
        )
    }

    #[test]
    fn new_event_has_identity() {
        let a = sample_event();
        let b = sample_event();
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.event_type, "appsec");
        assert_eq!(a.event_version, "1.0.0");
    }

    #[test]
    fn every_context_object_is_serialized() {
        let json = serde_json::to_value(sample_event()).unwrap();
        let context = &json["context"];
        for key in ["host", "http", "library", "service", "span", "tags", "trace"] {
            assert!(context.get(key).is_some(), "missing context.{key}");
        }
        assert_eq!(context["http"]["context_version"], "1.0.0");
        assert_eq!(context["service"]["context_version"], "0.1.0");
        assert_eq!(context["library"]["runtime_type"], "rust");
    }

    #[test]
    fn absent_values_are_omitted() {
        let json = serde_json::to_value(sample_event()).unwrap();
        let request = &json["context"]["http"]["request"];
        assert!(request.get("method").is_none());
        assert!(request.get("headers").is_none());
        assert!(json["context"]["span"].get("id").is_none());
    }

    #[test]
    fn detected_at_is_rfc3339() {
        let json = serde_json::to_value(sample_event()).unwrap();
        let detected = json["detected_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(detected).is_ok());
    }
}
