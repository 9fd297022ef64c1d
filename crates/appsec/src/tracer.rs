//! tracer 연동 인터페이스 -- 활성 span과 정적 서비스 정보
//!
//! tracer 자체는 이 크레이트의 범위 밖입니다. 계측 레이어는 요청마다
//! [`TraceSpan`] 구현을 실행 컨텍스트에 붙이고, 서비스 정보는
//! 설정에서 [`ServiceInfo`]로 전달됩니다. 둘 다 없어도 파이프라인은 동작합니다.

use warden_core::config::AppSecSection;

/// 샘플링과 무관하게 trace를 유지하도록 표시하는 태그
pub const MANUAL_KEEP_TAG: &str = "manual.keep";

/// 보안 이벤트가 발생한 span 표시 태그
pub const APPSEC_EVENT_TAG: &str = "appsec.event";

/// 요청을 처리 중인 활성 span
///
/// 태그 설정은 내부 가변성으로 처리해야 합니다 (`&self`).
pub trait TraceSpan: Send + Sync {
    /// span ID
    fn span_id(&self) -> u64;

    /// trace ID
    fn trace_id(&self) -> u64;

    /// 리소스명 (예: `GET /users/:id`)
    fn resource(&self) -> Option<String> {
        None
    }

    /// 태그를 설정합니다.
    fn set_tag(&self, key: &str, value: &str);
}

/// tracer의 정적 서비스 설정
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    /// 서비스명
    pub name: Option<String>,
    /// 배포 환경
    pub environment: Option<String>,
    /// 서비스 버전
    pub version: Option<String>,
    /// 전역 태그 (`key:value`)
    pub tags: Vec<String>,
}

impl ServiceInfo {
    /// 설정 섹션에서 서비스 정보를 생성합니다. 빈 문자열은 없는 값으로 취급합니다.
    pub fn from_config(section: &AppSecSection) -> Self {
        Self {
            name: non_empty(&section.service_name),
            environment: non_empty(&section.service_env),
            version: non_empty(&section.service_version),
            tags: section.service_tags.clone(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_treats_empty_as_absent() {
        let mut section = AppSecSection::default();
        section.service_name = "checkout".to_owned();
        section.service_tags = vec!["team:payments".to_owned()];

        let info = ServiceInfo::from_config(&section);
        assert_eq!(info.name.as_deref(), Some("checkout"));
        assert_eq!(info.environment, None);
        assert_eq!(info.version, None);
        assert_eq!(info.tags, vec!["team:payments".to_owned()]);
    }
}
