//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. 전역 레코더가 설치되지 않은 경우 호출은 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `warden_`
//! - 모듈명: `appsec_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(warden_core::metrics::APPSEC_EVENTS_REPORTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── AppSec 메트릭 ─────────────────────────────────────────────────

/// AppSec: 백로그에 기록된 공격 이벤트 수 (counter)
pub const APPSEC_EVENTS_REPORTED_TOTAL: &str = "warden_appsec_events_reported_total";

/// AppSec: 백로그 포화로 버려진 공격 이벤트 수 (counter)
pub const APPSEC_EVENTS_DROPPED_TOTAL: &str = "warden_appsec_events_dropped_total";

/// AppSec: 플러시 배치 전송 수 (counter, label: result)
pub const APPSEC_FLUSH_BATCHES_TOTAL: &str = "warden_appsec_flush_batches_total";

/// AppSec: 수집기로 전송된 이벤트 수 (counter)
pub const APPSEC_EVENTS_SENT_TOTAL: &str = "warden_appsec_events_sent_total";

/// AppSec: 탐지 엔진 실행 수 (counter)
pub const APPSEC_WAF_EVALUATIONS_TOTAL: &str = "warden_appsec_waf_evaluations_total";

/// AppSec: 탐지 엔진 실행 실패 수 (counter)
pub const APPSEC_WAF_ERRORS_TOTAL: &str = "warden_appsec_waf_errors_total";

/// AppSec: 시간 예산 초과 수 (counter)
pub const APPSEC_WAF_TIMEOUTS_TOTAL: &str = "warden_appsec_waf_timeouts_total";

/// AppSec: 현재 백로그 크기 (gauge)
pub const APPSEC_BACKLOG_SIZE: &str = "warden_appsec_backlog_size";

/// AppSec: 로드된 탐지 룰 수 (gauge)
pub const APPSEC_RULES_LOADED: &str = "warden_appsec_rules_loaded";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        APPSEC_EVENTS_REPORTED_TOTAL,
        "Total number of attack events recorded into the backlog"
    );
    describe_counter!(
        APPSEC_EVENTS_DROPPED_TOTAL,
        "Total number of attack events discarded because the backlog was full"
    );
    describe_counter!(
        APPSEC_FLUSH_BATCHES_TOTAL,
        "Total number of event batches transmitted to the collector, by result"
    );
    describe_counter!(
        APPSEC_EVENTS_SENT_TOTAL,
        "Total number of attack events delivered to the collector"
    );
    describe_counter!(
        APPSEC_WAF_EVALUATIONS_TOTAL,
        "Total number of rule engine evaluations"
    );
    describe_counter!(
        APPSEC_WAF_ERRORS_TOTAL,
        "Total number of rule engine evaluations that failed"
    );
    describe_counter!(
        APPSEC_WAF_TIMEOUTS_TOTAL,
        "Total number of rule engine evaluations that exhausted their time budget"
    );
    describe_gauge!(
        APPSEC_BACKLOG_SIZE,
        "Current number of attack events waiting to be flushed"
    );
    describe_gauge!(APPSEC_RULES_LOADED, "Number of detection rules loaded");
}
