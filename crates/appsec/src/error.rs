//! AppSec 파이프라인 에러 타입
//!
//! - [`GatewayError`]: 실행 컨텍스트 사용 규약 위반 (중복 publish, publish 전 resolve).
//!   계측 레이어의 버그를 의미하므로 즉시 실패합니다.
//! - [`AppSecError`]: 룰 로딩, 엔진 실행, 전송 등 파이프라인 내부의 모든 에러.
//!   `From<AppSecError> for WardenError` 변환이 구현되어 있어
//!   상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use warden_core::error::{ConfigError, DetectionError, WardenError};

use crate::address::Address;

/// 실행 컨텍스트 규약 위반 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// 같은 컨텍스트에 같은 주소를 두 번 publish
    #[error("address '{address}' already published in context {context}")]
    DuplicateAddress {
        /// 중복된 주소
        address: Address,
        /// 컨텍스트 키
        context: u64,
    },

    /// publish 되지 않은 주소를 resolve
    #[error("address '{address}' not resolved in context {context}")]
    NotResolved {
        /// 요청한 주소
        address: Address,
        /// 컨텍스트 키
        context: u64,
    },
}

/// AppSec 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum AppSecError {
    /// 룰 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 룰 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 룰 유효성 검증 실패
    #[error("rule validation error: rule '{rule_id}': {reason}")]
    RuleValidation {
        /// 문제가 된 룰 ID
        rule_id: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 주소 레지스트리에 없는 입력 주소
    #[error("rule '{rule_id}' references unknown address '{address}'")]
    UnknownAddress {
        /// 문제가 된 룰 ID
        rule_id: String,
        /// 인식할 수 없는 주소
        address: String,
    },

    /// 탐지 엔진 로드/실행 실패
    #[error("engine error: {0}")]
    Engine(String),

    /// 이벤트 전송 실패
    #[error("transport error: {0}")]
    Transport(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl From<AppSecError> for WardenError {
    fn from(err: AppSecError) -> Self {
        match err {
            AppSecError::Config { field, reason } => {
                WardenError::Config(ConfigError::InvalidValue { field, reason })
            }
            AppSecError::RuleLoad { .. }
            | AppSecError::RuleValidation { .. }
            | AppSecError::UnknownAddress { .. } => {
                WardenError::Detection(DetectionError::Rule(err.to_string()))
            }
            AppSecError::Engine(reason) => {
                WardenError::Detection(DetectionError::EngineLoad(reason))
            }
            AppSecError::Transport(reason) => {
                WardenError::Detection(DetectionError::Transport(reason))
            }
        }
    }
}
