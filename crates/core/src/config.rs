//! 설정 관리 -- warden.toml 파싱 및 런타임 설정
//!
//! [`WardenConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`WARDEN_APPSEC_FLUSH_INTERVAL_MS=1000` 형식)
//! 3. 설정 파일 (`warden.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), warden_core::error::WardenError> {
//! use warden_core::config::WardenConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = WardenConfig::load("warden.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = WardenConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, WardenError};

/// 탐지 엔진 1회 실행 시간 예산 기본값 (마이크로초)
pub const DEFAULT_WAF_TIMEOUT_US: u64 = 5_000;
/// 백로그 플러시 주기 기본값 (밀리초)
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;
/// 백로그 최대 이벤트 수 기본값
pub const DEFAULT_MAX_BACKLOG: usize = 1_000_000;

/// Warden 통합 설정
///
/// `warden.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// AppSec 탐지 파이프라인 설정
    #[serde(default)]
    pub appsec: AppSecSection,
}

impl WardenConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WardenError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, WardenError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WardenError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                WardenError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, WardenError> {
        toml::from_str(toml_str).map_err(|e| {
            WardenError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `WARDEN_{SECTION}_{FIELD}`
    /// 예: `WARDEN_APPSEC_COLLECTOR_URL=http://localhost:8126`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "WARDEN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "WARDEN_GENERAL_LOG_FORMAT");

        // AppSec
        override_bool(&mut self.appsec.enabled, "WARDEN_APPSEC_ENABLED");
        override_string(&mut self.appsec.rules_path, "WARDEN_APPSEC_RULES_PATH");
        override_u64(
            &mut self.appsec.waf_timeout_us,
            "WARDEN_APPSEC_WAF_TIMEOUT_US",
        );
        override_u64(
            &mut self.appsec.flush_interval_ms,
            "WARDEN_APPSEC_FLUSH_INTERVAL_MS",
        );
        override_usize(&mut self.appsec.max_backlog, "WARDEN_APPSEC_MAX_BACKLOG");
        override_string(
            &mut self.appsec.collector_url,
            "WARDEN_APPSEC_COLLECTOR_URL",
        );
        override_u64(
            &mut self.appsec.request_timeout_secs,
            "WARDEN_APPSEC_REQUEST_TIMEOUT_SECS",
        );

        // Service (tracer 정적 설정)
        override_string(
            &mut self.appsec.service_name,
            "WARDEN_APPSEC_SERVICE_NAME",
        );
        override_string(&mut self.appsec.service_env, "WARDEN_APPSEC_SERVICE_ENV");
        override_string(
            &mut self.appsec.service_version,
            "WARDEN_APPSEC_SERVICE_VERSION",
        );
        override_csv(
            &mut self.appsec.service_tags,
            "WARDEN_APPSEC_SERVICE_TAGS",
        );
        override_string(&mut self.appsec.hostname, "WARDEN_APPSEC_HOSTNAME");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), WardenError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if !self.appsec.enabled {
            return Ok(());
        }

        if self.appsec.waf_timeout_us == 0 {
            return Err(ConfigError::InvalidValue {
                field: "appsec.waf_timeout_us".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.appsec.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "appsec.flush_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.appsec.max_backlog == 0 {
            return Err(ConfigError::InvalidValue {
                field: "appsec.max_backlog".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        let url = self.appsec.collector_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "appsec.collector_url".to_owned(),
                reason: format!("'{url}' must start with http:// or https://"),
            }
            .into());
        }

        Ok(())
    }
}

// Default는 derive 매크로로 자동 생성 (각 필드가 Default를 구현하므로)

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// AppSec 탐지 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSecSection {
    /// 활성화 여부
    pub enabled: bool,
    /// 탐지 룰 파일 또는 디렉토리 경로
    pub rules_path: String,
    /// 탐지 엔진 1회 실행 시간 예산 (마이크로초)
    pub waf_timeout_us: u64,
    /// 백로그 플러시 주기 (밀리초)
    pub flush_interval_ms: u64,
    /// 백로그 최대 이벤트 수
    pub max_backlog: usize,
    /// 이벤트 수집기 기본 URL (기존 tracer agent 연결)
    pub collector_url: String,
    /// 수집기 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 서비스명
    pub service_name: String,
    /// 배포 환경 (prod, staging 등)
    pub service_env: String,
    /// 서비스 버전
    pub service_version: String,
    /// 전역 태그 (`key:value` 형식)
    pub service_tags: Vec<String>,
    /// 호스트명 (비어있으면 `HOSTNAME` 환경변수 사용)
    pub hostname: String,
}

impl Default for AppSecSection {
    fn default() -> Self {
        Self {
            enabled: true,
            rules_path: "/etc/warden/rules".to_owned(),
            waf_timeout_us: DEFAULT_WAF_TIMEOUT_US,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_backlog: DEFAULT_MAX_BACKLOG,
            collector_url: "http://localhost:8126".to_owned(),
            request_timeout_secs: 5,
            service_name: String::new(),
            service_env: String::new(),
            service_version: String::new(),
            service_tags: Vec::new(),
            hostname: String::new(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
