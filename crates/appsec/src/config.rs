//! AppSec 파이프라인 설정
//!
//! [`AppSecConfig`]는 core의 [`AppSecSection`](warden_core::config::AppSecSection)을
//! 기반으로 파이프라인 내부에서 쓰는 타입(`Duration` 등)으로 변환된 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use warden_core::config::WardenConfig;
//! use warden_appsec::config::AppSecConfig;
//!
//! let core_config = WardenConfig::default();
//! let config = AppSecConfig::from_core(&core_config.appsec);
//! ```

use std::time::Duration;

use warden_core::config::{
    AppSecSection, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_MAX_BACKLOG, DEFAULT_WAF_TIMEOUT_US,
};

use crate::error::AppSecError;
use crate::tracer::ServiceInfo;

/// 시간 예산 상한 (1초)
const MAX_WAF_TIMEOUT_US: u64 = 1_000_000;
/// 플러시 주기 상한 (1시간)
const MAX_FLUSH_INTERVAL_MS: u64 = 3_600_000;
/// 백로그 상한
const MAX_BACKLOG_LIMIT: usize = 10_000_000;

/// AppSec 파이프라인 설정
#[derive(Debug, Clone, PartialEq)]
pub struct AppSecConfig {
    /// 탐지 활성화 여부
    pub enabled: bool,
    /// 룰 경로
    pub rules_path: String,
    /// 탐지 엔진 1회 실행 시간 예산
    pub waf_timeout: Duration,
    /// 플러시 주기
    pub flush_interval: Duration,
    /// 백로그 최대 이벤트 수
    pub max_backlog: usize,
    /// 수집기 기본 URL
    pub collector_url: String,
    /// 수집기 요청 타임아웃
    pub request_timeout: Duration,
    /// 서비스 정보
    pub service: ServiceInfo,
    /// 호스트명
    pub hostname: Option<String>,
}

impl Default for AppSecConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules_path: "/etc/warden/rules".to_owned(),
            waf_timeout: Duration::from_micros(DEFAULT_WAF_TIMEOUT_US),
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            max_backlog: DEFAULT_MAX_BACKLOG,
            collector_url: "http://localhost:8126".to_owned(),
            request_timeout: Duration::from_secs(5),
            service: ServiceInfo::default(),
            hostname: None,
        }
    }
}

impl AppSecConfig {
    /// core의 `AppSecSection`에서 파이프라인 설정을 생성합니다.
    ///
    /// 호스트명이 비어 있으면 `HOSTNAME` 환경변수를 사용합니다.
    pub fn from_core(core: &AppSecSection) -> Self {
        let hostname = if core.hostname.is_empty() {
            std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty())
        } else {
            Some(core.hostname.clone())
        };

        Self {
            enabled: core.enabled,
            rules_path: core.rules_path.clone(),
            waf_timeout: Duration::from_micros(core.waf_timeout_us),
            flush_interval: Duration::from_millis(core.flush_interval_ms),
            max_backlog: core.max_backlog,
            collector_url: core.collector_url.clone(),
            request_timeout: Duration::from_secs(core.request_timeout_secs),
            service: ServiceInfo::from_config(core),
            hostname,
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), AppSecError> {
        let timeout_us = self.waf_timeout.as_micros();
        if timeout_us == 0 || timeout_us > u128::from(MAX_WAF_TIMEOUT_US) {
            return Err(AppSecError::Config {
                field: "waf_timeout".to_owned(),
                reason: format!("must be 1-{MAX_WAF_TIMEOUT_US} microseconds"),
            });
        }

        let interval_ms = self.flush_interval.as_millis();
        if interval_ms == 0 || interval_ms > u128::from(MAX_FLUSH_INTERVAL_MS) {
            return Err(AppSecError::Config {
                field: "flush_interval".to_owned(),
                reason: format!("must be 1-{MAX_FLUSH_INTERVAL_MS} milliseconds"),
            });
        }

        if self.max_backlog == 0 || self.max_backlog > MAX_BACKLOG_LIMIT {
            return Err(AppSecError::Config {
                field: "max_backlog".to_owned(),
                reason: format!("must be 1-{MAX_BACKLOG_LIMIT}"),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(AppSecError::Config {
                field: "request_timeout".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if !self.collector_url.starts_with("http://") && !self.collector_url.starts_with("https://")
        {
            return Err(AppSecError::Config {
                field: "collector_url".to_owned(),
                reason: format!(
                    "'{}' must start with http:// or https://",
                    self.collector_url
                ),
            });
        }

        Ok(())
    }
}

/// AppSec 설정 빌더
#[derive(Default)]
pub struct AppSecConfigBuilder {
    config: AppSecConfig,
}

impl AppSecConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 탐지 활성화 여부를 설정합니다.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// 룰 경로를 설정합니다.
    pub fn rules_path(mut self, path: impl Into<String>) -> Self {
        self.config.rules_path = path.into();
        self
    }

    /// 탐지 엔진 시간 예산을 설정합니다.
    pub fn waf_timeout(mut self, timeout: Duration) -> Self {
        self.config.waf_timeout = timeout;
        self
    }

    /// 플러시 주기를 설정합니다.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// 백로그 최대 크기를 설정합니다.
    pub fn max_backlog(mut self, max: usize) -> Self {
        self.config.max_backlog = max;
        self
    }

    /// 수집기 URL을 설정합니다.
    pub fn collector_url(mut self, url: impl Into<String>) -> Self {
        self.config.collector_url = url.into();
        self
    }

    /// 서비스 정보를 설정합니다.
    pub fn service(mut self, service: ServiceInfo) -> Self {
        self.config.service = service;
        self
    }

    /// 호스트명을 설정합니다.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = Some(hostname.into());
        self
    }

    /// 설정을 검증하고 `AppSecConfig`를 생성합니다.
    pub fn build(self) -> Result<AppSecConfig, AppSecError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
