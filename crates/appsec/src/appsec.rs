//! AppSec 오케스트레이션 -- 게이트웨이, 탐지 어댑터, 리포터, 플러시 스케줄러를 묶습니다.
//!
//! [`AppSec`]은 core의 [`Pipeline`](warden_core::pipeline::Pipeline) trait을 구현하여
//! 다른 모듈과 동일한 생명주기(start/stop/health_check)로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! publish -> Gateway -> WafAdapter -> Reporter -> Backlog <- FlushScheduler -> Transport
//! ```
//!
//! 탐지 엔진 생성 실패는 설정 오류로 취급합니다. 한 번만 에러 로그를 남기고
//! 탐지를 끈 채로 계속 동작합니다. 요청 처리는 어떤 경우에도 실패하지 않습니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::gauge;
use serde_json::Value;

use warden_core::error::{PipelineError, WardenError};
use warden_core::metrics as m;
use warden_core::pipeline::{HealthStatus, Pipeline};

use crate::address::Address;
use crate::backlog::Backlog;
use crate::config::AppSecConfig;
use crate::context::ExecutionContext;
use crate::error::{AppSecError, GatewayError};
use crate::flush::{FlushOutcome, FlushScheduler};
use crate::gateway::Gateway;
use crate::reporter::Reporter;
use crate::rule::{WafRule, partition_by_registry};
use crate::tracer::ServiceInfo;
use crate::transport::Transport;
use crate::waf::{BuiltinWaf, WafAdapter, WafEngine};

/// 백로그 사용률 경고 임계치
const BACKLOG_DEGRADED_RATIO: f64 = 0.9;

/// 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppSecState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 인프로세스 AppSec 탐지 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use warden_appsec::{AppSecBuilder, HttpTransport};
///
/// let transport = HttpTransport::new(client, "http://localhost:8126");
/// let mut appsec = AppSecBuilder::new()
///     .config(config)
///     .rules(rules)
///     .transport(transport)
///     .build()?;
///
/// appsec.start().await?;
///
/// let mut ctx = appsec.new_context();
/// appsec.publish(&mut ctx, Address::HttpMethod, json!("GET"))?;
/// ```
pub struct AppSec<T: Transport> {
    config: AppSecConfig,
    state: AppSecState,
    gateway: Arc<Gateway>,
    reporter: Arc<Reporter>,
    backlog: Arc<Backlog>,
    scheduler: FlushScheduler<T>,
    adapter: Option<Arc<WafAdapter>>,
    custom_engine: Option<Arc<dyn WafEngine>>,
    engine_failure_logged: AtomicBool,
}

impl<T: Transport> AppSec<T> {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            AppSecState::Initialized => "initialized",
            AppSecState::Running => "running",
            AppSecState::Stopped => "stopped",
        }
    }

    /// 새 실행 컨텍스트를 생성합니다.
    pub fn new_context(&self) -> ExecutionContext {
        self.gateway.new_context()
    }

    /// 주소 값을 publish 합니다.
    pub fn publish(
        &self,
        ctx: &mut ExecutionContext,
        address: Address,
        value: Value,
    ) -> Result<(), GatewayError> {
        self.gateway.publish(ctx, address, value)
    }

    /// 구독 관리자
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// 이벤트 리포터
    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// 플러시 스케줄러
    pub fn scheduler(&self) -> &FlushScheduler<T> {
        &self.scheduler
    }

    /// 설정
    pub fn config(&self) -> &AppSecConfig {
        &self.config
    }

    /// 탐지가 활성화되어 있는지 확인합니다.
    pub fn detection_enabled(&self) -> bool {
        self.adapter.is_some()
    }

    /// 설치된 룰 수
    pub fn rule_count(&self) -> usize {
        self.adapter.as_ref().map_or(0, |a| a.rule_count())
    }

    /// 레지스트리 검증에서 건너뛴 룰 ID
    pub fn skipped_rules(&self) -> &[String] {
        match &self.adapter {
            Some(adapter) => adapter.skipped_rules(),
            None => &[],
        }
    }

    /// 현재 백로그 크기
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// 즉시 한 번 플러시합니다.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.scheduler.flush().await
    }

    /// 룰을 교체합니다.
    ///
    /// 기존 구독을 모두 제거한 뒤 새 어댑터를 설치합니다. 탐지가 활성화되면
    /// `true`를 반환합니다. 엔진 생성에 실패하면 탐지는 꺼진 상태로 남습니다.
    pub fn reconfigure(&mut self, rules: Vec<WafRule>) -> bool {
        self.gateway.clear();
        self.adapter = None;
        gauge!(m::APPSEC_RULES_LOADED).set(0.0);

        if !self.config.enabled {
            tracing::info!("appsec detection disabled in configuration");
            return false;
        }

        let (engine, rejected) = match self.build_engine(&rules) {
            Ok(built) => built,
            Err(e) => {
                if !self.engine_failure_logged.swap(true, Ordering::Relaxed) {
                    tracing::error!(error = %e, "failed to load detection engine, detection disabled");
                } else {
                    tracing::debug!(error = %e, "detection engine still failing to load");
                }
                return false;
            }
        };

        let rules = rules
            .into_iter()
            .filter(|rule| !rejected.contains(&rule.id))
            .collect();
        let adapter = WafAdapter::install(
            &self.gateway,
            rules,
            engine,
            Arc::clone(&self.reporter),
            self.config.waf_timeout,
        );
        gauge!(m::APPSEC_RULES_LOADED).set(adapter.rule_count() as f64);
        self.adapter = Some(adapter);
        self.engine_failure_logged.store(false, Ordering::Relaxed);
        true
    }

    /// 엔진과 엔진이 거부한 룰 ID를 반환합니다.
    fn build_engine(
        &self,
        rules: &[WafRule],
    ) -> Result<(Arc<dyn WafEngine>, Vec<String>), AppSecError> {
        if let Some(engine) = &self.custom_engine {
            return Ok((Arc::clone(engine), Vec::new()));
        }
        let (valid, _) = partition_by_registry(rules.to_vec());
        let engine = BuiltinWaf::new(&valid)?;
        let rejected = engine.rejected_rules().to_vec();
        Ok((Arc::new(engine), rejected))
    }
}

impl<T: Transport> Pipeline for AppSec<T> {
    async fn start(&mut self) -> Result<(), WardenError> {
        if self.state == AppSecState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        tracing::info!(
            rules = self.rule_count(),
            detection = self.detection_enabled(),
            "starting appsec pipeline"
        );
        self.scheduler.start(self.config.flush_interval);
        self.state = AppSecState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WardenError> {
        if self.state != AppSecState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping appsec pipeline");
        self.scheduler.stop();

        // 남은 이벤트 마지막 플러시
        let outcome = self.scheduler.flush().await;
        tracing::info!(outcome = ?outcome, "final flush completed");

        self.state = AppSecState::Stopped;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            AppSecState::Running => {
                if !self.detection_enabled() {
                    return HealthStatus::Degraded("detection disabled".to_owned());
                }
                let utilization = self.backlog.utilization();
                if utilization > BACKLOG_DEGRADED_RATIO {
                    HealthStatus::Degraded(format!(
                        "backlog utilization high: {:.1}%",
                        utilization * 100.0
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            AppSecState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            AppSecState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// AppSec 파이프라인 빌더
pub struct AppSecBuilder<T: Transport> {
    config: AppSecConfig,
    rules: Vec<WafRule>,
    engine: Option<Arc<dyn WafEngine>>,
    transport: Option<T>,
    service: Option<ServiceInfo>,
}

impl<T: Transport> AppSecBuilder<T> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: AppSecConfig::default(),
            rules: Vec::new(),
            engine: None,
            transport: None,
            service: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: AppSecConfig) -> Self {
        self.config = config;
        self
    }

    /// 탐지 룰을 지정합니다.
    pub fn rules(mut self, rules: Vec<WafRule>) -> Self {
        self.rules = rules;
        self
    }

    /// 내장 엔진 대신 사용할 탐지 엔진을 지정합니다.
    pub fn engine(mut self, engine: Arc<dyn WafEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// 이벤트 전송 경로를 지정합니다.
    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 설정의 서비스 정보를 덮어씁니다.
    pub fn service(mut self, service: ServiceInfo) -> Self {
        self.service = Some(service);
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// 엔진 생성 실패는 에러가 아니며, 탐지가 꺼진 파이프라인이 만들어집니다.
    pub fn build(self) -> Result<AppSec<T>, AppSecError> {
        let mut config = self.config;
        if let Some(service) = self.service {
            config.service = service;
        }
        config.validate()?;

        let transport = self.transport.ok_or_else(|| AppSecError::Config {
            field: "transport".to_owned(),
            reason: "a transport must be provided".to_owned(),
        })?;

        let backlog = Arc::new(Backlog::new(config.max_backlog));
        let reporter = Arc::new(Reporter::new(
            Arc::clone(&backlog),
            config.service.clone(),
            config.hostname.clone(),
        ));
        let scheduler = FlushScheduler::new(Arc::clone(&backlog), transport);

        let mut appsec = AppSec {
            config,
            state: AppSecState::Initialized,
            gateway: Arc::new(Gateway::new()),
            reporter,
            backlog,
            scheduler,
            adapter: None,
            custom_engine: self.engine,
            engine_failure_logged: AtomicBool::new(false),
        };
        appsec.reconfigure(self.rules);
        Ok(appsec)
    }
}

impl<T: Transport> Default for AppSecBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
