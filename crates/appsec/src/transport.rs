//! 이벤트 전송 -- 플러시된 배치를 수집기로 보냅니다.
//!
//! [`Transport`] trait은 전송 경로를 추상화합니다. 운영 코드는
//! [`HttpTransport`]를 사용하고, 테스트는 mock 구현을 사용합니다.
//!
//! `HttpTransport`는 호출자가 만든 `reqwest::Client`를 그대로 사용합니다.
//! 연결 설정(프록시, TLS, 타임아웃)은 임베딩 프로세스가 결정합니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppSecError;
use crate::event::AttackEvent;

/// 배치 프로토콜 버전
pub const PROTOCOL_VERSION: u32 = 1;

/// 이벤트 수집 엔드포인트 경로
pub const EVENTS_PATH: &str = "/appsec/proxy/api/v2/appsecevts";

/// 전송 단위 배치
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    /// 프로토콜 버전 (항상 1)
    pub protocol_version: u32,
    /// 재전송 식별용 키 (UUID v4)
    pub idempotency_key: String,
    /// 이벤트 목록
    pub events: Vec<AttackEvent>,
}

impl EventBatch {
    /// 새 배치를 생성합니다.
    pub fn new(events: Vec<AttackEvent>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            events,
        }
    }

    /// 이벤트 수
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// 이벤트가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// 이벤트 배치 전송 추상화
///
/// 플러시 태스크가 `tokio::spawn`으로 실행되므로 `Send + Sync + 'static`이 필요합니다.
pub trait Transport: Send + Sync + 'static {
    /// 배치를 전송합니다.
    fn send_batch(
        &self,
        batch: &EventBatch,
    ) -> impl Future<Output = Result<(), AppSecError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send_batch(
        &self,
        batch: &EventBatch,
    ) -> impl Future<Output = Result<(), AppSecError>> + Send {
        (**self).send_batch(batch)
    }
}

/// HTTP JSON 전송
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// 호출자의 HTTP 클라이언트와 수집기 기본 URL로 전송을 생성합니다.
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}{EVENTS_PATH}", base_url.trim_end_matches('/')),
        }
    }

    /// 요청 타임아웃만 설정한 클라이언트로 전송을 생성합니다.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, AppSecError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppSecError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self::new(client, base_url))
    }

    /// 전송 대상 URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    async fn send_batch(&self, batch: &EventBatch) -> Result<(), AppSecError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(batch)
            .send()
            .await
            .map_err(|e| AppSecError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppSecError::Transport(format!(
                "collector returned {status} for {}",
                self.endpoint
            )));
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            events = batch.len(),
            idempotency_key = %batch.idempotency_key,
            "event batch delivered"
        );
        Ok(())
    }
}
