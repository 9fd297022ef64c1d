#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`address`]: 고정 주소 레지스트리 및 룰 입력(`주소:키경로`) 파싱
//! - [`context`]: 요청 단위 실행 컨텍스트 (write-once 주소 값, 매처 상태)
//! - [`gateway`]: 주소 집합 구독 등록 및 publish 디스패치
//! - [`rule`]: YAML/JSON 룰 로딩 및 검증
//! - [`waf`]: 탐지 엔진 인터페이스, 내장 매처, 게이트웨이 어댑터
//! - [`reporter`]: 매칭을 공격 이벤트로 변환하여 백로그에 적재
//! - [`event`]: 공격 이벤트 와이어 포맷
//! - [`backlog`]: 상한이 있는 이벤트 백로그
//! - [`flush`]: 주기 플러시 스케줄러 (중첩 전송 방지)
//! - [`transport`]: 수집기 배치 전송
//! - [`tracer`]: 트레이스 스팬 연동 trait
//! - [`appsec`]: 전체 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! publish -> Gateway -> WafAdapter -> Reporter -> Backlog -> FlushScheduler -> Transport
//!               |            |            |                        |
//!        fire-once 구독   WafEngine    Span 태그              interval tick
//! ```

pub mod address;
pub mod appsec;
pub mod backlog;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod flush;
pub mod gateway;
pub mod reporter;
pub mod tracer;
pub mod transport;

pub mod rule;
pub mod waf;

// --- 주요 타입 re-export ---

// 오케스트레이션
pub use appsec::{AppSec, AppSecBuilder};

// 설정
pub use config::{AppSecConfig, AppSecConfigBuilder};

// 에러
pub use error::{AppSecError, GatewayError};

// 주소 / 컨텍스트 / 게이트웨이
pub use address::Address;
pub use context::ExecutionContext;
pub use gateway::{Gateway, Subscriber};

// 룰
pub use rule::{RuleLoader, WafRule};

// 탐지 엔진
pub use waf::{BuiltinWaf, WafAdapter, WafEngine};

// 이벤트 / 보고
pub use backlog::Backlog;
pub use event::AttackEvent;
pub use reporter::Reporter;

// 플러시 / 전송
pub use flush::{FlushOutcome, FlushScheduler};
pub use transport::{EventBatch, HttpTransport, Transport};

// 트레이서
pub use tracer::{ServiceInfo, TraceSpan};
