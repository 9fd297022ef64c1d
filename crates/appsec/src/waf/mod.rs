//! 탐지 엔진 인터페이스
//!
//! 어댑터는 엔진을 불투명한 [`WafEngine`]으로만 다룹니다. 엔진은
//! 실행 컨텍스트마다 [`WafContext`](매처 상태)를 만들어 주고, 매처 상태는
//! 컨텍스트의 전체 주소 값과 시간 예산을 받아 매칭 결과를 반환합니다.
//!
//! - [`builtin`]: 내장 참조 매처 ([`BuiltinWaf`])
//! - [`adapter`]: 게이트웨이 구독 및 이벤트 보고 ([`WafAdapter`])

pub mod adapter;
pub mod builtin;

pub use adapter::WafAdapter;
pub use builtin::BuiltinWaf;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::AddressMap;
use crate::error::AppSecError;

/// 탐지 엔진 핸들
pub trait WafEngine: Send + Sync {
    /// 엔진 이름
    fn name(&self) -> &str;

    /// 새 매처 상태를 생성합니다.
    fn new_context(&self) -> Box<dyn WafContext>;
}

/// 실행 컨텍스트별 매처 상태
pub trait WafContext: Send {
    /// 주소 값에 대해 룰을 평가합니다.
    ///
    /// 예산을 소진하면 그때까지의 매칭과 함께 `timed_out = true`를 반환합니다.
    fn run(&mut self, inputs: &AddressMap, budget: Duration) -> Result<WafResult, AppSecError>;
}

/// 엔진 실행 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WafResult {
    /// 매칭된 룰
    pub matches: Vec<WafMatch>,
    /// 시간 예산 초과 여부
    pub timed_out: bool,
}

/// 룰 하나의 매칭
#[derive(Debug, Clone, PartialEq)]
pub struct WafMatch {
    /// 매칭된 룰 ID
    pub rule_id: String,
    /// 조건별 매칭 상세
    pub conditions: Vec<MatchDescriptor>,
}

/// 조건 하나의 매칭 상세 (이벤트의 `rule_match` 항목)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDescriptor {
    /// 연산자 이름
    pub operator: String,
    /// 연산자 인자
    pub operator_value: String,
    /// 매칭된 입력
    pub parameters: Vec<MatchParameter>,
    /// 강조 문자열
    pub highlight: Vec<String>,
}

/// 매칭된 입력 값
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchParameter {
    /// 주소 이름
    pub address: String,
    /// 값 내부 경로
    pub key_path: Vec<String>,
    /// 매칭된 값
    pub value: String,
}
