//! 탐지 룰 -- 룰 타입, 로딩, 레지스트리 검증
//!
//! # 아키텍처
//! - [`types`]: 룰 데이터 구조 정의
//! - [`loader`]: YAML/JSON 파일 로딩 및 구조 검증
//! - [`partition_by_registry`]: 주소 레지스트리 검증

pub mod loader;
pub mod types;

pub use loader::RuleLoader;
pub use types::{Operator, OperatorValue, RuleCondition, WafRule};

use crate::error::AppSecError;

/// 룰을 레지스트리 검증 결과에 따라 분리합니다.
///
/// 모든 입력 주소가 레지스트리에 있는 룰은 첫 번째 목록에,
/// 그렇지 않은 룰의 에러는 두 번째 목록에 담깁니다.
pub fn partition_by_registry(rules: Vec<WafRule>) -> (Vec<WafRule>, Vec<AppSecError>) {
    let mut valid = Vec::with_capacity(rules.len());
    let mut rejected = Vec::new();
    for rule in rules {
        match rule.addresses() {
            Ok(_) => valid.push(rule),
            Err(e) => rejected.push(e),
        }
    }
    (valid, rejected)
}
