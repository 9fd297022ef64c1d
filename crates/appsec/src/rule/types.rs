//! 탐지 룰 데이터 타입
//!
//! YAML/JSON 룰 파일에서 역직렬화되는 구조체들을 정의합니다.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{Address, parse_input};
use crate::error::AppSecError;
use crate::gateway::normalize;

/// 룰 ID 최대 길이
const MAX_RULE_ID_LEN: usize = 256;

/// 탐지 룰
///
/// # YAML 스키마
/// ```yaml
/// id: crs-913-110
/// name: Found request header associated with a security scanner
/// tags:
///   type: security_scanner
///   category: attack_attempt
/// conditions:
///   - operator: phrase_match
///     inputs:
///       - http.headers:user-agent
///     value: [nikto, sqlmap]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WafRule {
    /// 룰 고유 ID
    pub id: String,
    /// 룰 이름 (이벤트에 표시)
    pub name: String,
    /// 분류 태그 (관례적으로 `type`, `category`)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// 매칭 조건 (AND 결합)
    pub conditions: Vec<RuleCondition>,
}

impl WafRule {
    /// 룰의 구조적 유효성을 검증합니다.
    ///
    /// 입력 주소의 레지스트리 검증은 [`WafRule::addresses`]가 담당합니다.
    pub fn validate(&self) -> Result<(), AppSecError> {
        if self.id.is_empty() {
            return Err(AppSecError::RuleValidation {
                rule_id: "(empty)".to_owned(),
                reason: "rule id must not be empty".to_owned(),
            });
        }

        if self.id.len() > MAX_RULE_ID_LEN {
            return Err(AppSecError::RuleValidation {
                rule_id: self.id.clone(),
                reason: format!("rule id must not exceed {MAX_RULE_ID_LEN} characters"),
            });
        }

        if self.name.is_empty() {
            return Err(AppSecError::RuleValidation {
                rule_id: self.id.clone(),
                reason: "rule name must not be empty".to_owned(),
            });
        }

        if self.conditions.is_empty() {
            return Err(AppSecError::RuleValidation {
                rule_id: self.id.clone(),
                reason: "rule must have at least one condition".to_owned(),
            });
        }

        for (idx, condition) in self.conditions.iter().enumerate() {
            if condition.inputs.is_empty() {
                return Err(AppSecError::RuleValidation {
                    rule_id: self.id.clone(),
                    reason: format!("condition[{idx}] must have at least one input"),
                });
            }
            if condition.value.is_empty() {
                return Err(AppSecError::RuleValidation {
                    rule_id: self.id.clone(),
                    reason: format!("condition[{idx}] value must not be empty"),
                });
            }
        }

        Ok(())
    }

    /// 룰이 참조하는 주소 집합 (정렬, 중복 제거)
    ///
    /// 레지스트리에 없는 주소가 하나라도 있으면 `UnknownAddress`를 반환합니다.
    pub fn addresses(&self) -> Result<Vec<Address>, AppSecError> {
        let mut addresses = Vec::new();
        for input in self.conditions.iter().flat_map(|c| c.inputs.iter()) {
            let (address, _) = parse_input(input).map_err(|e| AppSecError::UnknownAddress {
                rule_id: self.id.clone(),
                address: e.0,
            })?;
            addresses.push(address);
        }
        Ok(normalize(&addresses))
    }

    /// `type` 태그
    pub fn rule_type(&self) -> Option<&str> {
        self.tags.get("type").map(String::as_str)
    }

    /// `category` 태그
    pub fn category(&self) -> Option<&str> {
        self.tags.get("category").map(String::as_str)
    }
}

/// 룰 조건
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// 매칭 연산자
    pub operator: Operator,
    /// 입력 주소 (`address[:key:path]`)
    pub inputs: Vec<String>,
    /// 연산자 인자
    pub value: OperatorValue,
}

/// 매칭 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// 정확히 일치
    Equals,
    /// 부분 문자열 포함
    Contains,
    /// 접두사 일치
    StartsWith,
    /// 접미사 일치
    EndsWith,
    /// 정규식 매칭
    MatchRegex,
    /// 구문 목록 중 하나 포함 (대소문자 무시)
    PhraseMatch,
}

impl Operator {
    /// 연산자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::MatchRegex => "match_regex",
            Operator::PhraseMatch => "phrase_match",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 연산자 인자 -- 단일 문자열 또는 목록
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperatorValue {
    /// 단일 값
    Single(String),
    /// 값 목록 (`phrase_match`)
    List(Vec<String>),
}

impl OperatorValue {
    /// 모든 값을 슬라이스 목록으로 반환합니다.
    pub fn values(&self) -> Vec<&str> {
        match self {
            OperatorValue::Single(v) => vec![v.as_str()],
            OperatorValue::List(list) => list.iter().map(String::as_str).collect(),
        }
    }

    /// 값이 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        match self {
            OperatorValue::Single(v) => v.is_empty(),
            OperatorValue::List(list) => list.is_empty() || list.iter().all(String::is_empty),
        }
    }
}

impl fmt::Display for OperatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorValue::Single(v) => f.write_str(v),
            OperatorValue::List(list) => f.write_str(&list.join(",")),
        }
    }
}
