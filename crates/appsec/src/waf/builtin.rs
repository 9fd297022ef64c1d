//! 내장 참조 매처 -- 조건 평가 및 정규식 사전 컴파일
//!
//! [`BuiltinWaf`]는 룰의 조건을 실행 컨텍스트의 주소 값에 대해 평가합니다.
//! 정규식 패턴은 엔진 생성 시 한 번만 컴파일합니다.
//!
//! 평가 규칙:
//! - 룰의 모든 조건은 AND 결합입니다.
//! - 조건은 입력 중 하나라도 매칭되면 만족합니다.
//! - key path가 있는 입력은 객체/배열 내부로 들어가고, 없으면 값의 모든
//!   스칼라 리프가 후보가 됩니다.
//! - 룰은 컨텍스트당 최대 한 번 매칭됩니다.
//! - 시간 예산은 룰 사이에서 확인합니다.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;

use super::{MatchDescriptor, MatchParameter, WafContext, WafEngine, WafMatch, WafResult};
use crate::address::{Address, parse_input};
use crate::context::AddressMap;
use crate::error::AppSecError;
use crate::rule::{Operator, WafRule};

/// 리프 탐색 최대 깊이
const MAX_LEAF_DEPTH: usize = 20;
/// 입력당 최대 후보 리프 수
const MAX_LEAVES_PER_INPUT: usize = 256;

/// 내장 엔진 이름
pub const BUILTIN_ENGINE_NAME: &str = "warden-builtin";

/// 컴파일된 패턴
enum Pattern {
    Literal(String),
    Regex(Regex),
    /// 소문자로 정규화된 구문
    Phrase(String),
}

struct CompiledInput {
    address: Address,
    key_path: Vec<String>,
}

struct CompiledCondition {
    operator: Operator,
    operator_value: String,
    inputs: Vec<CompiledInput>,
    patterns: Vec<Pattern>,
}

struct CompiledRule {
    id: String,
    conditions: Vec<CompiledCondition>,
}

/// 내장 탐지 엔진
pub struct BuiltinWaf {
    rules: Arc<Vec<CompiledRule>>,
    rejected: Vec<String>,
}

impl BuiltinWaf {
    /// 룰을 컴파일하여 엔진을 생성합니다.
    ///
    /// 컴파일할 수 없는 룰(잘못된 정규식, 레지스트리에 없는 주소)은 경고 후
    /// 건너뛰고 [`rejected_rules`](Self::rejected_rules)에 기록합니다.
    ///
    /// # Errors
    /// 룰이 주어졌지만 하나도 컴파일되지 않으면 [`AppSecError::Engine`]
    pub fn new(rules: &[WafRule]) -> Result<Self, AppSecError> {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut rejected = Vec::new();

        for rule in rules {
            match compile_rule(rule) {
                Ok(compiled_rule) => compiled.push(compiled_rule),
                Err(e) => {
                    tracing::warn!(rule_id = %rule.id, error = %e, "rule rejected by engine");
                    rejected.push(rule.id.clone());
                }
            }
        }

        if compiled.is_empty() && !rules.is_empty() {
            return Err(AppSecError::Engine(format!(
                "no usable rules out of {}",
                rules.len()
            )));
        }

        Ok(Self {
            rules: Arc::new(compiled),
            rejected,
        })
    }

    /// 컴파일된 룰 수
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 컴파일에 실패해 제외된 룰 ID
    pub fn rejected_rules(&self) -> &[String] {
        &self.rejected
    }
}

impl WafEngine for BuiltinWaf {
    fn name(&self) -> &str {
        BUILTIN_ENGINE_NAME
    }

    fn new_context(&self) -> Box<dyn WafContext> {
        Box::new(BuiltinContext {
            rules: Arc::clone(&self.rules),
            fired: HashSet::new(),
        })
    }
}

/// 내장 엔진의 매처 상태
struct BuiltinContext {
    rules: Arc<Vec<CompiledRule>>,
    /// 이미 매칭된 룰 ID
    fired: HashSet<String>,
}

impl WafContext for BuiltinContext {
    fn run(&mut self, inputs: &AddressMap, budget: Duration) -> Result<WafResult, AppSecError> {
        let started = Instant::now();
        let mut result = WafResult::default();

        for (idx, rule) in self.rules.iter().enumerate() {
            if idx > 0 && started.elapsed() >= budget {
                result.timed_out = true;
                break;
            }
            if self.fired.contains(&rule.id) {
                continue;
            }
            if let Some(conditions) = evaluate_rule(rule, inputs) {
                self.fired.insert(rule.id.clone());
                result.matches.push(WafMatch {
                    rule_id: rule.id.clone(),
                    conditions,
                });
            }
        }

        Ok(result)
    }
}

fn compile_rule(rule: &WafRule) -> Result<CompiledRule, AppSecError> {
    let mut conditions = Vec::with_capacity(rule.conditions.len());

    for (idx, condition) in rule.conditions.iter().enumerate() {
        let inputs = condition
            .inputs
            .iter()
            .map(|input| {
                parse_input(input)
                    .map(|(address, key_path)| CompiledInput { address, key_path })
                    .map_err(|e| AppSecError::UnknownAddress {
                        rule_id: rule.id.clone(),
                        address: e.0,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let patterns = condition
            .value
            .values()
            .into_iter()
            .map(|raw| match condition.operator {
                Operator::MatchRegex => {
                    Regex::new(raw)
                        .map(Pattern::Regex)
                        .map_err(|e| AppSecError::RuleValidation {
                            rule_id: rule.id.clone(),
                            reason: format!("invalid regex in condition[{idx}]: {e}"),
                        })
                }
                Operator::PhraseMatch => Ok(Pattern::Phrase(raw.to_lowercase())),
                _ => Ok(Pattern::Literal(raw.to_owned())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        conditions.push(CompiledCondition {
            operator: condition.operator,
            operator_value: condition.value.to_string(),
            inputs,
            patterns,
        });
    }

    Ok(CompiledRule {
        id: rule.id.clone(),
        conditions,
    })
}

/// 룰의 모든 조건이 매칭되면 조건별 매칭 상세를 반환합니다.
fn evaluate_rule(rule: &CompiledRule, inputs: &AddressMap) -> Option<Vec<MatchDescriptor>> {
    rule.conditions
        .iter()
        .map(|condition| evaluate_condition(condition, inputs))
        .collect()
}

fn evaluate_condition(condition: &CompiledCondition, inputs: &AddressMap) -> Option<MatchDescriptor> {
    for input in &condition.inputs {
        let Some(value) = inputs.get(&input.address) else {
            continue;
        };
        let Some(target) = resolve_key_path(value, &input.key_path) else {
            continue;
        };

        for candidate in scalar_leaves(target) {
            if let Some(highlight) = match_candidate(condition.operator, &condition.patterns, &candidate)
            {
                return Some(MatchDescriptor {
                    operator: condition.operator.as_str().to_owned(),
                    operator_value: condition.operator_value.clone(),
                    parameters: vec![MatchParameter {
                        address: input.address.as_str().to_owned(),
                        key_path: input.key_path.clone(),
                        value: candidate,
                    }],
                    highlight: vec![highlight],
                });
            }
        }
    }
    None
}

/// 패턴 중 하나라도 매칭되면 강조 문자열을 반환합니다.
fn match_candidate(operator: Operator, patterns: &[Pattern], candidate: &str) -> Option<String> {
    let lowered = (operator == Operator::PhraseMatch).then(|| candidate.to_lowercase());

    patterns.iter().find_map(|pattern| match (operator, pattern) {
        (Operator::Equals, Pattern::Literal(p)) => (candidate == p).then(|| p.clone()),
        (Operator::Contains, Pattern::Literal(p)) => candidate.contains(p.as_str()).then(|| p.clone()),
        (Operator::StartsWith, Pattern::Literal(p)) => {
            candidate.starts_with(p.as_str()).then(|| p.clone())
        }
        (Operator::EndsWith, Pattern::Literal(p)) => {
            candidate.ends_with(p.as_str()).then(|| p.clone())
        }
        (Operator::MatchRegex, Pattern::Regex(re)) => {
            re.find(candidate).map(|m| m.as_str().to_owned())
        }
        (Operator::PhraseMatch, Pattern::Phrase(p)) => lowered
            .as_deref()
            .is_some_and(|l| l.contains(p.as_str()))
            .then(|| p.clone()),
        _ => None,
    })
}

/// key path를 따라 값 내부로 들어갑니다.
fn resolve_key_path<'a>(value: &'a Value, key_path: &[String]) -> Option<&'a Value> {
    key_path.iter().try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// 값의 스칼라 리프를 문자열로 수집합니다. 깊이와 개수에 상한이 있습니다.
fn scalar_leaves(value: &Value) -> Vec<String> {
    let mut leaves = Vec::new();
    collect_leaves(value, 0, &mut leaves);
    leaves
}

fn collect_leaves(value: &Value, depth: usize, leaves: &mut Vec<String>) {
    if depth > MAX_LEAF_DEPTH || leaves.len() >= MAX_LEAVES_PER_INPUT {
        return;
    }
    match value {
        Value::String(s) => leaves.push(s.clone()),
        Value::Number(n) => leaves.push(n.to_string()),
        Value::Bool(b) => leaves.push(b.to_string()),
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                collect_leaves(item, depth + 1, leaves);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_leaves(item, depth + 1, leaves);
            }
        }
    }
}
