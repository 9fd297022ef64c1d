//! 룰 파일 로더 -- YAML/JSON 룰 파일을 디스크에서 로드합니다.
//!
//! 룰 디렉토리 내의 `.yml`/`.yaml`/`.json` 파일을 스캔하고 파싱합니다.
//! 개별 파일 파싱 실패는 경고 로그를 남기고 건너뜁니다.
//!
//! 파일 하나는 `{version, rules: [...]}` 문서, 룰 목록, 또는 단일 룰일 수 있습니다.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::AppSecError;

use super::types::WafRule;

/// 룰 파일 최대 크기
const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
/// 최대 룰 수
const MAX_RULES_COUNT: usize = 10_000;

/// 룰 파일 문서 형식
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleDocument {
    Versioned {
        #[serde(default)]
        version: Option<String>,
        rules: Vec<WafRule>,
    },
    List(Vec<WafRule>),
    Single(WafRule),
}

impl RuleDocument {
    fn into_rules(self) -> (Option<String>, Vec<WafRule>) {
        match self {
            RuleDocument::Versioned { version, rules } => (version, rules),
            RuleDocument::List(rules) => (None, rules),
            RuleDocument::Single(rule) => (None, vec![rule]),
        }
    }
}

/// 룰 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 디렉토리에서 모든 룰 파일을 로드합니다.
    ///
    /// 개별 파일 로딩 실패와 중복 ID는 경고 로그를 남기고 건너뜁니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 룰 수가 `MAX_RULES_COUNT`를 초과하는 경우
    pub async fn load_directory(dir: impl AsRef<Path>) -> Result<Vec<WafRule>, AppSecError> {
        let dir = dir.as_ref();

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| AppSecError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory: {e}"),
            })?;

        // 로딩 순서를 결정적으로 유지
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppSecError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory entry: {e}"),
            })?
        {
            let path = entry.path();
            if is_rule_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut rules = Vec::new();
        let mut seen_ids = HashSet::new();

        for path in paths {
            let loaded = match Self::load_file(&path).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load rule file, skipping"
                    );
                    continue;
                }
            };

            for rule in loaded {
                if !seen_ids.insert(rule.id.clone()) {
                    tracing::warn!(
                        rule_id = %rule.id,
                        path = %path.display(),
                        "duplicate rule id, skipping"
                    );
                    continue;
                }
                rules.push(rule);
            }

            if rules.len() > MAX_RULES_COUNT {
                return Err(AppSecError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("too many rules: max {MAX_RULES_COUNT}"),
                });
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = rules.len(),
            "loaded detection rules"
        );

        Ok(rules)
    }

    /// 경로가 디렉토리면 [`load_directory`](Self::load_directory),
    /// 파일이면 [`load_file`](Self::load_file)로 로드합니다.
    pub async fn load_path(path: impl AsRef<Path>) -> Result<Vec<WafRule>, AppSecError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| AppSecError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read metadata: {e}"),
            })?;

        if metadata.is_dir() {
            Self::load_directory(path).await
        } else {
            Self::load_file(path).await
        }
    }

    /// 단일 룰 파일을 로드합니다. 확장자가 `.json`이면 JSON, 그 외는 YAML로 파싱합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<WafRule>, AppSecError> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| AppSecError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(AppSecError::RuleLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppSecError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file: {e}"),
            })?;

        let source = path.display().to_string();
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::parse_json(&content, &source)
        } else {
            Self::parse_yaml(&content, &source)
        }
    }

    /// YAML 문자열을 파싱하여 룰을 생성합니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<Vec<WafRule>, AppSecError> {
        let document: RuleDocument =
            serde_yaml::from_str(yaml_str).map_err(|e| AppSecError::RuleLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;
        Self::finish(document, source)
    }

    /// JSON 문자열을 파싱하여 룰을 생성합니다.
    pub fn parse_json(json_str: &str, source: &str) -> Result<Vec<WafRule>, AppSecError> {
        let document: RuleDocument =
            serde_json::from_str(json_str).map_err(|e| AppSecError::RuleLoad {
                path: source.to_owned(),
                reason: format!("JSON parse error: {e}"),
            })?;
        Self::finish(document, source)
    }

    fn finish(document: RuleDocument, source: &str) -> Result<Vec<WafRule>, AppSecError> {
        let (version, rules) = document.into_rules();
        let rules: Vec<WafRule> = rules
            .into_iter()
            .filter(|rule| match rule.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(source, rule_id = %rule.id, error = %e, "invalid rule skipped");
                    false
                }
            })
            .collect();
        tracing::debug!(
            source,
            version = version.as_deref().unwrap_or("-"),
            count = rules.len(),
            "parsed rule file"
        );
        Ok(rules)
    }
}

fn is_rule_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yml" || ext == "yaml" || ext == "json")
}
