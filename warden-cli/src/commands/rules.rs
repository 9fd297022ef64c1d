//! `warden rules` command handler

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use warden_appsec::gateway::fingerprint;
use warden_appsec::rule::partition_by_registry;
use warden_appsec::{AppSecError, BuiltinWaf, RuleLoader, WafRule};

use crate::cli::{RulesAction, RulesArgs};
use crate::commands::load_config_or_default;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `rules` command.
pub async fn execute(
    args: RulesArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        RulesAction::Validate { path } => {
            let path = resolve_path(path, config_path).await?;
            execute_validate(&path, writer).await
        }
        RulesAction::List { path } => {
            let path = resolve_path(path, config_path).await?;
            execute_list(&path, writer).await
        }
    }
}

async fn resolve_path(path: Option<PathBuf>, config_path: &Path) -> Result<PathBuf, CliError> {
    match path {
        Some(path) => Ok(path),
        None => {
            let config = load_config_or_default(config_path).await?;
            Ok(PathBuf::from(config.appsec.rules_path))
        }
    }
}

async fn execute_validate(path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %path.display(), "validating detection rules");

    let rules = RuleLoader::load_path(path).await?;
    let report = validate_rules(path, rules);
    writer.render(&report)?;

    if let Some(error) = report.engine_error {
        return Err(CliError::Rule(error));
    }
    Ok(())
}

/// Run registry and engine checks the way the pipeline does at install time.
pub fn validate_rules(path: &Path, rules: Vec<WafRule>) -> RuleValidationReport {
    let total = rules.len();
    let (valid, rejected) = partition_by_registry(rules);

    let mut skipped: Vec<SkippedRule> = rejected
        .into_iter()
        .map(|e| match e {
            AppSecError::UnknownAddress { rule_id, address } => SkippedRule {
                rule_id,
                reason: format!("unknown address '{address}'"),
            },
            other => SkippedRule {
                rule_id: String::new(),
                reason: other.to_string(),
            },
        })
        .collect();

    let (installable, engine_error) = match BuiltinWaf::new(&valid) {
        Ok(engine) => {
            skipped.extend(engine.rejected_rules().iter().map(|rule_id| SkippedRule {
                rule_id: rule_id.clone(),
                reason: "failed to compile".to_owned(),
            }));
            (engine.rule_count(), None)
        }
        Err(e) => {
            warn!(error = %e, "rules failed to compile");
            (0, Some(e.to_string()))
        }
    };

    RuleValidationReport {
        path: path.display().to_string(),
        total,
        installable,
        skipped,
        engine_error,
    }
}

async fn execute_list(path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %path.display(), "loading detection rules");

    let rules = RuleLoader::load_path(path).await?;
    let report = RuleListReport {
        total: rules.len(),
        rules: rules.iter().map(RuleEntry::from_rule).collect(),
    };
    writer.render(&report)
}

#[derive(Serialize)]
pub struct RuleValidationReport {
    pub path: String,
    pub total: usize,
    pub installable: usize,
    pub skipped: Vec<SkippedRule>,
    pub engine_error: Option<String>,
}

#[derive(Serialize)]
pub struct SkippedRule {
    pub rule_id: String,
    pub reason: String,
}

impl Render for RuleValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Rule Validation: {}", self.path.bold())?;
        writeln!(w, "  Total:       {}", self.total)?;
        writeln!(w, "  Installable: {}", self.installable.to_string().green())?;
        writeln!(w, "  Skipped:     {}", self.skipped.len().to_string().yellow())?;

        for rule in &self.skipped {
            writeln!(w, "    - {}: {}", rule.rule_id, rule.reason)?;
        }

        match &self.engine_error {
            Some(error) => writeln!(w, "{} engine rejected rules: {}", "✗".red(), error)?,
            None => writeln!(w, "{} rules compile", "✓".green())?,
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct RuleListReport {
    pub total: usize,
    pub rules: Vec<RuleEntry>,
}

#[derive(Serialize)]
pub struct RuleEntry {
    pub id: String,
    pub name: String,
    pub rule_type: Option<String>,
    pub category: Option<String>,
    pub addresses: Option<String>,
}

impl RuleEntry {
    fn from_rule(rule: &WafRule) -> Self {
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            rule_type: rule.rule_type().map(str::to_owned),
            category: rule.category().map(str::to_owned),
            addresses: rule.addresses().ok().map(|a| fingerprint(&a)),
        }
    }
}

impl Render for RuleListReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Detection Rules ({} total)", self.total.to_string().bold())?;
        writeln!(w)?;
        writeln!(
            w,
            "{:<24} {:<20} {:<16} {}",
            "ID", "Type", "Category", "Addresses"
        )?;
        writeln!(w, "{}", "-".repeat(84))?;

        for rule in &self.rules {
            let addresses = match &rule.addresses {
                Some(a) => a.normal(),
                None => "(unknown address)".red(),
            };
            writeln!(
                w,
                "{:<24} {:<20} {:<16} {}",
                rule.id,
                rule.rule_type.as_deref().unwrap_or("-"),
                rule.category.as_deref().unwrap_or("-"),
                addresses
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
- id: ua-scanner
  name: Scanner
  tags: {type: security_scanner, category: attack_attempt}
  conditions:
    - operator: phrase_match
      inputs: ["http.headers:user-agent"]
      value: [nikto]
- id: body-xss
  name: Body XSS
  conditions:
    - operator: contains
      inputs: [server.request.body]
      value: "<script>"
"#;

    #[test]
    fn test_validate_reports_skipped_rules() {
        let rules = RuleLoader::parse_yaml(RULES, "rules.yml").unwrap();
        let report = validate_rules(Path::new("rules.yml"), rules);
        assert_eq!(report.total, 2);
        assert_eq!(report.installable, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].rule_id, "body-xss");
        assert!(report.engine_error.is_none());
    }

    #[test]
    fn test_validate_reports_engine_error() {
        let rules = RuleLoader::parse_yaml(
            r#"
- id: broken
  name: Broken
  conditions:
    - operator: match_regex
      inputs: [http.url]
      value: "[unclosed"
"#,
            "broken.yml",
        )
        .unwrap();
        let report = validate_rules(Path::new("broken.yml"), rules);
        assert_eq!(report.installable, 0);
        assert!(report.engine_error.is_some());
    }

    #[test]
    fn test_validate_skips_uncompilable_rule() {
        let mut yaml = RULES.to_owned();
        yaml.push_str(
            r#"
- id: broken
  name: Broken
  conditions:
    - operator: match_regex
      inputs: [http.url]
      value: "[unclosed"
"#,
        );
        let rules = RuleLoader::parse_yaml(&yaml, "rules.yml").unwrap();
        let report = validate_rules(Path::new("rules.yml"), rules);
        assert_eq!(report.total, 3);
        assert_eq!(report.installable, 1);
        assert!(report.engine_error.is_none());
        assert!(report.skipped.iter().any(|s| s.rule_id == "broken"));
    }

    #[test]
    fn test_list_entry_shows_fingerprint() {
        let rules = RuleLoader::parse_yaml(RULES, "rules.yml").unwrap();
        let entry = RuleEntry::from_rule(&rules[0]);
        assert_eq!(entry.addresses.as_deref(), Some("http.headers"));
        assert_eq!(entry.rule_type.as_deref(), Some("security_scanner"));
        assert!(RuleEntry::from_rule(&rules[1]).addresses.is_none());
    }
}
