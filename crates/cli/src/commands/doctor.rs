use std::path::PathBuf;

use autostream_core::config::{AppConfig, LlmProvider, LoadOptions};
use autostream_core::knowledge::KnowledgeBase;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool, config_path: Option<PathBuf>) -> CommandResult {
    let report = build_report(config_path);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::text(exit_code, output);
    }

    CommandResult::text(exit_code, render_human(&report))
}

fn build_report(config_path: Option<PathBuf>) -> DoctorReport {
    let mut checks = Vec::new();
    let options = LoadOptions {
        require_file: config_path.is_some(),
        config_path,
        ..LoadOptions::default()
    };

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_credentials(&config));
            checks.push(check_knowledge_base(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["llm_credentials", "knowledge_base"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    match config.llm.provider {
        LlmProvider::Rules => DoctorCheck {
            name: "llm_credentials",
            status: CheckStatus::Pass,
            details: "offline keyword rules in use; no credential required".to_string(),
        },
        LlmProvider::Gemini => {
            let present = config
                .llm
                .api_key
                .as_ref()
                .is_some_and(|key| !key.expose_secret().trim().is_empty());
            if present {
                DoctorCheck {
                    name: "llm_credentials",
                    status: CheckStatus::Pass,
                    details: format!("api key present for model `{}`", config.llm.model),
                }
            } else {
                DoctorCheck {
                    name: "llm_credentials",
                    status: CheckStatus::Fail,
                    details: "gemini provider selected but no api key is set".to_string(),
                }
            }
        }
    }
}

fn check_knowledge_base(config: &AppConfig) -> DoctorCheck {
    let path = &config.knowledge.path;
    match KnowledgeBase::load(path, config.knowledge.min_score) {
        Ok(loaded) if loaded.base.is_empty() => DoctorCheck {
            name: "knowledge_base",
            status: CheckStatus::Fail,
            details: format!(
                "`{}` has no usable entries ({} skipped)",
                path.display(),
                loaded.skipped.len()
            ),
        },
        Ok(loaded) => DoctorCheck {
            name: "knowledge_base",
            status: CheckStatus::Pass,
            details: format!(
                "loaded {} entries from `{}` ({} skipped)",
                loaded.base.len(),
                path.display(),
                loaded.skipped.len()
            ),
        },
        Err(error) => {
            DoctorCheck { name: "knowledge_base", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
