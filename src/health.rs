//! Startup health checks for the local inference server.

use std::fmt;

use serde::Serialize;

use crate::llm::providers::ollama::OllamaProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => f.pad("PASS"),
            CheckStatus::Warn => f.pad("WARN"),
            CheckStatus::Fail => f.pad("FAIL"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self { name: name.into(), status, detail: detail.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn has_critical_failure(&self) -> bool {
        self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn summary_lines(&self) -> Vec<String> {
        self.checks
            .iter()
            .map(|c| format!("{:>4}  {}: {}", c.status, c.name, c.detail))
            .collect()
    }
}

/// Server reachable, text model pulled (Fail if not), vision model pulled
/// (Warn if not; vision requests will error but chat still works).
pub async fn check_local_models(client: &OllamaProvider, text_model: &str, vision_model: &str) -> HealthReport {
    let mut report = HealthReport::default();

    let models = match client.list_models().await {
        Ok(models) => models,
        Err(e) => {
            report.checks.push(CheckResult::new(
                "ollama",
                CheckStatus::Fail,
                format!("cannot reach {}: {e}", client.base_url()),
            ));
            return report;
        }
    };
    report.checks.push(CheckResult::new(
        "ollama",
        CheckStatus::Pass,
        format!("connected to {}", client.base_url()),
    ));

    for (model, missing) in [(text_model, CheckStatus::Fail), (vision_model, CheckStatus::Warn)] {
        let name = format!("model '{model}'");
        if is_pulled(&models, model) {
            report.checks.push(CheckResult::new(name, CheckStatus::Pass, "available"));
        } else {
            report.checks.push(CheckResult::new(
                name,
                missing,
                format!("not pulled, run: ollama pull {model}"),
            ));
        }
    }

    report
}

// `gemma3` matches `gemma3:latest`; `gemma3:4b` only matches exactly.
fn is_pulled(available: &[String], model: &str) -> bool {
    available.iter().any(|name| {
        name == model || (!model.contains(':') && name.split(':').next() == Some(model))
    })
}
