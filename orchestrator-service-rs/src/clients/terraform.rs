//! Terraform-native validation of generated fixes.
//!
//! The fixed file is written into a scratch module together with the
//! provider and version files of its original directory, then run through
//! `terraform fmt`, `init` and `validate`. A host without terraform passes
//! with a warning.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use error_handling_rs::{Error, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{run_command, CommandError};
use crate::collaborators::{ValidationOutcome, Validator};

const FMT_TIMEOUT: Duration = Duration::from_secs(60);
const INIT_TIMEOUT: Duration = Duration::from_secs(300);
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Files carried over from the module directory so providers resolve.
const SUPPORT_FILES: [&str; 5] = [
    "versions.tf",
    "providers.tf",
    "terraform.tf",
    "variables.tf",
    ".terraform.lock.hcl",
];

#[derive(Debug, Default, Deserialize)]
struct ValidateReport {
    #[serde(default = "default_true")]
    valid: bool,
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize)]
struct Diagnostic {
    #[serde(default = "default_severity")]
    severity: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    detail: String,
}

fn default_true() -> bool {
    true
}

fn default_severity() -> String {
    "error".to_string()
}

impl Diagnostic {
    fn message(&self) -> String {
        if self.detail.is_empty() {
            self.summary.clone()
        } else {
            format!("{}: {}", self.summary, self.detail)
        }
    }
}

/// Splits `terraform validate -json` output into errors and warnings.
fn interpret_report(stdout: &str) -> Result<(Vec<String>, Vec<String>)> {
    let report: ValidateReport = serde_json::from_str(stdout)
        .map_err(|e| Error::validation(format!("Unreadable terraform validate output: {}", e)))?;

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for diagnostic in &report.diagnostics {
        if diagnostic.severity == "warning" {
            warnings.push(diagnostic.message());
        } else {
            errors.push(diagnostic.message());
        }
    }
    if !report.valid && errors.is_empty() {
        errors.push("configuration is invalid".to_string());
    }
    Ok((errors, warnings))
}

pub struct TerraformValidator {
    binary: String,
}

impl TerraformValidator {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    pub fn from_config(config: &config_rs::ServiceConfig) -> Self {
        Self::new(&config.terraform_binary)
    }

    fn unavailable(&self, content: &str) -> ValidationOutcome {
        warn!(binary = %self.binary, "terraform not available, skipping validation");
        ValidationOutcome {
            content: content.to_string(),
            warnings: vec![format!("{} not available; validation skipped", self.binary)],
        }
    }
}

async fn copy_support_files(module_dir: &Path, scratch: &Path) {
    for name in SUPPORT_FILES {
        let source = module_dir.join(name);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            continue;
        }
        if let Err(e) = tokio::fs::copy(&source, scratch.join(name)).await {
            warn!(file = %name, error = %e, "Failed to copy provider file");
        }
    }
}

#[async_trait]
impl Validator for TerraformValidator {
    async fn validate(
        &self,
        content: &str,
        file_name: &str,
        module_dir: &Path,
    ) -> Result<ValidationOutcome> {
        let scratch = tempfile::Builder::new().prefix("terrafix-validate-").tempdir()?;
        copy_support_files(module_dir, scratch.path()).await;

        let file_path = scratch.path().join(file_name);
        tokio::fs::write(&file_path, content).await?;
        let file_arg = file_path.to_string_lossy().into_owned();

        // fmt
        let fmt = match run_command(&self.binary, &["fmt", "-write=true", &file_arg], Some(scratch.path()), FMT_TIMEOUT).await {
            Ok(output) => output,
            Err(CommandError::NotInstalled { .. }) => return Ok(self.unavailable(content)),
            Err(CommandError::TimedOut { timeout, .. }) => {
                return Err(Error::timeout(format!("terraform fmt timed out after {:?}", timeout)))
            }
            Err(e) => return Err(Error::validation(e.to_string())),
        };
        if !fmt.success {
            return Err(Error::validation(format!("terraform fmt failed: {}", fmt.stderr.trim())));
        }
        let formatted = tokio::fs::read_to_string(&file_path).await?;
        debug!(file = %file_name, "terraform fmt succeeded");

        // init
        let init = run_command(
            &self.binary,
            &["init", "-backend=false", "-input=false", "-no-color"],
            Some(scratch.path()),
            INIT_TIMEOUT,
        )
        .await;
        let init_problem = match init {
            Ok(output) if output.success => None,
            Ok(output) => Some(output.stderr.chars().take(200).collect::<String>()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(problem) = init_problem {
            warn!(error = %problem.trim(), "terraform init failed, skipping validate");
            return Ok(ValidationOutcome {
                content: formatted,
                warnings: vec![format!("Skipped validate: terraform init failed: {}", problem.trim())],
            });
        }

        // validate
        let validate = match run_command(&self.binary, &["validate", "-json"], Some(scratch.path()), VALIDATE_TIMEOUT).await {
            Ok(output) => output,
            Err(CommandError::TimedOut { timeout, .. }) => {
                return Err(Error::timeout(format!("terraform validate timed out after {:?}", timeout)))
            }
            Err(e) => return Err(Error::validation(e.to_string())),
        };
        let (errors, warnings) = interpret_report(&validate.stdout)?;
        if !errors.is_empty() {
            return Err(Error::validation(format!("terraform validate failed: {}", errors.join("; ")))
                .context("diagnostics", &errors));
        }

        info!(file = %file_name, warnings = warnings.len(), "terraform validate succeeded");
        Ok(ValidationOutcome {
            content: formatted,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_handling_rs::ErrorKind;

    #[test]
    fn report_splits_errors_and_warnings() {
        let stdout = r#"{"valid":false,"diagnostics":[
            {"severity":"error","summary":"Unsupported argument","detail":"acl is not expected here"},
            {"severity":"warning","summary":"Deprecated","detail":""}
        ]}"#;
        let (errors, warnings) = interpret_report(stdout).unwrap();
        assert_eq!(errors, vec!["Unsupported argument: acl is not expected here"]);
        assert_eq!(warnings, vec!["Deprecated"]);
    }

    #[test]
    fn invalid_report_without_diagnostics_is_an_error() {
        let (errors, _) = interpret_report(r#"{"valid":false}"#).unwrap();
        assert_eq!(errors.len(), 1);
        let (errors, warnings) = interpret_report(r#"{"valid":true,"diagnostics":[]}"#).unwrap();
        assert!(errors.is_empty() && warnings.is_empty());
    }

    #[test]
    fn garbage_report_is_a_validation_error() {
        let err = interpret_report("Error: oh no").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_binary_passes_with_warning() {
        let module = tempfile::tempdir().unwrap();
        let validator = TerraformValidator::new("terrafix-no-such-terraform");
        let outcome = validator
            .validate("resource \"aws_s3_bucket\" \"a\" {}\n", "main.tf", module.path())
            .await
            .unwrap();
        assert_eq!(outcome.content, "resource \"aws_s3_bucket\" \"a\" {}\n");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("validation skipped"));
    }
}
