// orchestrator-service-rs/src/naming.rs
// Branch names, commit messages and review request text for a failure

use sha2::{Digest, Sha256};
use shared_types_rs::{Failure, RemediationFix};

const SLUG_LEN: usize = 50;

// Only `[a-z0-9-]` survives, so the result is always a valid ref component.
fn slug(text: &str) -> String {
    let mut out = String::with_capacity(SLUG_LEN);
    for c in text.chars().flat_map(char::to_lowercase) {
        if out.len() == SLUG_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "failure".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `terrafix/{slug}-{8 hex chars of sha256(test id)}`. Stable for a failure
/// so that concurrent publishers collide on the same branch.
pub fn branch_name(failure: &Failure) -> String {
    let digest = hex::encode(Sha256::digest(failure.id.as_bytes()));
    format!("terrafix/{}-{}", slug(failure.display_name()), &digest[..8])
}

pub fn commit_message(failure: &Failure) -> String {
    format!(
        "fix(compliance): {name}\n\n\
         Automated fix generated by TerraFix to address a compliance failure.\n\n\
         Test: {name}\n\
         Framework: {framework}\n\
         Severity: {severity}\n\
         Resource: {arn}\n",
        name = failure.display_name(),
        framework = failure.framework,
        severity = failure.severity,
        arn = failure.resource_arn,
    )
}

pub fn review_title(failure: &Failure) -> String {
    format!("[TerraFix] {}", failure.display_name())
}

pub fn review_body(failure: &Failure, fix: &RemediationFix, file_path: &str) -> String {
    let mut body = format!(
        "Compliance failure **{}** on `{}`.\n\n\
         - Framework: {}\n\
         - Severity: {}\n\
         - File: `{}`\n\
         - Confidence: {}\n",
        failure.display_name(),
        failure.resource_arn,
        failure.framework,
        failure.severity,
        file_path,
        fix.confidence,
    );
    if !fix.changed_attributes.is_empty() {
        body.push_str(&format!("- Changed: {}\n", fix.changed_attributes.join(", ")));
    }
    if !fix.explanation.trim().is_empty() {
        body.push_str("\n");
        body.push_str(fix.explanation.trim());
        body.push('\n');
    }
    body
}

pub fn labels(failure: &Failure) -> Vec<String> {
    vec![
        "compliance".to_string(),
        "automated".to_string(),
        "terrafix".to_string(),
        format!("severity:{}", failure.severity),
        format!("framework:{}", failure.framework.to_lowercase()),
    ]
}
