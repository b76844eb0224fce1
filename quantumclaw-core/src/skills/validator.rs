//! Skill security validation.
//!
//! Validates skill definitions for security risks: checks required secrets exist,
//! tool dependencies resolve, and scans for dangerous patterns.

use super::types::{SkillDefinition, SkillRiskLevel};

/// Errors from security validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required secret: {0}")]
    MissingSecret(String),
    #[error("Missing required tool: {0}")]
    MissingTool(String),
    #[error("Dangerous pattern detected: {0}")]
    DangerousPattern(String),
}

/// Result of validating a skill.
#[derive(Debug)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub risk_level: SkillRiskLevel,
    pub warnings: Vec<String>,
    pub errors: Vec<ValidationError>,
}

/// Dangerous patterns that increase risk level.
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    ("shell_exec", "Uses shell execution"),
    ("sudo", "Uses privilege escalation"),
    ("rm -rf", "Contains recursive delete"),
    ("chmod", "Modifies file permissions"),
    ("curl", "Makes network requests"),
    ("wget", "Downloads files"),
    ("eval", "Uses eval (code injection risk)"),
    ("exec", "Uses exec"),
    ("/etc/passwd", "Accesses system files"),
    ("DROP TABLE", "Contains SQL destructive command"),
];

/// Validate a skill definition for security.
pub fn validate_skill(
    skill: &SkillDefinition,
    available_tools: &[String],
    available_secrets: &[String],
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut max_risk = SkillRiskLevel::Low;

    // Check required tools
    for req in &skill.requires {
        if req.req_type == "tool" && !available_tools.contains(&req.name) {
            errors.push(ValidationError::MissingTool(req.name.clone()));
        }
    }

    // Check required secrets
    for req in &skill.requires {
        if req.req_type == "secret" && !available_secrets.contains(&req.name) {
            errors.push(ValidationError::MissingSecret(req.name.clone()));
        }
    }

    // Scan tool bodies for dangerous patterns
    for tool in &skill.tools {
        for (pattern, description) in DANGEROUS_PATTERNS {
            if tool.body.contains(pattern) {
                warnings.push(format!(
                    "Tool '{}': {} (pattern: '{}')",
                    tool.name, description, pattern
                ));
                // Escalate risk level based on pattern
                let pattern_risk = pattern_risk_level(pattern);
                if risk_priority(&pattern_risk) > risk_priority(&max_risk) {
                    max_risk = pattern_risk;
                }
            }
        }
    }

    // Check if skill has any secrets (elevates risk to at least Medium)
    let has_secrets = skill.requires.iter().any(|r| r.req_type == "secret");
    if has_secrets && risk_priority(&max_risk) < risk_priority(&SkillRiskLevel::Medium) {
        max_risk = SkillRiskLevel::Medium;
    }

    let is_valid = errors.is_empty();

    ValidationResult {
        is_valid,
        risk_level: max_risk,
        warnings,
        errors,
    }
}

/// Determine risk level for a specific dangerous pattern.
fn pattern_risk_level(pattern: &str) -> SkillRiskLevel {
    match pattern {
        "sudo" | "rm -rf" | "DROP TABLE" | "/etc/passwd" => SkillRiskLevel::Critical,
        "shell_exec" | "exec" | "eval" => SkillRiskLevel::High,
        "curl" | "wget" | "chmod" => SkillRiskLevel::Medium,
        _ => SkillRiskLevel::Low,
    }
}

/// Convert risk level to a numeric priority for comparison.
fn risk_priority(level: &SkillRiskLevel) -> u8 {
    match level {
        SkillRiskLevel::Low => 0,
        SkillRiskLevel::Medium => 1,
        SkillRiskLevel::High => 2,
        SkillRiskLevel::Critical => 3,
    }
}
