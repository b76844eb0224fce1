//! TrustKernel — an immutable hard/soft/forbidden-contacts rule engine
//! parsed from a `VALUES.md` policy file.
//!
//! Reuses the tool-call matching idiom from [`crate::safety::Predicate`]
//! for soft-rule advisory matching, but the rule *sets* themselves are
//! loaded once at boot and never mutated in place — `reload()` does not
//! exist as a method; callers construct a fresh `TrustKernel::load(..)`
//! and swap it in behind an `Arc`.

use crate::audit::AuditLog;
use crate::safety::{ActionDetails, ActionRequest};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustRuleKind {
    Hard,
    Soft,
    ForbiddenContact,
}

#[derive(Debug, Clone)]
pub struct TrustRule {
    pub kind: TrustRuleKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustOutcome {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
pub struct TrustDecision {
    pub outcome: TrustOutcome,
    pub reason: Option<String>,
    pub advisories: Vec<String>,
}

impl TrustDecision {
    fn allow() -> Self {
        Self {
            outcome: TrustOutcome::Allow,
            reason: None,
            advisories: Vec::new(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            outcome: TrustOutcome::Deny,
            reason: Some(reason.into()),
            advisories: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrustKernelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Context a tool action is evaluated against — the contact the action
/// would reach, if any (a `ChannelReply` recipient or similar).
#[derive(Debug, Clone, Default)]
pub struct TrustContext {
    pub contact: Option<String>,
}

/// Hard/soft/forbidden-contacts rule sets, loaded once at boot and never
/// mutated thereafter.
pub struct TrustKernel {
    hard: Arc<[TrustRule]>,
    soft: Arc<[TrustRule]>,
    forbidden_contacts: Arc<[String]>,
}

impl TrustKernel {
    /// Parse `VALUES.md`: a `## Hard Rules`, `## Soft Rules`, and
    /// `## Forbidden Contacts` section, one rule per bullet line. Missing
    /// sections are treated as empty, not an error.
    pub fn load(path: &Path) -> Result<Self, TrustKernelError> {
        let text = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let mut hard = Vec::new();
        let mut soft = Vec::new();
        let mut forbidden_contacts = Vec::new();
        let mut section = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(heading) = trimmed.strip_prefix("## ") {
                section = match heading.to_ascii_lowercase().as_str() {
                    "hard rules" => Some(TrustRuleKind::Hard),
                    "soft rules" => Some(TrustRuleKind::Soft),
                    "forbidden contacts" => Some(TrustRuleKind::ForbiddenContact),
                    _ => None,
                };
                continue;
            }
            let Some(bullet) = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
            else {
                continue;
            };
            match section {
                Some(TrustRuleKind::Hard) => hard.push(TrustRule {
                    kind: TrustRuleKind::Hard,
                    text: bullet.to_string(),
                }),
                Some(TrustRuleKind::Soft) => soft.push(TrustRule {
                    kind: TrustRuleKind::Soft,
                    text: bullet.to_string(),
                }),
                Some(TrustRuleKind::ForbiddenContact) => {
                    forbidden_contacts.push(bullet.trim().to_string())
                }
                None => {}
            }
        }

        Ok(Self {
            hard: hard.into(),
            soft: soft.into(),
            forbidden_contacts: forbidden_contacts.into(),
        })
    }

    pub fn hard_rules(&self) -> &[TrustRule] {
        &self.hard
    }

    pub fn soft_rules(&self) -> &[TrustRule] {
        &self.soft
    }

    /// Evaluate an action. Order: (a) hard rules — matched against the
    /// action via [`action_violates`] (literal wording or known intent
    /// synonyms) denies outright, (b) forbidden-contacts — denies if the
    /// context's contact matches, (c) soft rules are advisory only and
    /// never deny.
    pub async fn check(
        &self,
        action: &ActionRequest,
        context: &TrustContext,
        audit: &AuditLog,
    ) -> TrustDecision {
        for rule in self.hard.iter() {
            if action_violates(action, &rule.text) {
                let decision = TrustDecision::deny(format!("hard rule violated: {}", rule.text));
                audit
                    .log(
                        "trust_kernel",
                        "deny",
                        decision.reason.clone().unwrap_or_default(),
                        None,
                    )
                    .await;
                return decision;
            }
        }

        if let Some(contact) = &context.contact {
            if self
                .forbidden_contacts
                .iter()
                .any(|forbidden| forbidden.eq_ignore_ascii_case(contact))
            {
                let decision = TrustDecision::deny(format!("contact '{contact}' is forbidden"));
                audit
                    .log(
                        "trust_kernel",
                        "deny",
                        decision.reason.clone().unwrap_or_default(),
                        None,
                    )
                    .await;
                return decision;
            }
        }

        let mut decision = TrustDecision::allow();
        for rule in self.soft.iter() {
            if action_violates(action, &rule.text) {
                decision.advisories.push(rule.text.clone());
            }
        }
        decision
    }
}

/// Rule wording -> the literal command/argument fragments that actually
/// carry out that intent. A `VALUES.md` rule is written in plain English
/// ("never delete data"); the tool calls it must catch are not ("rm -rf
/// workspace") — without this table a hard rule can only ever catch a
/// tool call that repeats the rule's own words verbatim.
const INTENT_SYNONYMS: &[(&[&str], &[&str])] = &[
    (
        &[
            "delete", "deletes", "deleting", "deleted", "erase", "erases", "erasing", "erased",
            "destroy", "destroys", "destroying", "destroyed", "remove", "removes", "removing",
            "removed", "wipe", "wipes", "wiping", "wiped", "purge", "purges", "purging", "purged",
        ],
        &["rm ", "rm\t", "rmdir", "unlink", "shred ", "del ", "truncate"],
    ),
    (
        &["format", "formats", "formatting", "formatted"],
        &["mkfs", "format "],
    ),
    (
        &["overwrite", "overwrites", "overwriting", "overwritten"],
        &["dd if=", "dd of=", "truncate", ">"],
    ),
    (
        &[
            "email", "emails", "emailing", "emailed", "message", "messages", "messaging",
            "messaged", "contact", "contacts", "contacting", "contacted",
        ],
        &["send", "email", "smtp", "message"],
    ),
];

/// Whether `action` violates a rule written as free-form text (`rule_text`).
///
/// First tries a literal substring match (a rule that already names the
/// exact command, e.g. `"rm -rf"`, still matches directly). If that fails,
/// falls back to intent matching: a rule that *mentions* an intent (e.g.
/// "delete") matches an action whose command/args contain one of that
/// intent's known literal forms (e.g. `"rm "`), via [`INTENT_SYNONYMS`].
fn action_violates(action: &ActionRequest, rule_text: &str) -> bool {
    let haystack = match &action.details {
        ActionDetails::ChannelReply { recipient, preview, .. } => {
            format!("{recipient} {preview}")
        }
        ActionDetails::ShellCommand { command } => command.clone(),
        ActionDetails::Other { info } => info.clone(),
        _ => action.description.clone(),
    }
    .to_ascii_lowercase();
    let rule_lower = rule_text.to_ascii_lowercase();

    if haystack.contains(&rule_lower) {
        return true;
    }

    INTENT_SYNONYMS.iter().any(|(rule_words, action_words)| {
        rule_words.iter().any(|w| rule_lower.contains(w))
            && action_words.iter().any(|w| haystack.contains(w))
    })
}
