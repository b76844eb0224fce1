//! Tiered model router: classifies an inbound message into a cost/capability
//! tier, then selects the (provider, model) slot that tier maps to.
//!
//! Grounded on `brain::LlmProvider` for the actual completion call and on
//! `providers::{failover, rate_limiter}` for the fallback-on-unavailable and
//! backoff behavior layered on top of tier selection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, ModelsConfig};
use crate::error::{Result, RustantError};
use crate::providers::create_provider;
use crate::types::{Content, Message, Role};

/// Cost/capability tier a message is classified into before a provider is
/// selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Pure acknowledgements — answered without a model call.
    Reflex,
    /// Short factual/time queries, no tool use likely.
    Simple,
    /// Default tier: context needs, mild reasoning, 0-2 tool calls.
    Standard,
    /// Long or multi-clause messages, or an explicit planning verb.
    Complex,
    /// Message originated from voice transcription.
    Voice,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Reflex => "reflex",
            Tier::Simple => "simple",
            Tier::Standard => "standard",
            Tier::Complex => "complex",
            Tier::Voice => "voice",
        };
        write!(f, "{s}")
    }
}

/// Planning verbs whose presence pushes a message to T4 Complex regardless
/// of length.
const PLANNING_VERBS: &[&str] = &[
    "plan", "design", "architect", "migrate", "refactor", "compare", "evaluate", "investigate",
    "analyze", "strategize",
];

/// Where an inbound message originated, for tiering purposes that can't be
/// recovered from text content alone (voice transcription forces T5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Text,
    Voice,
}

/// Classify a message into a tier using the base spec's heuristics:
/// token-count thresholds, an acknowledgement/interrogative regex set, and
/// a planning-verb lexicon for T4. An `origin` of `Voice` always forces T5,
/// overriding every other heuristic.
pub fn classify(text: &str, origin: MessageOrigin) -> Tier {
    if origin == MessageOrigin::Voice {
        return Tier::Voice;
    }

    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    let word_count = trimmed.split_whitespace().count();
    let has_question = trimmed.contains('?')
        || lower.starts_with("what")
        || lower.starts_with("why")
        || lower.starts_with("how")
        || lower.starts_with("when")
        || lower.starts_with("where")
        || lower.starts_with("who");

    if word_count <= 3 && !has_question && is_acknowledgement(&lower) {
        return Tier::Reflex;
    }

    if PLANNING_VERBS.iter().any(|v| lower.contains(v)) || word_count > 120 || clause_count(trimmed) >= 3
    {
        return Tier::Complex;
    }

    if word_count <= 12 && (is_factual_query(&lower) || has_question) {
        return Tier::Simple;
    }

    Tier::Standard
}

fn is_acknowledgement(lower: &str) -> bool {
    const ACKS: &[&str] = &[
        "ok", "okay", "k", "kk", "thanks", "thank you", "thx", "ty", "got it", "cool", "great",
        "sounds good", "sure", "yep", "yes", "no", "nope", "alright", "perfect", "nice",
    ];
    ACKS.contains(&lower) || (lower.chars().all(|c| !c.is_alphanumeric() && !c.is_whitespace()))
}

fn is_factual_query(lower: &str) -> bool {
    const FACTUAL_STARTS: &[&str] = &[
        "what time", "what's the time", "what day", "what date", "how much", "how many",
        "what is", "define", "convert",
    ];
    FACTUAL_STARTS.iter().any(|p| lower.starts_with(p))
}

fn clause_count(text: &str) -> usize {
    text.matches(|c| c == '.' || c == ';' || c == ',').count() + 1
}

/// Result of a completed router dispatch: the raw provider response plus the
/// tier and cost bookkeeping the caller persists to the AuditLog.
pub struct RoutedCompletion {
    pub tier: Tier,
    pub model: String,
    pub response: crate::types::CompletionResponse,
    pub cost: crate::types::CostEstimate,
}

/// Selects a provider per tier and dispatches completions, falling back to
/// `primary` when a tier's dedicated slot is unset or fails to construct.
pub struct ModelRouter {
    primary: Arc<dyn LlmProvider>,
    fast: Option<Arc<dyn LlmProvider>>,
    complex: Option<Arc<dyn LlmProvider>>,
    voice: Option<Arc<dyn LlmProvider>>,
    enabled: bool,
}

impl ModelRouter {
    /// Build a router from the primary LLM config and the optional named
    /// slots. A provider that fails to construct (e.g. missing API key) is
    /// silently dropped to the `primary` fallback rather than failing boot —
    /// bootstrap-level fatality for "zero providers validate" is enforced by
    /// the caller checking `primary` construction before this call.
    pub fn new(primary_config: &LlmConfig, models: Option<&ModelsConfig>, routing_enabled: bool) -> Result<Self> {
        let primary = create_provider(primary_config).map_err(RustantError::Llm)?;
        let mut fast = None;
        let mut complex = None;
        let mut voice = None;
        if let Some(models) = models {
            if let Some(cfg) = &models.fast {
                fast = create_provider(cfg).ok();
            }
            if let Some(cfg) = &models.complex {
                complex = create_provider(cfg).ok();
            }
            if let Some(cfg) = &models.voice {
                voice = create_provider(cfg).ok();
            }
        }
        Ok(Self {
            primary,
            fast,
            complex,
            voice,
            enabled: routing_enabled,
        })
    }

    /// Provider selected for a given tier, falling back to `primary` when the
    /// tier has no dedicated slot or routing is disabled.
    pub fn provider_for(&self, tier: Tier) -> Arc<dyn LlmProvider> {
        if !self.enabled {
            return self.primary.clone();
        }
        match tier {
            Tier::Reflex | Tier::Standard => self.primary.clone(),
            Tier::Simple => self.fast.clone().unwrap_or_else(|| self.primary.clone()),
            Tier::Complex => self.complex.clone().unwrap_or_else(|| self.primary.clone()),
            Tier::Voice => self.voice.clone().unwrap_or_else(|| self.primary.clone()),
        }
    }

    /// Classify, select a provider, and run a full (non-streaming)
    /// completion. `Tier::Reflex` is handled by the caller before this is
    /// invoked (it is served without any model call).
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        origin: MessageOrigin,
    ) -> Result<RoutedCompletion> {
        let last_user_text = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| match &m.content {
                Content::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let tier = classify(&last_user_text, origin);
        debug!(tier = %tier, "classified inbound message");

        let provider = self.provider_for(tier);
        let model = provider.model_name().to_string();
        let request = crate::types::CompletionRequest {
            messages,
            model: Some(model.clone()),
            ..Default::default()
        };

        let response = provider.complete(request).await.map_err(|e| {
            warn!(tier = %tier, error = %e, "completion failed");
            RustantError::Llm(e)
        })?;

        let (rate_in, rate_out) = provider.cost_per_token();
        let cost = crate::types::CostEstimate {
            input_cost: response.usage.input_tokens as f64 * rate_in,
            output_cost: response.usage.output_tokens as f64 * rate_out,
        };

        Ok(RoutedCompletion {
            tier,
            model,
            response,
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reflex() {
        assert_eq!(classify("ok", MessageOrigin::Text), Tier::Reflex);
        assert_eq!(classify("thanks!", MessageOrigin::Text), Tier::Reflex);
        assert_eq!(classify("👍", MessageOrigin::Text), Tier::Reflex);
    }

    #[test]
    fn test_classify_simple() {
        assert_eq!(classify("what time is it?", MessageOrigin::Text), Tier::Simple);
        assert_eq!(classify("convert 10 miles to km", MessageOrigin::Text), Tier::Simple);
    }

    #[test]
    fn test_classify_complex_by_verb() {
        assert_eq!(
            classify("can you help me plan a migration for this service", MessageOrigin::Text),
            Tier::Complex
        );
    }

    #[test]
    fn test_classify_complex_by_length() {
        let long = "word ".repeat(130);
        assert_eq!(classify(&long, MessageOrigin::Text), Tier::Complex);
    }

    #[test]
    fn test_classify_voice_overrides_everything() {
        assert_eq!(classify("ok", MessageOrigin::Voice), Tier::Voice);
        assert_eq!(
            classify("please plan a full system migration", MessageOrigin::Voice),
            Tier::Voice
        );
    }

    #[test]
    fn test_classify_standard_default() {
        assert_eq!(
            classify("I've been thinking about the approach we took yesterday and want your take", MessageOrigin::Text),
            Tier::Standard
        );
    }
}
