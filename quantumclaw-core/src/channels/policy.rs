//! Per-channel ingress policy: DM pairing/allowlist gating, group mention
//! filtering, and deterministic slash-command interception.
//!
//! This sits between a [`Channel`](super::Channel) adapter's raw inbound
//! messages and agent dispatch. Slash-commands never reach the model; they
//! are answered here. Everything else either gets admitted to the agent
//! loop, triggers a pairing code, or is silently dropped.

use crate::config::{ChannelPolicy, DmPolicy};
use crate::pairing::{PairingRequest, PairingStore};
use regex::Regex;

/// Context an adapter supplies about the message being evaluated, beyond
/// the raw text — things only the adapter can know (was the bot mentioned,
/// is this a reply to one of the bot's own messages).
#[derive(Debug, Clone, Copy, Default)]
pub struct IngressContext<'a> {
    pub is_direct_message: bool,
    pub mentioned: bool,
    pub reply_to_bot: bool,
    pub channel_id: &'a str,
}

/// Outcome of evaluating an inbound message against channel policy.
#[derive(Debug, Clone)]
pub enum IngressDecision {
    /// Dispatch to the agent loop.
    Admit,
    /// A slash-command was intercepted; reply with this text, no LLM call.
    SlashCommand(SlashCommand),
    /// An unknown DM user on a `pairing`-gated channel sent `/start` (or
    /// any message); a code was minted and should be sent back to them.
    PairingIssued(PairingRequest),
    /// Message silently dropped — unlisted user, policy disabled, or a
    /// group message that matched no mention condition.
    Dropped,
}

/// Deterministic slash-commands intercepted before agent dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Status,
    Model,
    Reset,
    Memory,
    Cost,
    Whoami,
}

impl SlashCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let cmd = text.trim().split_whitespace().next()?;
        match cmd {
            "/help" => Some(Self::Help),
            "/status" => Some(Self::Status),
            "/model" => Some(Self::Model),
            "/reset" => Some(Self::Reset),
            "/memory" => Some(Self::Memory),
            "/cost" => Some(Self::Cost),
            "/whoami" => Some(Self::Whoami),
            _ => None,
        }
    }

    /// Stable name, used in audit log entries.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Status => "status",
            Self::Model => "model",
            Self::Reset => "reset",
            Self::Memory => "memory",
            Self::Cost => "cost",
            Self::Whoami => "whoami",
        }
    }
}

/// Evaluate an inbound direct message against a channel's DM policy.
///
/// `user_id` must already be known to belong to a DM (not a group) context;
/// group routing goes through [`should_admit_group_message`] instead.
pub fn evaluate_dm(
    policy: &ChannelPolicy,
    pairing: &PairingStore,
    channel_name: &str,
    user_id: &str,
    username: &str,
    chat_id: &str,
    text: &str,
) -> IngressDecision {
    if !policy.enabled {
        return IngressDecision::Dropped;
    }

    if let Some(cmd) = SlashCommand::parse(text) {
        return IngressDecision::SlashCommand(cmd);
    }

    match policy.dm_policy {
        DmPolicy::Disabled => IngressDecision::Dropped,
        DmPolicy::Open => IngressDecision::Admit,
        DmPolicy::Allowlist => {
            if policy.allowed_users.iter().any(|u| u == user_id) {
                IngressDecision::Admit
            } else {
                IngressDecision::Dropped
            }
        }
        DmPolicy::Pairing => {
            if policy.allowed_users.iter().any(|u| u == user_id) {
                return IngressDecision::Admit;
            }
            match pairing.create(channel_name, user_id, username, chat_id) {
                Ok(req) => IngressDecision::PairingIssued(req),
                Err(_) => IngressDecision::Dropped,
            }
        }
    }
}

/// Whether a group/channel message should be admitted to the agent loop.
///
/// Per the resolved precedence, `allowedChannels` membership and the
/// mention conditions (`@mention`, reply-to-bot, `mentionPatterns` match)
/// are OR'd: any one of them alone admits the message.
pub fn should_admit_group_message(
    policy: &ChannelPolicy,
    ctx: &IngressContext<'_>,
    text: &str,
) -> bool {
    if !policy.enabled {
        return false;
    }
    if policy.allowed_channels.iter().any(|c| c == ctx.channel_id) {
        return true;
    }
    if ctx.mentioned || ctx.reply_to_bot {
        return true;
    }
    policy.mention_patterns.iter().any(|pattern| {
        Regex::new(pattern)
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    })
}

/// Route an inbound message (DM or group) through slash-command
/// interception, then DM or group ingress policy as appropriate.
pub fn evaluate_ingress(
    policy: &ChannelPolicy,
    pairing: &PairingStore,
    channel_name: &str,
    ctx: &IngressContext<'_>,
    user_id: &str,
    username: &str,
    chat_id: &str,
    text: &str,
) -> IngressDecision {
    if ctx.is_direct_message {
        evaluate_dm(policy, pairing, channel_name, user_id, username, chat_id, text)
    } else if let Some(cmd) = SlashCommand::parse(text) {
        IngressDecision::SlashCommand(cmd)
    } else if should_admit_group_message(policy, ctx, text) {
        IngressDecision::Admit
    } else {
        IngressDecision::Dropped
    }
}

/// Render the deterministic reply text for a slash-command. Callers that
/// have richer context (degradation level, cost summary, conversation
/// cursor) may build a more detailed response; this gives a safe default
/// for every command without needing that context wired through.
pub fn default_response(cmd: SlashCommand, agent_name: &str) -> String {
    match cmd {
        SlashCommand::Help => {
            "Commands: /help /status /model /reset /memory /cost /whoami".to_string()
        }
        SlashCommand::Status => format!("{agent_name} is online."),
        SlashCommand::Model => "Routing is tier-based; see config for the active models.".into(),
        SlashCommand::Reset => "Conversation context has been reset.".into(),
        SlashCommand::Memory => "Memory search runs against the knowledge and structured stores.".into(),
        SlashCommand::Cost => "See the dashboard cost summary for today/week/month totals.".into(),
        SlashCommand::Whoami => format!("You are chatting with {agent_name}."),
    }
}
