//! `cross_channel_send` — lets an agent push a message out to a channel
//! other than the one the current turn arrived on, wrapping
//! `ChannelManager::send_to`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quantumclaw_core::channels::{ChannelMessage, ChannelType, ChannelUser};
use quantumclaw_core::channels::manager::ChannelManager;
use quantumclaw_core::error::ToolError;
use quantumclaw_core::types::{RiskLevel, ToolOutput};

use crate::registry::Tool;

fn parse_channel_type(s: &str) -> Option<ChannelType> {
    match s.to_ascii_lowercase().as_str() {
        "telegram" => Some(ChannelType::Telegram),
        "discord" => Some(ChannelType::Discord),
        "slack" => Some(ChannelType::Slack),
        "webchat" => Some(ChannelType::WebChat),
        "matrix" => Some(ChannelType::Matrix),
        "signal" => Some(ChannelType::Signal),
        "whatsapp" => Some(ChannelType::WhatsApp),
        "email" => Some(ChannelType::Email),
        "irc" => Some(ChannelType::Irc),
        "webhook" => Some(ChannelType::Webhook),
        "sms" => Some(ChannelType::Sms),
        "teams" => Some(ChannelType::Teams),
        "imessage" => Some(ChannelType::IMessage),
        _ => None,
    }
}

/// Sends a message to a specific registered channel, independent of which
/// channel the current conversation turn is running on.
pub struct CrossChannelSendTool {
    channels: Arc<ChannelManager>,
}

impl CrossChannelSendTool {
    pub fn new(channels: Arc<ChannelManager>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl Tool for CrossChannelSendTool {
    fn name(&self) -> &str {
        "cross_channel_send"
    }

    fn description(&self) -> &str {
        "Send a text message to a specific registered channel (by its configured name), \
         regardless of which channel the current conversation is running on."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "channel_name": {
                    "type": "string",
                    "description": "The registered name of the destination channel, e.g. 'slack' or 'telegram'"
                },
                "channel_type": {
                    "type": "string",
                    "enum": ["telegram", "discord", "slack", "webchat", "matrix", "signal",
                             "whatsapp", "email", "irc", "webhook", "sms", "teams", "imessage"],
                    "description": "The platform type of the destination channel"
                },
                "channel_id": {
                    "type": "string",
                    "description": "The platform-specific conversation/room/chat id to send into"
                },
                "text": {
                    "type": "string",
                    "description": "The message text to send"
                }
            },
            "required": ["channel_name", "channel_type", "channel_id", "text"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let channel_name =
            args["channel_name"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments {
                    name: "cross_channel_send".into(),
                    reason: "'channel_name' is required".into(),
                })?;
        let channel_type_str =
            args["channel_type"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments {
                    name: "cross_channel_send".into(),
                    reason: "'channel_type' is required".into(),
                })?;
        let channel_type = parse_channel_type(channel_type_str).ok_or_else(|| {
            ToolError::InvalidArguments {
                name: "cross_channel_send".into(),
                reason: format!("unknown channel_type '{channel_type_str}'"),
            }
        })?;
        let channel_id =
            args["channel_id"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments {
                    name: "cross_channel_send".into(),
                    reason: "'channel_id' is required".into(),
                })?;
        let text = args["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments {
                name: "cross_channel_send".into(),
                reason: "'text' is required".into(),
            })?;

        let sender = ChannelUser::new("agent", channel_type);
        let msg = ChannelMessage::text(channel_type, channel_id, sender, text);

        let message_id = self
            .channels
            .send_to(channel_name, msg)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "cross_channel_send".into(),
                message: e.to_string(),
            })?;

        Ok(ToolOutput::text(format!(
            "sent to '{channel_name}' (message id {})",
            message_id.0
        )))
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Network
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}
