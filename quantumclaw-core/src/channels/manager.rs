//! Channel manager — registers, connects, polls, and broadcasts across channels.

use super::{
    Channel, ChannelCapabilities, ChannelMessage, ChannelStatus, ChannelUser, MessageId,
    StreamingMode,
};
use crate::config::ChannelsConfig;
use crate::error::{ChannelError, RustantError};
use std::collections::HashMap;

/// Manages a set of registered channels.
pub struct ChannelManager {
    channels: HashMap<String, Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel by name.
    pub fn register(&mut self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        self.channels.insert(name, channel);
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// List all registered channel names.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(|k| k.as_str()).collect()
    }

    /// Get the status of a channel by name.
    pub fn channel_status(&self, name: &str) -> Option<ChannelStatus> {
        self.channels.get(name).map(|c| c.status())
    }

    /// Connect all registered channels.
    pub async fn connect_all(&mut self) -> Vec<(String, Result<(), RustantError>)> {
        let mut results = Vec::new();
        for (name, channel) in &mut self.channels {
            let result = channel.connect().await;
            results.push((name.clone(), result));
        }
        results
    }

    /// Disconnect all registered channels.
    pub async fn disconnect_all(&mut self) -> Vec<(String, Result<(), RustantError>)> {
        let mut results = Vec::new();
        for (name, channel) in &mut self.channels {
            let result = channel.disconnect().await;
            results.push((name.clone(), result));
        }
        results
    }

    /// Broadcast a message to all connected channels.
    pub async fn broadcast(
        &self,
        msg: ChannelMessage,
    ) -> Vec<(String, Result<MessageId, RustantError>)> {
        let mut results = Vec::new();
        for (name, channel) in &self.channels {
            if channel.is_connected() {
                let result = channel.send_message(msg.clone()).await;
                results.push((name.clone(), result));
            }
        }
        results
    }

    /// Poll all connected channels for new messages.
    pub async fn poll_all(&self) -> Vec<(String, Result<Vec<ChannelMessage>, RustantError>)> {
        let mut results = Vec::new();
        for (name, channel) in &self.channels {
            if channel.is_connected() {
                let result = channel.receive_messages().await;
                results.push((name.clone(), result));
            }
        }
        results
    }

    /// Send a message to a specific channel by name.
    pub async fn send_to(
        &self,
        channel_name: &str,
        msg: ChannelMessage,
    ) -> Result<MessageId, RustantError> {
        let channel = self.channels.get(channel_name).ok_or_else(|| {
            RustantError::Channel(ChannelError::NotConnected {
                name: channel_name.to_string(),
            })
        })?;
        if !channel.is_connected() {
            return Err(RustantError::Channel(ChannelError::NotConnected {
                name: channel_name.to_string(),
            }));
        }
        channel.send_message(msg).await
    }

    /// Push a proactive message (heartbeat scheduled task, auto-learn
    /// question, weekly summary) to every user allowlisted for DMs on each
    /// connected channel, per `channels.<name>.allowedUsers` in config.
    ///
    /// Returns one `(channel_name, user_id, result)` entry per attempted
    /// send; channels with no matching `ChannelPolicy` or an empty
    /// `allowed_users` list are skipped entirely.
    pub async fn push_to_user(
        &self,
        channels_config: &ChannelsConfig,
        text: &str,
    ) -> Vec<(String, String, Result<MessageId, RustantError>)> {
        let mut results = Vec::new();
        for (name, channel) in &self.channels {
            if !channel.is_connected() {
                continue;
            }
            let Some(policy) = channels_config.policies.get(name) else {
                continue;
            };
            if policy.allowed_users.is_empty() {
                continue;
            }
            let channel_type = channel.channel_type();
            for user_id in &policy.allowed_users {
                let sender = ChannelUser::new("heartbeat", channel_type);
                let msg = ChannelMessage::text(channel_type, user_id, sender, text);
                let result = channel.send_message(msg).await;
                results.push((name.clone(), user_id.clone(), result));
            }
        }
        results
    }

    /// The platform type of a registered channel, by name — what the
    /// delivery-queue drainer needs to rebuild a `ChannelMessage` for a
    /// retried send without keeping its own copy of the channel registry.
    pub fn channel_type_of(&self, channel_name: &str) -> Option<super::ChannelType> {
        self.channels.get(channel_name).map(|c| c.channel_type())
    }

    /// Get number of connected channels.
    pub fn connected_count(&self) -> usize {
        self.channels.values().filter(|c| c.is_connected()).count()
    }

    /// Get the capabilities of a channel by name.
    pub fn get_capabilities(&self, channel_name: &str) -> Option<ChannelCapabilities> {
        self.channels.get(channel_name).map(|c| c.capabilities())
    }

    /// List names of channels that support threads.
    pub fn channels_supporting_threads(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|(_, c)| c.capabilities().supports_threads)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Map of channel names to their streaming modes.
    pub fn channels_by_streaming_mode(&self) -> HashMap<&str, StreamingMode> {
        self.channels
            .iter()
            .map(|(name, c)| (name.as_str(), c.streaming_mode()))
            .collect()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a `ChannelManager` from configuration, registering real channel implementations
/// for each enabled/present channel config.
pub fn build_channel_manager(config: &crate::config::ChannelsConfig) -> ChannelManager {
    let mut mgr = ChannelManager::new();

    if let Some(ref cfg) = config.slack {
        mgr.register(Box::new(super::slack::create_slack_channel(cfg.clone())));
    }

    if let Some(ref cfg) = config.telegram {
        mgr.register(Box::new(super::telegram::create_telegram_channel(
            cfg.clone(),
        )));
    }

    if let Some(ref cfg) = config.discord {
        mgr.register(Box::new(super::discord::create_discord_channel(
            cfg.clone(),
        )));
    }

    if let Some(ref cfg) = config.email {
        mgr.register(Box::new(super::email::create_email_channel(cfg.clone())));
    }

    // WebChat is attached directly to the running `GatewayServer` rather than
    // constructed from config here, since it wraps a `SharedGateway` handle.
    mgr
}
