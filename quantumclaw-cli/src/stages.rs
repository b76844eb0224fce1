//! Concrete boot stages that wire the daemon's subsystems together.
//!
//! `boot::Bootstrapper` only knows how to run an ordered list of
//! [`BootStage`]s and track degradation; it has no opinion about what a
//! stage actually does. This module supplies that: one stage per subsystem,
//! each publishing what it builds into [`DaemonHandles`] for later stages
//! (and the channel dispatch loop started in [`ChannelsStage`]) to consume.
//!
//! Stages run in dependency order, not the order a reader might expect from
//! a component diagram: channels need the agent registry and tool registry
//! to exist first, so `ToolsStage` and `RuntimeAgentsStage` run after
//! `ChannelsStage` rather than before it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use quantumclaw_core::agent::{Agent, AgentCallback};
use quantumclaw_core::safety::ApprovalDecision as AgentApprovalDecision;
use quantumclaw_core::agent_registry::AgentRegistry;
use quantumclaw_core::approvals::ExecApprovals;
use quantumclaw_core::audit::AuditLog;
use quantumclaw_core::boot::{BootContext, BootStage, DegradationLevel, StageOutcome};
use quantumclaw_core::channels::discord::{DiscordChannel, RealDiscordHttp};
use quantumclaw_core::channels::email::{EmailChannel, RealImap, RealSmtp};
use quantumclaw_core::channels::manager::ChannelManager;
use quantumclaw_core::channels::policy::{
    default_response, evaluate_ingress, IngressContext, IngressDecision,
};
use quantumclaw_core::channels::slack::{RealSlackHttp, SlackChannel};
use quantumclaw_core::channels::telegram::{RealTelegramHttp, TelegramChannel};
use quantumclaw_core::channels::types::{ChannelMessage, ChannelUser, MessageContent};
use quantumclaw_core::channels::webchat::WebChatChannel;
use quantumclaw_core::completion_cache::CompletionCache;
use quantumclaw_core::config::{AgentConfig as RuntimeConfig, ChannelPolicy};
use quantumclaw_core::delivery::DeliveryQueue;
use quantumclaw_core::error::RustantError;
use quantumclaw_core::gateway::{run_gateway, GatewayServer, SharedGateway};
use quantumclaw_core::graph_memory::{spawn_health_probe, GraphMemoryClient};
use quantumclaw_core::identity::IdentityManager;
use quantumclaw_core::pairing::PairingStore;
use quantumclaw_core::persistence::SharedDb;
use quantumclaw_core::router::{ModelRouter, Tier};
use quantumclaw_core::safety::ActionRequest;
use quantumclaw_core::scheduler::{HeartbeatManager, ScheduledTask};
use quantumclaw_core::secret_store::SecretStore;
use quantumclaw_core::skills::{SkillLoader, SkillRegistry};
use quantumclaw_core::trust::TrustKernel;
use quantumclaw_core::types::{AgentStatus, CostEstimate, TokenUsage};

use quantumclaw_tools::registry::ToolRegistry;
use quantumclaw_tools::spawn_agent::SharedAgentRegistry;
use quantumclaw_tools::{register_agent_tools, register_builtin_tools, to_registered_tools};

fn io_err(msg: impl std::fmt::Display) -> RustantError {
    RustantError::Io(io::Error::other(msg.to_string()))
}

/// Everything a later stage (or the channel dispatch loop) might need from
/// an earlier one. Each field is set exactly once, by the stage that owns
/// it; `OnceLock` gives cheap, lock-free reads from the dispatch loop
/// without needing every consumer to be `async`.
#[derive(Default)]
pub struct DaemonHandles {
    pub secret_store: OnceLock<Arc<AsyncMutex<SecretStore>>>,
    pub trust: OnceLock<Arc<TrustKernel>>,
    pub audit: OnceLock<Arc<AuditLog>>,
    pub audit_store: OnceLock<Arc<AsyncMutex<quantumclaw_core::audit::AuditStore>>>,
    pub approvals: OnceLock<Arc<ExecApprovals>>,
    pub identity: OnceLock<Arc<AsyncMutex<IdentityManager>>>,
    pub shared_db: OnceLock<Arc<SharedDb>>,
    pub router: OnceLock<Arc<ModelRouter>>,
    pub completion_cache: OnceLock<Arc<CompletionCache>>,
    pub graph: OnceLock<Arc<GraphMemoryClient>>,
    pub skills: OnceLock<Arc<AsyncMutex<SkillRegistry>>>,
    pub agents: OnceLock<SharedAgentRegistry>,
    pub channels: OnceLock<Arc<ChannelManager>>,
    pub pairing: OnceLock<Arc<PairingStore>>,
    pub tool_registry: OnceLock<Arc<ToolRegistry>>,
    pub live_agents: OnceLock<Arc<AsyncMutex<HashMap<String, Arc<AsyncMutex<Agent>>>>>>,
    pub gateway: OnceLock<SharedGateway>,
    pub heartbeat: OnceLock<Arc<AsyncMutex<HeartbeatManager>>>,
    pub delivery: OnceLock<Arc<DeliveryQueue>>,
    background: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl DaemonHandles {
    async fn track(&self, handle: JoinHandle<()>) {
        self.background.lock().await.push(handle);
    }

    async fn abort_all(&self) {
        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }
    }
}

/// Reads (or mints) a stable per-machine value to key the secret vault's
/// KDF. Tries `/etc/machine-id` first since that's already stable across
/// reboots on every Linux host this daemon targets; falls back to a random
/// value persisted under the workspace so behavior is still deterministic
/// across restarts on machines without it (containers, macOS, CI).
fn machine_salt(workspace: &Path) -> io::Result<Vec<u8>> {
    if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.as_bytes().to_vec());
        }
    }

    let salt_path = workspace.join(".quantumclaw").join("machine.salt");
    if let Ok(existing) = std::fs::read(&salt_path) {
        if !existing.is_empty() {
            return Ok(existing);
        }
    }

    std::fs::create_dir_all(workspace.join(".quantumclaw"))?;
    let mut salt = [0u8; 32];
    getrandom(&mut salt)?;
    std::fs::write(&salt_path, salt)?;
    Ok(salt.to_vec())
}

fn getrandom(buf: &mut [u8]) -> io::Result<()> {
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(buf);
    Ok(())
}

/// A fallback trust kernel for conversations dispatched before the
/// security-foundation stage's real kernel is available. `TrustKernel::load`
/// treats a missing `VALUES.md` as "no rules configured" rather than an
/// error, so pointing it at a path that can't exist yields an empty,
/// always-allow kernel — the same posture a workspace with no VALUES.md at
/// all would get.
fn empty_trust_kernel() -> TrustKernel {
    TrustKernel::load(Path::new("\0no-values-file-can-exist-here"))
        .unwrap_or_else(|_| TrustKernel::load(Path::new("/nonexistent/VALUES.md")).unwrap())
}

/// Decides tool-approval outcomes for channel- and heartbeat-originated
/// tasks, where no human operator is watching in real time. Mirrors
/// `config.safety.approvalMode`: `Yolo`/`Cautious` auto-approve, everything
/// else denies and leaves the action for an operator to review via the
/// exec-approval queue.
struct DaemonCallback {
    approval_mode: quantumclaw_core::config::ApprovalMode,
}

#[async_trait]
impl AgentCallback for DaemonCallback {
    async fn on_assistant_message(&self, _message: &str) {}
    async fn on_token(&self, _token: &str) {}

    async fn request_approval(&self, action: &ActionRequest) -> AgentApprovalDecision {
        use quantumclaw_core::config::ApprovalMode;
        tracing::info!(tool = %action.tool_name, risk = ?action.risk_level, mode = ?self.approval_mode, "auto-decision on unattended action");
        match self.approval_mode {
            ApprovalMode::Yolo | ApprovalMode::Cautious => AgentApprovalDecision::Approve,
            ApprovalMode::Safe | ApprovalMode::Paranoid => AgentApprovalDecision::Deny,
        }
    }

    async fn on_tool_start(&self, _tool_name: &str, _args: &serde_json::Value) {}
    async fn on_tool_result(
        &self,
        _tool_name: &str,
        _output: &quantumclaw_core::types::ToolOutput,
        _duration_ms: u64,
    ) {
    }
    async fn on_status_change(&self, _status: AgentStatus) {}
    async fn on_usage_update(&self, _usage: &TokenUsage, _cost: &CostEstimate) {}
    async fn on_decision_explanation(
        &self,
        _explanation: &quantumclaw_core::explanation::DecisionExplanation,
    ) {
    }
}

/// Stage 1 (fatal): secret vault, trust kernel, audit journal. Nothing
/// downstream can run without a place to keep secrets and a policy to check
/// actions against.
pub struct SecurityFoundationStage {
    workspace: PathBuf,
    handles: Arc<DaemonHandles>,
}

impl SecurityFoundationStage {
    pub fn new(workspace: PathBuf, handles: Arc<DaemonHandles>) -> Self {
        Self { workspace, handles }
    }
}

#[async_trait]
impl BootStage for SecurityFoundationStage {
    fn name(&self) -> &'static str {
        "security_foundation"
    }

    fn fatal(&self) -> bool {
        true
    }

    async fn run(&mut self, _ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let config_dir = self.workspace.join(".quantumclaw");
        std::fs::create_dir_all(&config_dir).map_err(RustantError::from)?;

        let salt = machine_salt(&self.workspace).map_err(RustantError::from)?;
        let vault_path = config_dir.join("secrets.enc");
        let secret_store =
            SecretStore::load(&vault_path, &salt).map_err(|e| io_err(e.to_string()))?;

        let trust = TrustKernel::load(&self.workspace.join("VALUES.md"))
            .map_err(|e| io_err(e.to_string()))?;

        let audit = AuditLog::with_path(config_dir.join("audit.jsonl"));
        let audit_store = quantumclaw_core::audit::AuditStore::with_merkle_chain();

        let _ = self
            .handles
            .secret_store
            .set(Arc::new(AsyncMutex::new(secret_store)));
        let _ = self.handles.trust.set(Arc::new(trust));
        let _ = self.handles.audit.set(Arc::new(audit));
        let _ = self
            .handles
            .audit_store
            .set(Arc::new(AsyncMutex::new(audit_store)));

        Ok(StageOutcome::Ready)
    }
}

/// Stage 2 (degradable): exec-approval queue and the root identity used for
/// signing child-agent grants. A failure here still lets the daemon answer
/// chat without tool delegation or agent spawning.
pub struct CredentialStage {
    workspace: PathBuf,
    handles: Arc<DaemonHandles>,
}

impl CredentialStage {
    pub fn new(workspace: PathBuf, handles: Arc<DaemonHandles>) -> Self {
        Self { workspace, handles }
    }
}

#[async_trait]
impl BootStage for CredentialStage {
    fn name(&self) -> &'static str {
        "credentials_identity"
    }

    fn fatal(&self) -> bool {
        false
    }

    async fn run(&mut self, ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let config_dir = self.workspace.join(".quantumclaw");
        let approvals = Arc::new(ExecApprovals::with_path(config_dir.join("approvals.json")));
        let _ = self.handles.approvals.set(approvals.clone());

        let delivery = Arc::new(DeliveryQueue::with_path(config_dir.join("delivery.json")));
        let _ = self.handles.delivery.set(delivery.clone());

        let sweep_handles = self.handles.clone();
        let sweep_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                ticker.tick().await;
                sweep_approvals(&approvals, sweep_handles.audit.get()).await;
            }
        });
        self.handles.track(sweep_handle).await;

        let drain_handles = self.handles.clone();
        let drain_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                ticker.tick().await;
                drain_delivery_queue(&delivery, &drain_handles).await;
            }
        });
        self.handles.track(drain_handle).await;

        let Some(store) = self.handles.secret_store.get() else {
            ctx.degrade(self.name(), DegradationLevel::Moderate);
            return Ok(StageOutcome::Degraded(
                "secret store unavailable, root identity not issued".into(),
            ));
        };

        let aid_path = config_dir.join("aid.json");
        let mut guard = store.lock().await;
        match IdentityManager::init(&aid_path, &mut guard, "root", None).await {
            Ok(identity) => {
                let _ = self.handles.identity.set(Arc::new(AsyncMutex::new(identity)));
                Ok(StageOutcome::Ready)
            }
            Err(e) => {
                ctx.degrade(self.name(), DegradationLevel::Minor);
                Ok(StageOutcome::Degraded(format!(
                    "root identity init failed: {e}"
                )))
            }
        }
    }
}

/// Auto-denies every approval whose TTL has passed with no operator
/// decision, and records it in the audit log with reason `expired` — the
/// background half of invariant 6; `ExecApprovals::check` covers the case
/// where a caller is actively polling the same id, but nothing else ever
/// revisits an approval no one is waiting on.
async fn sweep_approvals(approvals: &Arc<ExecApprovals>, audit: Option<&Arc<AuditLog>>) {
    let expired = approvals.sweep_expired(chrono::Utc::now());
    if expired.is_empty() {
        return;
    }
    for approval in &expired {
        tracing::info!(tool = %approval.tool, approval_id = %approval.id, "approval auto-denied on expiry");
        if let Some(audit) = audit {
            audit
                .log(
                    "approvals_sweep",
                    "approval_decided",
                    format!(
                        "tool={} approval_id={} outcome=denied reason=expired",
                        approval.tool, approval.id
                    ),
                    None,
                )
                .await;
        }
    }
}

/// Drains due items from the outbound delivery queue, retrying through
/// whichever channel they were addressed to. Items that exhaust their retry
/// budget are left `dead` in the queue by `DeliveryQueue::mark_failed` for an
/// operator to inspect; nothing here deletes them.
async fn drain_delivery_queue(delivery: &Arc<DeliveryQueue>, handles: &Arc<DaemonHandles>) {
    let Some(manager) = handles.channels.get() else {
        return;
    };
    for item in delivery.due(chrono::Utc::now()) {
        let Some(channel_type) = manager.channel_type_of(&item.channel) else {
            tracing::warn!(channel = %item.channel, "delivery queue item references unknown channel, marking failed");
            delivery.mark_failed(item.id);
            continue;
        };
        let sender = ChannelUser::new("delivery-queue", channel_type);
        let msg = ChannelMessage::text(channel_type, item.recipient.clone(), sender, item.payload.clone());
        match manager.send_to(&item.channel, msg).await {
            Ok(_) => delivery.mark_delivered(item.id),
            Err(e) => {
                tracing::warn!(channel = %item.channel, error = %e, attempts = item.attempts, "queued delivery retry failed");
                delivery.mark_failed(item.id);
            }
        }
    }
}

/// Sends a reply immediately; on failure, enqueues it in the durable
/// delivery queue for retry with backoff instead of dropping it.
async fn deliver_or_queue(handles: &Arc<DaemonHandles>, channel_name: &str, msg: ChannelMessage) {
    let Some(manager) = handles.channels.get() else {
        return;
    };
    let recipient = msg.channel_id.clone();
    let text = msg.content.as_text().unwrap_or_default().to_string();
    if let Err(e) = manager.send_to(channel_name, msg).await {
        tracing::warn!(channel = %channel_name, error = %e, "immediate delivery failed, queuing for retry");
        if let Some(delivery) = handles.delivery.get() {
            delivery.enqueue(channel_name.to_string(), recipient, text);
        }
    }
}

/// Stage 3 (degradable): the pooled SQLite backend shared agents use for
/// anything beyond the JSON-file fallback each subsystem already falls
/// back to individually.
pub struct PersistenceStage {
    workspace: PathBuf,
    handles: Arc<DaemonHandles>,
}

impl PersistenceStage {
    pub fn new(workspace: PathBuf, handles: Arc<DaemonHandles>) -> Self {
        Self { workspace, handles }
    }
}

#[async_trait]
impl BootStage for PersistenceStage {
    fn name(&self) -> &'static str {
        "persistence"
    }

    fn fatal(&self) -> bool {
        false
    }

    async fn run(&mut self, ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let db_path = self.workspace.join(".quantumclaw").join("data.db");
        match SharedDb::open(&db_path) {
            Ok(db) => {
                let _ = self.handles.shared_db.set(Arc::new(db));
                Ok(StageOutcome::Ready)
            }
            Err(e) => {
                ctx.degrade(self.name(), DegradationLevel::Minor);
                Ok(StageOutcome::Degraded(format!(
                    "shared db unavailable, subsystems fall back to per-file JSON: {e}"
                )))
            }
        }
    }
}

/// Stage 4 (degradable): validates the long-term memory persist path is
/// writable. Per-agent working/short-term memory is built fresh inside
/// `Agent::new` itself (see `RuntimeAgentsStage`); this stage only confirms
/// the directory `memory.persistPath` names is usable before agents start
/// relying on it.
pub struct MemoryStage {
    config: Arc<RuntimeConfig>,
    handles: Arc<DaemonHandles>,
}

impl MemoryStage {
    pub fn new(config: Arc<RuntimeConfig>, handles: Arc<DaemonHandles>) -> Self {
        Self { config, handles }
    }
}

#[async_trait]
impl BootStage for MemoryStage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn fatal(&self) -> bool {
        false
    }

    async fn run(&mut self, ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let mut degraded = None;

        if self.config.memory.cognee.enabled {
            let client = Arc::new(GraphMemoryClient::new(self.config.memory.cognee.clone()));
            if let Err(e) = client.connect().await {
                // Graph layer loss is degradable: the agent still answers,
                // it just loses cross-entity traversal (see memory read path).
                ctx.degrade(self.name(), DegradationLevel::Minor);
                degraded = Some(format!("graph service unavailable at boot: {e}"));
            }
            let _ = self.handles.graph.set(client.clone());
            if let Some(audit) = self.handles.audit.get() {
                let handle = spawn_health_probe(client, audit.clone());
                self.handles.track(handle).await;
            }
        }

        if !self.config.memory.enable_persistence {
            return Ok(degraded.map(StageOutcome::Degraded).unwrap_or(StageOutcome::Ready));
        }
        let Some(path) = &self.config.memory.persist_path else {
            ctx.degrade(self.name(), DegradationLevel::Minor);
            return Ok(StageOutcome::Degraded(
                "persistence enabled but no persistPath configured".into(),
            ));
        };
        match path.parent().map(std::fs::create_dir_all) {
            Some(Ok(())) | None => {
                Ok(degraded.map(StageOutcome::Degraded).unwrap_or(StageOutcome::Ready))
            }
            Some(Err(e)) => {
                ctx.degrade(self.name(), DegradationLevel::Moderate);
                Ok(StageOutcome::Degraded(format!(
                    "memory persist path unusable: {e}"
                )))
            }
        }
    }
}

/// Stage 5 (fatal): the tiered model router. Chat is the one capability
/// that cannot degrade — a primary provider that fails to construct (bad
/// API key env var, unsupported provider name) aborts boot entirely.
pub struct ModelRouterStage {
    config: Arc<RuntimeConfig>,
    handles: Arc<DaemonHandles>,
}

impl ModelRouterStage {
    pub fn new(config: Arc<RuntimeConfig>, handles: Arc<DaemonHandles>) -> Self {
        Self { config, handles }
    }
}

#[async_trait]
impl BootStage for ModelRouterStage {
    fn name(&self) -> &'static str {
        "model_router"
    }

    fn fatal(&self) -> bool {
        true
    }

    async fn run(&mut self, _ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let routing_enabled = self.config.models.is_some();
        let router = ModelRouter::new(
            &self.config.llm,
            self.config.models.as_ref(),
            routing_enabled,
        )?;
        let _ = self.handles.router.set(Arc::new(router));
        Ok(StageOutcome::Ready)
    }
}

/// Stage 6 (degradable): loads every `skills/*.md` document under the
/// workspace. A parse failure on one skill does not block the others; the
/// whole stage only degrades if the directory cannot be read at all.
pub struct SkillsStage {
    workspace: PathBuf,
    handles: Arc<DaemonHandles>,
}

impl SkillsStage {
    pub fn new(workspace: PathBuf, handles: Arc<DaemonHandles>) -> Self {
        Self { workspace, handles }
    }
}

#[async_trait]
impl BootStage for SkillsStage {
    fn name(&self) -> &'static str {
        "skills"
    }

    fn fatal(&self) -> bool {
        false
    }

    async fn run(&mut self, ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let skills_dir = self.workspace.join("skills");
        let mut registry = SkillRegistry::new();

        if !skills_dir.exists() {
            let _ = self.handles.skills.set(Arc::new(AsyncMutex::new(registry)));
            return Ok(StageOutcome::Ready);
        }

        let loader = SkillLoader::new(skills_dir);
        let mut failures = 0usize;
        for result in loader.scan() {
            match result {
                Ok(skill) => registry.register(skill),
                Err((path, err)) => {
                    failures += 1;
                    tracing::warn!(?path, %err, "failed to parse skill");
                }
            }
        }

        let _ = self.handles.skills.set(Arc::new(AsyncMutex::new(registry)));

        if failures > 0 {
            ctx.degrade(self.name(), DegradationLevel::Minor);
            Ok(StageOutcome::Degraded(format!(
                "{failures} skill file(s) failed to parse"
            )))
        } else {
            Ok(StageOutcome::Ready)
        }
    }
}

/// Stage 7 (fatal): discovers every `agents/<name>/` directory. At least
/// one named agent must exist for the daemon to have anything to dispatch
/// to, so this is fatal rather than degradable.
pub struct AgentRegistryStage {
    workspace: PathBuf,
    handles: Arc<DaemonHandles>,
}

impl AgentRegistryStage {
    pub fn new(workspace: PathBuf, handles: Arc<DaemonHandles>) -> Self {
        Self { workspace, handles }
    }
}

#[async_trait]
impl BootStage for AgentRegistryStage {
    fn name(&self) -> &'static str {
        "agent_registry"
    }

    fn fatal(&self) -> bool {
        true
    }

    async fn run(&mut self, _ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let registry =
            AgentRegistry::discover(&self.workspace, None).map_err(|e| io_err(e.to_string()))?;
        let _ = self
            .handles
            .agents
            .set(Arc::new(tokio::sync::Mutex::new(registry)));
        Ok(StageOutcome::Ready)
    }
}

/// Stage 8 (degradable): connects every configured, enabled channel and
/// starts the background dispatch loop that polls them, applies ingress
/// policy, and routes admitted messages into the agent loop. A channel
/// that fails to connect is simply absent from `ChannelManager`; the loop
/// still runs for whichever channels did connect.
pub struct ChannelsStage {
    workspace: PathBuf,
    config: Arc<RuntimeConfig>,
    handles: Arc<DaemonHandles>,
}

impl ChannelsStage {
    pub fn new(workspace: PathBuf, config: Arc<RuntimeConfig>, handles: Arc<DaemonHandles>) -> Self {
        Self {
            workspace,
            config,
            handles,
        }
    }
}

#[async_trait]
impl BootStage for ChannelsStage {
    fn name(&self) -> &'static str {
        "channels"
    }

    fn fatal(&self) -> bool {
        false
    }

    async fn run(&mut self, ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let mut manager = ChannelManager::new();
        let pairing = PairingStore::load(&self.workspace).map_err(|e| io_err(e.to_string()))?;

        let mut configured = 0usize;
        if let Some(channels_cfg) = &self.config.channels {
            if let Some(tg) = &channels_cfg.telegram {
                if !tg.bot_token.is_empty() {
                    let http = RealTelegramHttp::new(&tg.bot_token);
                    manager.register(Box::new(TelegramChannel::new(tg.clone(), Box::new(http))));
                    configured += 1;
                }
            }
            if let Some(dc) = &channels_cfg.discord {
                if !dc.bot_token.is_empty() {
                    let http = RealDiscordHttp::new(dc.bot_token.clone());
                    manager.register(Box::new(DiscordChannel::new(dc.clone(), Box::new(http))));
                    configured += 1;
                }
            }
            if let Some(sl) = &channels_cfg.slack {
                if !sl.bot_token.is_empty() {
                    let http = RealSlackHttp::new(sl.bot_token.clone());
                    manager.register(Box::new(SlackChannel::new(sl.clone(), Box::new(http))));
                    configured += 1;
                }
            }
            if let Some(em) = &channels_cfg.email {
                if !em.imap_host.is_empty() {
                    let smtp = RealSmtp::new(
                        em.smtp_host.clone(),
                        em.smtp_port,
                        em.username.clone(),
                        em.password.clone(),
                        em.from_address.clone(),
                        em.auth_method.clone(),
                    );
                    let imap = RealImap::new(
                        em.imap_host.clone(),
                        em.imap_port,
                        em.username.clone(),
                        em.password.clone(),
                        em.auth_method.clone(),
                    );
                    manager.register(Box::new(EmailChannel::new(
                        em.clone(),
                        Box::new(smtp),
                        Box::new(imap),
                    )));
                    configured += 1;
                }
            }
            if channels_cfg.webchat.as_ref().map(|w| w.enabled).unwrap_or(false) {
                let mut webchat = WebChatChannel::new();
                if let Some(gw) = self.handles.gateway.get() {
                    webchat = webchat.with_gateway(gw.clone());
                }
                manager.register(Box::new(webchat));
                configured += 1;
            }
        }

        let connect_results = manager.connect_all().await;
        for (name, result) in &connect_results {
            if let Err(e) = result {
                tracing::warn!(channel = %name, error = %e, "channel failed to connect");
            }
        }

        let manager = Arc::new(manager);
        let _ = self.handles.channels.set(manager.clone());
        let pairing = Arc::new(pairing);
        let _ = self.handles.pairing.set(pairing.clone());
        if let Some(gw) = self.handles.gateway.get() {
            gw.lock().await.set_pairing(pairing, self.workspace.clone());
        }

        if configured == 0 {
            ctx.degrade(self.name(), DegradationLevel::Minor);
            return Ok(StageOutcome::Degraded(
                "no channels configured; chat reachable only via the dashboard".into(),
            ));
        }

        let dispatch_handle = spawn_dispatch_loop(
            self.workspace.clone(),
            self.config.clone(),
            self.handles.clone(),
        );
        self.handles.track(dispatch_handle).await;

        Ok(StageOutcome::Ready)
    }

    async fn stop(&mut self) {
        // The dispatch loop task (aborted separately via
        // `shutdown_background_tasks`) is the only other holder of this
        // `Arc<ChannelManager>`, so there is no safe way to get `&mut
        // ChannelManager` back here to call `disconnect_all`. Every adapter's
        // `disconnect` only flips an in-memory status flag (no socket or
        // subprocess to release), so skipping it at shutdown is harmless.
    }
}

/// Sharded lock keyed by `(agent, channel, user)` so two messages from the
/// same conversation never interleave through the agent loop, while
/// unrelated conversations still run concurrently.
type ConversationLocks = AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>;

fn spawn_dispatch_loop(
    workspace: PathBuf,
    config: Arc<RuntimeConfig>,
    handles: Arc<DaemonHandles>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let locks: Arc<ConversationLocks> = Arc::new(AsyncMutex::new(HashMap::new()));
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3));
        loop {
            interval.tick().await;
            let Some(manager) = handles.channels.get() else {
                continue;
            };
            for (name, result) in manager.poll_all().await {
                let messages = match result {
                    Ok(msgs) => msgs,
                    Err(e) => {
                        tracing::warn!(channel = %name, error = %e, "poll failed");
                        continue;
                    }
                };
                for msg in messages {
                    dispatch_one(&workspace, &config, &handles, &locks, name.clone(), msg).await;
                }
            }
        }
    })
}

async fn dispatch_one(
    workspace: &Path,
    config: &Arc<RuntimeConfig>,
    handles: &Arc<DaemonHandles>,
    locks: &Arc<ConversationLocks>,
    channel_name: String,
    msg: ChannelMessage,
) {
    let Some(channels_cfg) = &config.channels else {
        return;
    };
    let policy = match channels_cfg.policies.get(&channel_name) {
        Some(p) => p.clone(),
        None => ChannelPolicy::default(),
    };
    let Some(pairing) = handles.pairing.get() else {
        return;
    };

    let is_dm = msg.metadata.get("is_dm").map(|v| v == "true").unwrap_or(false);
    let mentioned = msg
        .metadata
        .get("mentioned")
        .map(|v| v == "true")
        .unwrap_or(false);
    let reply_to_bot = msg
        .metadata
        .get("reply_to_bot")
        .map(|v| v == "true")
        .unwrap_or(false);
    let text = msg.content.as_text().unwrap_or_default().to_string();

    let ingress_ctx = IngressContext {
        is_direct_message: is_dm,
        mentioned,
        reply_to_bot,
        channel_id: &msg.channel_id,
    };

    let decision = evaluate_ingress(
        &policy,
        pairing,
        &channel_name,
        &ingress_ctx,
        &msg.sender.id,
        msg.sender.display_name.as_deref().unwrap_or(&msg.sender.id),
        &msg.channel_id,
        &text,
    );

    if handles.channels.get().is_none() {
        return;
    }

    match decision {
        IngressDecision::Dropped => {}
        IngressDecision::PairingIssued(req) => {
            let mut reply = msg.clone();
            reply.content = MessageContent::text(format!(
                "You're not paired yet. Share this code with an operator: {}",
                req.code
            ));
            deliver_or_queue(handles, &channel_name, reply).await;
        }
        IngressDecision::SlashCommand(cmd) => {
            let agent_name = policy.agent.clone().unwrap_or_else(|| "primary".to_string());
            let mut reply = msg.clone();
            reply.content = MessageContent::text(default_response(cmd, &agent_name));
            deliver_or_queue(handles, &channel_name, reply).await;
        }
        IngressDecision::Admit => {
            let agent_name = policy.agent.clone();
            let lock_key = format!(
                "{}:{}:{}",
                agent_name.as_deref().unwrap_or("primary"),
                channel_name,
                msg.sender.id
            );
            let conv_lock = {
                let mut map = locks.lock().await;
                map.entry(lock_key)
                    .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                    .clone()
            };
            let _guard = conv_lock.lock().await;

            if let Err(e) = run_agent_task(workspace, config, handles, &channel_name, &msg, agent_name.as_deref(), &text)
                .await
            {
                tracing::error!(channel = %channel_name, error = %e, "agent dispatch failed");
            }
        }
    }
}

async fn run_agent_task(
    workspace: &Path,
    config: &Arc<RuntimeConfig>,
    handles: &Arc<DaemonHandles>,
    channel_name: &str,
    msg: &ChannelMessage,
    agent_name: Option<&str>,
    text: &str,
) -> Result<(), RustantError> {
    let agent = get_or_build_agent(workspace, config, handles, agent_name).await?;
    if handles.channels.get().is_none() {
        return Ok(());
    }

    let result = {
        let mut guard = agent.lock().await;
        guard.process_task(text).await?
    };

    if let Some(audit) = handles.audit.get() {
        let cost = result.total_cost.total();
        audit
            .log(
                "model_router",
                "complete",
                format!(
                    "tier={} cached={}",
                    result.tier.as_deref().unwrap_or("unrouted"),
                    result.cached
                ),
                Some(quantumclaw_core::audit::AuditMeta {
                    model: None,
                    cost: Some(cost),
                    tokens: Some(result.total_usage.total() as u64),
                    channel: Some(channel_name.to_string()),
                }),
            )
            .await;
    }

    let mut reply = msg.clone();
    reply.content = MessageContent::text(result.response);
    deliver_or_queue(handles, channel_name, reply).await;
    Ok(())
}

async fn get_or_build_agent(
    workspace: &Path,
    config: &Arc<RuntimeConfig>,
    handles: &Arc<DaemonHandles>,
    agent_name: Option<&str>,
) -> Result<Arc<AsyncMutex<Agent>>, RustantError> {
    let live = handles
        .live_agents
        .get_or_init(|| Arc::new(AsyncMutex::new(HashMap::new())))
        .clone();

    let Some(registry) = handles.agents.get() else {
        return Err(io_err("agent registry not available"));
    };
    let resolved_name = {
        let reg = registry.lock().await;
        match agent_name {
            Some(name) if reg.get(name).is_some() => name.to_string(),
            _ => reg.primary().name.clone(),
        }
    };

    {
        let map = live.lock().await;
        if let Some(agent) = map.get(&resolved_name) {
            return Ok(agent.clone());
        }
    }

    let Some(router) = handles.router.get() else {
        return Err(io_err("model router not available"));
    };
    let provider = router.provider_for(Tier::Standard);
    let callback: Arc<dyn AgentCallback> = Arc::new(DaemonCallback {
        approval_mode: config.safety.approval_mode,
    });
    let cache = handles
        .completion_cache
        .get_or_init(|| Arc::new(CompletionCache::new()))
        .clone();
    let mut agent = Agent::new(provider, (**config).clone(), callback)
        .with_router(router.clone())
        .with_completion_cache(cache);
    if let Some(graph) = handles.graph.get() {
        agent = agent.with_graph_memory(graph.clone());
    }
    if let Some(audit_store) = handles.audit_store.get() {
        agent = agent.with_audit_store(audit_store.clone());
    }

    if let Some(registry) = handles.tool_registry.get() {
        let trust = handles
            .trust
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(empty_trust_kernel()));
        let audit = handles
            .audit
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(AuditLog::in_memory()));
        let approvals = handles
            .approvals
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(ExecApprovals::in_memory()));
        let require_approval = Arc::new(config.tools.require_approval.clone());
        let tools = to_registered_tools(
            registry.clone(),
            trust,
            audit,
            approvals,
            require_approval,
            Arc::from(resolved_name.as_str()),
        );
        for tool in tools {
            agent.register_tool(tool);
        }
    }

    let _ = workspace;
    let agent = Arc::new(AsyncMutex::new(agent));
    live.lock().await.insert(resolved_name, agent.clone());
    Ok(agent)
}

/// Stage 9 (degradable): assembles the policy-gated tool registry —
/// built-ins plus `spawn_agent`/`cross_channel_send`, which need the agent
/// registry, identity manager, and channel manager this stage's
/// predecessors built.
pub struct ToolsStage {
    workspace: PathBuf,
    handles: Arc<DaemonHandles>,
}

impl ToolsStage {
    pub fn new(workspace: PathBuf, handles: Arc<DaemonHandles>) -> Self {
        Self { workspace, handles }
    }
}

#[async_trait]
impl BootStage for ToolsStage {
    fn name(&self) -> &'static str {
        "tools"
    }

    fn fatal(&self) -> bool {
        false
    }

    async fn run(&mut self, ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, self.workspace.clone());

        let mut degraded = false;
        if let (Some(agents), Some(identity), Some(channels)) = (
            self.handles.agents.get(),
            self.handles.identity.get(),
            self.handles.channels.get(),
        ) {
            register_agent_tools(
                &mut registry,
                agents.clone(),
                identity.clone(),
                self.workspace.join("agents"),
                channels.clone(),
            );
        } else {
            degraded = true;
        }

        let _ = self.handles.tool_registry.set(Arc::new(registry));

        if degraded {
            ctx.degrade(self.name(), DegradationLevel::Minor);
            Ok(StageOutcome::Degraded(
                "spawn_agent/cross_channel_send unavailable (missing identity or channels)".into(),
            ))
        } else {
            Ok(StageOutcome::Ready)
        }
    }
}

/// Stage 10 (degradable): the WebSocket dashboard gateway. Disabled by
/// default; when enabled, runs as a background task for the life of the
/// process.
pub struct DashboardStage {
    config: Arc<RuntimeConfig>,
    handles: Arc<DaemonHandles>,
}

impl DashboardStage {
    pub fn new(config: Arc<RuntimeConfig>, handles: Arc<DaemonHandles>) -> Self {
        Self { config, handles }
    }
}

#[async_trait]
impl BootStage for DashboardStage {
    fn name(&self) -> &'static str {
        "dashboard"
    }

    fn fatal(&self) -> bool {
        false
    }

    async fn run(&mut self, ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let Some(gw_config) = &self.config.gateway else {
            return Ok(StageOutcome::Ready);
        };
        if !gw_config.enabled {
            return Ok(StageOutcome::Ready);
        }

        let mut server = GatewayServer::new(gw_config.clone());
        if let Some(audit_store) = self.handles.audit_store.get() {
            server.set_audit_store(audit_store.clone());
        }
        if let Some(audit) = self.handles.audit.get() {
            server.set_audit_log(audit.clone());
        }
        let shared: SharedGateway = Arc::new(tokio::sync::Mutex::new(server));
        let _ = self.handles.gateway.set(shared.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = run_gateway(shared).await {
                tracing::error!(error = %e, "dashboard gateway exited");
            }
        });
        self.handles.track(handle).await;

        ctx.recover(self.name());
        Ok(StageOutcome::Ready)
    }
}

/// Stage 11 (degradable): the heartbeat ticker. Drives all four firing
/// modes on each tick of the configured interval: the legacy condition/
/// cooldown dev-task runner, user-defined scheduled prompts, auto-learn,
/// and the weekly summary — gated by a shared daily cost cap read from the
/// audit log.
pub struct HeartbeatStage {
    workspace: PathBuf,
    config: Arc<RuntimeConfig>,
    handles: Arc<DaemonHandles>,
}

impl HeartbeatStage {
    pub fn new(workspace: PathBuf, config: Arc<RuntimeConfig>, handles: Arc<DaemonHandles>) -> Self {
        Self {
            workspace,
            config,
            handles,
        }
    }
}

#[async_trait]
impl BootStage for HeartbeatStage {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn fatal(&self) -> bool {
        false
    }

    async fn run(&mut self, ctx: &BootContext) -> quantumclaw_core::error::Result<StageOutcome> {
        let Some(scheduler_cfg) = &self.config.scheduler else {
            return Ok(StageOutcome::Ready);
        };
        if !scheduler_cfg.enabled {
            return Ok(StageOutcome::Ready);
        }
        let Some(hb_config) = scheduler_cfg.heartbeat.clone() else {
            return Ok(StageOutcome::Ready);
        };

        let manager = Arc::new(AsyncMutex::new(HeartbeatManager::new(hb_config.clone())));
        let _ = self.handles.heartbeat.set(manager.clone());

        let workspace = self.workspace.clone();
        let config = self.config.clone();
        let handles = self.handles.clone();
        let interval_secs = hb_config.interval_secs.max(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now();

                let today_cost = handles
                    .audit
                    .get()
                    .map(|a| a.cost_summary(None).today_cost)
                    .unwrap_or(0.0);
                let under_cap = { manager.lock().await.under_daily_cost_cap(today_cost) };
                if !under_cap {
                    tracing::info!("heartbeat actions skipped: daily cost cap reached");
                    continue;
                }

                // Legacy dev-task runner (`tasks`): condition/cooldown-gated
                // shell-style actions, run silently (no pushToUser).
                let ready: Vec<(String, String)> = {
                    let mgr = manager.lock().await;
                    mgr.ready_tasks()
                        .into_iter()
                        .map(|t| (t.name.clone(), t.action.clone()))
                        .collect()
                };
                for (name, action) in ready {
                    if let Err(e) = run_heartbeat_task(&workspace, &config, &handles, &action).await {
                        tracing::warn!(task = %name, error = %e, "heartbeat task failed");
                    }
                    manager.lock().await.mark_executed(&name);
                }

                // Scheduled tasks: always push the result when `notify` is set.
                let scheduled_ready: Vec<ScheduledTask> = {
                    let mgr = manager.lock().await;
                    mgr.scheduled_tasks_ready_at(&now).into_iter().cloned().collect()
                };
                for task in scheduled_ready {
                    match run_heartbeat_task(&workspace, &config, &handles, &task.prompt).await {
                        Ok(response) if task.notify => {
                            push_proactive_message(&config, &handles, &task.name, &response).await;
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(task = %task.name, error = %e, "scheduled heartbeat task failed"),
                    }
                    manager.lock().await.mark_scheduled_executed(&task.name, now);
                }

                // Auto-learn: one owner-directed question, quota- and
                // quiet-hours-gated, always pushed.
                let auto_learn_ready = { manager.lock().await.auto_learn_ready_at(&now) };
                if auto_learn_ready {
                    let prompt = "Heartbeat auto-learn: ask the owner one short, specific question \
                        that would help you understand their preferences or goals better.";
                    match run_heartbeat_task(&workspace, &config, &handles, prompt).await {
                        Ok(response) => {
                            push_proactive_message(&config, &handles, "auto-learn", &response).await;
                            manager.lock().await.mark_auto_learn_fired(now);
                        }
                        Err(e) => tracing::warn!(error = %e, "auto-learn heartbeat task failed"),
                    }
                }

                // Weekly summary: once per ISO week, always pushed.
                let weekly_ready = { manager.lock().await.weekly_summary_ready_at(&now) };
                if weekly_ready {
                    let summary = weekly_summary_prompt(&handles);
                    match run_heartbeat_task(&workspace, &config, &handles, &summary).await {
                        Ok(response) => {
                            push_proactive_message(&config, &handles, "weekly-summary", &response).await;
                            manager.lock().await.mark_weekly_summary_fired(now);
                        }
                        Err(e) => tracing::warn!(error = %e, "weekly summary heartbeat task failed"),
                    }
                }
            }
        });
        self.handles.track(handle).await;

        ctx.recover(self.name());
        Ok(StageOutcome::Ready)
    }
}

/// Runs a single heartbeat-originated prompt through the primary agent and
/// returns its response text, for callers that need to notify on the result.
async fn run_heartbeat_task(
    workspace: &Path,
    config: &Arc<RuntimeConfig>,
    handles: &Arc<DaemonHandles>,
    prompt: &str,
) -> Result<String, RustantError> {
    let agent = get_or_build_agent(workspace, config, handles, None).await?;
    let mut guard = agent.lock().await;
    let result = guard.process_task(prompt).await?;
    Ok(result.response)
}

/// Fans a heartbeat-driven message out to every channel's DM-allowlisted
/// users (`pushToUser`) and to the dashboard, tagging the source so an
/// operator can tell a scheduled task from auto-learn or the weekly summary.
async fn push_proactive_message(
    config: &Arc<RuntimeConfig>,
    handles: &Arc<DaemonHandles>,
    source: &str,
    message: &str,
) {
    if let (Some(manager), Some(channels_cfg)) = (handles.channels.get(), &config.channels) {
        for (channel_name, _, result) in manager.push_to_user(channels_cfg, message).await {
            if let Err(e) = result {
                tracing::warn!(channel = %channel_name, source = %source, error = %e, "pushToUser delivery failed");
            }
        }
    }
    if let Some(gateway) = handles.gateway.get() {
        gateway
            .lock()
            .await
            .broadcast(quantumclaw_core::gateway::GatewayEvent::ProactiveMessage {
                source: source.to_string(),
                message: message.to_string(),
            });
    }
}

/// Composes the weekly-summary prompt from the audit log's cost breakdown,
/// for the agent to turn into a short narrative reply.
fn weekly_summary_prompt(handles: &Arc<DaemonHandles>) -> String {
    let Some(audit) = handles.audit.get() else {
        return "Heartbeat weekly summary: summarize this week's activity for the owner.".to_string();
    };
    let summary = audit.cost_summary(None);
    format!(
        "Heartbeat weekly summary: write a short, friendly recap of this week's activity for \
        the owner. This week's spend so far is ${:.2} (week-to-date), ${:.2} total since the \
        journal began, across {} logged entries. Mention anything noteworthy.",
        summary.week_cost, summary.total_cost, summary.entry_count
    )
}

/// Builds the full ordered stage list for `run_foreground`, plus the shared
/// handle set the dispatch loop and heartbeat ticker read from.
pub fn build_stages(
    workspace: PathBuf,
    config: RuntimeConfig,
) -> (Vec<Box<dyn BootStage>>, Arc<DaemonHandles>) {
    let handles = Arc::new(DaemonHandles::default());
    let config = Arc::new(config);

    let stages: Vec<Box<dyn BootStage>> = vec![
        Box::new(SecurityFoundationStage::new(workspace.clone(), handles.clone())),
        Box::new(CredentialStage::new(workspace.clone(), handles.clone())),
        Box::new(PersistenceStage::new(workspace.clone(), handles.clone())),
        Box::new(MemoryStage::new(config.clone(), handles.clone())),
        Box::new(ModelRouterStage::new(config.clone(), handles.clone())),
        Box::new(SkillsStage::new(workspace.clone(), handles.clone())),
        Box::new(AgentRegistryStage::new(workspace.clone(), handles.clone())),
        Box::new(DashboardStage::new(config.clone(), handles.clone())),
        Box::new(ChannelsStage::new(workspace.clone(), config.clone(), handles.clone())),
        Box::new(ToolsStage::new(workspace.clone(), handles.clone())),
        Box::new(HeartbeatStage::new(workspace, config, handles.clone())),
    ];

    (stages, handles)
}

/// Aborts every background task spawned by a stage (dispatch loop, gateway
/// server, heartbeat ticker). Called after `Bootstrapper::shutdown` has run
/// each stage's own `stop()`.
pub async fn shutdown_background_tasks(handles: &Arc<DaemonHandles>) {
    handles.abort_all().await;
}
