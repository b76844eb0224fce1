//! # QuantumClaw Core
//!
//! Core runtime library for the QuantumClaw agent daemon.
//! Provides the agent orchestrator, LLM routing, memory subsystem, trust
//! kernel, secret vault, identity, and the channel/gateway/scheduler
//! surface the daemon binds together at boot.

pub mod agent;
pub mod agent_registry;
pub mod approvals;
pub mod audit;
pub mod boot;
pub mod brain;
pub mod cache;
pub mod canvas;
pub mod channels;
pub mod completion_cache;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod delivery;
pub mod embeddings;
pub mod encryption;
pub mod error;
pub mod explanation;
pub mod gateway;
pub mod graph_memory;
pub mod hooks;
pub mod identity;
pub mod injection;
pub mod memory;
pub mod merkle;
pub mod oauth;
pub mod pairing;
pub mod persistence;
pub mod providers;
pub mod router;
pub mod safety;
pub mod sandbox;
pub mod scheduler;
pub mod search;
pub mod secret_ref;
pub mod secret_store;
pub mod skills;
pub mod summarizer;
pub mod trust;
pub mod types;

// Re-export commonly used types at the crate root.
pub use agent::{
    Agent, AgentCallback, AgentMessage, BudgetSeverity, ContextHealthEvent, NoOpCallback,
    RegisteredTool, TaskResult,
};
pub use brain::{Brain, LlmProvider, MockLlmProvider, TokenCounter};
pub use channels::{
    Channel, ChannelCapabilities, ChannelManager, ChannelMessage, ChannelStatus, ChannelType,
    ChannelUser, IngressContext, IngressDecision, MessageContent, MessageId, SlashCommand,
    StreamingMode, ThreadId,
};
pub use config::{
    AgentConfig, ApprovalMode, ChannelPolicy, DmPolicy, ExternalMcpServerConfig, KnowledgeConfig,
    MessagePriority, config_exists,
};
pub use hooks::{HookDefinition, HookEvent, HookRegistry, HookResult};
pub use tokio_util::sync::CancellationToken;

pub use agent_registry::{AgentDescriptor, AgentRegistry, AgentRegistryError};
pub use approvals::{ApprovalOutcome, ExecApprovals, PendingApproval};
pub use boot::{BootContext, BootStage, Bootstrapper, DegradationLevel, StageOutcome};
pub use completion_cache::{CacheKey, CompletionCache};
pub use credentials::{
    CredentialError, CredentialStore, InMemoryCredentialStore, KeyringCredentialStore,
};
pub use delivery::{DeliveryItem, DeliveryQueue, DeliveryStatus};
pub use encryption::{EncryptionError, SessionEncryptor};
pub use identity::{AgentIdentity, IdentityError, IdentityManager, IdentityMode};
pub use persistence::{Backend, JsonFileBackend, SharedDb};
pub use router::{MessageOrigin, ModelRouter, RoutedCompletion, Tier, classify};
pub use secret_store::{SecretStoreError, SecretStore, SecretValue};
pub use trust::{TrustDecision, TrustKernel, TrustOutcome, TrustRule, TrustRuleKind};
pub use error::{ChannelError, GraphError, SchedulerError};
pub use error::{Result, RustantError};
pub use explanation::{DecisionExplanation, DecisionType, ExplanationBuilder, FactorInfluence};
pub use gateway::{ChannelBridge, ClientMessage, GatewayConfig, GatewayEvent, ServerMessage};
pub use graph_memory::{
    CogneeConfig, GraphEdge, GraphMemoryClient, GraphNode, GraphProjection, GraphQueryResult,
};
pub use injection::{
    InjectionDetector, InjectionScanResult, InjectionType, Severity as InjectionSeverity,
};
pub use memory::{
    BehavioralRule, ContextBreakdown, GraphQueryOutcome, KnowledgeDistiller, KnowledgeStore,
    MemorySystem, Session, SessionMetadata,
};
pub use merkle::{AuditNode, MerkleChain, VerificationResult};
pub use oauth::AuthMethod;
pub use pairing::{PairingRequest, PairingStore, PairingStoreError};
pub use providers::{
    CircuitBreaker, CircuitState, FailoverProvider, GeminiProvider, ModelInfo, create_provider,
};
pub use safety::{
    AdaptiveTrust, ApprovalContext, ApprovalDecision, BehavioralFingerprint, ContractEnforcer,
    Invariant, Predicate, ResourceBounds, ReversibilityInfo, SafetyContract, SafetyGuardian,
};
pub use sandbox::SandboxedFs;
pub use scheduler::{
    BackgroundJob, CronJob, CronJobConfig, CronScheduler, HeartbeatConfig, HeartbeatManager,
    JobManager, JobStatus, WebhookEndpoint, WebhookHandler,
};
pub use search::{HybridSearchEngine, SearchConfig, SearchResult};
pub use secret_ref::{MigrationResult, SecretRef, SecretResolveError, SecretResolver};
pub use skills::{
    ParseError as SkillParseError, SkillConfig, SkillDefinition, SkillLoader, SkillRegistry,
    SkillRequirement, SkillRiskLevel, SkillToolDef, ValidationError, ValidationResult,
    parse_skill_md, validate_skill,
};
pub use summarizer::{ContextSummarizer, ContextSummary, TokenAlert, TokenCostDisplay};
pub use types::{
    AgentState, AgentStatus, Artifact, CompletionRequest, CompletionResponse, Content,
    CostEstimate, Message, ProgressUpdate, RiskLevel, Role, StreamEvent, TaskClassification,
    TokenUsage, ToolDefinition, ToolOutput,
};
