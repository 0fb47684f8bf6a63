use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub two_phase: TwoPhaseConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub gdpr: GdprConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Maximum in-flight HTTP requests (backpressure protection).
    #[serde(default = "d_256")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            max_concurrent: 256,
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    /// Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default = "d_llm_url")]
    pub base_url: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    /// Env var holding the API key for remote backends. Local backends
    /// (Ollama) need no key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: TemperatureConfig,
    /// Default per-call timeout for response generation. Classification and
    /// fallback calls carry their own shorter bounds.
    #[serde(default = "d_20")]
    pub timeout_s: u64,
    #[serde(default = "d_900")]
    pub max_response_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Ollama,
            base_url: d_llm_url(),
            model: d_llm_model(),
            api_key_env: None,
            temperature: TemperatureConfig::default(),
            timeout_s: 20,
            max_response_tokens: 900,
        }
    }
}

/// Which provider adapter serves LLM calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    /// Local Ollama daemon (default — keeps traffic on-premise).
    #[default]
    Ollama,
    /// Any remote OpenAI-compatible endpoint. Gated by
    /// `gdpr.allow_external_llm`.
    OpenaiCompat,
}

impl LlmBackend {
    /// Whether this backend sends data off the local machine.
    pub fn is_external(self) -> bool {
        matches!(self, LlmBackend::OpenaiCompat)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    #[serde(default = "d_01")]
    pub classify: f32,
    #[serde(default = "d_03")]
    pub generate: f32,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            classify: 0.1,
            generate: 0.3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding session lifetime in seconds. Entries older than this are
    /// treated as absent; entries older than twice this are evicted.
    #[serde(default = "d_300")]
    pub ttl_s: u64,
    /// Hard per-turn deadline. Must stay under the frontend's 60 s limit.
    #[serde(default = "d_50")]
    pub graph_timeout_s: u64,
    /// A store-wide eviction sweep runs every N writes (and on the
    /// background tick).
    #[serde(default = "d_100")]
    pub evict_every_writes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_s: 300,
            graph_timeout_s: 50,
            evict_every_writes: 100,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub classification: ClassificationCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationCacheConfig {
    #[serde(default = "d_3600")]
    pub ttl_s: u64,
    #[serde(default = "d_1024")]
    pub capacity: usize,
}

impl Default for ClassificationCacheConfig {
    fn default() -> Self {
        Self {
            ttl_s: 3600,
            capacity: 1024,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialogue-manager thresholds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Confidence thresholds are tuned per model, so they live in config rather
/// than in the rule engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// At or above this, the top candidate is trusted outright.
    #[serde(default = "d_065")]
    pub high_threshold: f64,
    /// Below this, classification is considered failed.
    #[serde(default = "d_040")]
    pub min_threshold: f64,
    /// Maximum distance between the top two candidates for the ambiguity
    /// band to trigger a disambiguation question.
    #[serde(default = "d_015")]
    pub ambiguity_gap: f64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.65,
            min_threshold: 0.40,
            ambiguity_gap: 0.15,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Two-phase shaping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoPhaseConfig {
    /// Per-intent item-count thresholds above which a result is summarized
    /// and the full payload parked behind a confirmation.
    #[serde(default = "d_two_phase_thresholds")]
    pub thresholds: HashMap<String, usize>,
}

impl Default for TwoPhaseConfig {
    fn default() -> Self {
        Self {
            thresholds: d_two_phase_thresholds(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fallback recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Consecutive fallback turns before the stock "please rephrase" reply.
    #[serde(default = "d_3")]
    pub max_loop: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { max_loop: 3 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GDPR gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GdprConfig {
    /// Hard gate: remote LLM backends refuse to initialize unless this is
    /// explicitly enabled. Inspection data must stay on-premise by default.
    #[serde(default)]
    pub allow_external_llm: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Sanity-check the loaded configuration. Errors abort startup;
    /// warnings are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let error = |issues: &mut Vec<ConfigIssue>, msg: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: msg,
            });
        };
        let warn = |issues: &mut Vec<ConfigIssue>, msg: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: msg,
            });
        };

        if self.server.port == 0 {
            error(&mut issues, "server.port must be non-zero".into());
        }
        if self.server.max_concurrent == 0 {
            error(&mut issues, "server.max_concurrent must be > 0".into());
        }

        if self.llm.backend.is_external() && !self.gdpr.allow_external_llm {
            error(
                &mut issues,
                "llm.backend is external but gdpr.allow_external_llm is false".into(),
            );
        }
        if self.llm.backend.is_external() && self.llm.api_key_env.is_none() {
            warn(
                &mut issues,
                "llm.api_key_env not set for an external backend; requests will be unauthenticated"
                    .into(),
            );
        }
        if self.llm.timeout_s == 0 {
            error(&mut issues, "llm.timeout_s must be > 0".into());
        }
        for (name, t) in [
            ("classify", self.llm.temperature.classify),
            ("generate", self.llm.temperature.generate),
        ] {
            if !(0.0..=2.0).contains(&t) {
                error(
                    &mut issues,
                    format!("llm.temperature.{name} must be in [0, 2], got {t}"),
                );
            }
        }

        if self.session.ttl_s == 0 {
            error(&mut issues, "session.ttl_s must be > 0".into());
        }
        if self.session.graph_timeout_s == 0 {
            error(&mut issues, "session.graph_timeout_s must be > 0".into());
        }
        if self.session.graph_timeout_s >= 60 {
            warn(
                &mut issues,
                format!(
                    "session.graph_timeout_s = {} leaves no headroom under the frontend's 60 s limit",
                    self.session.graph_timeout_s
                ),
            );
        }

        if self.cache.classification.capacity == 0 {
            error(&mut issues, "cache.classification.capacity must be > 0".into());
        }

        let d = &self.dialogue;
        if !(0.0..=1.0).contains(&d.high_threshold)
            || !(0.0..=1.0).contains(&d.min_threshold)
            || d.min_threshold >= d.high_threshold
        {
            error(
                &mut issues,
                format!(
                    "dialogue thresholds must satisfy 0 <= min ({}) < high ({}) <= 1",
                    d.min_threshold, d.high_threshold
                ),
            );
        }
        if !(0.0..=1.0).contains(&d.ambiguity_gap) {
            error(&mut issues, "dialogue.ambiguity_gap must be in [0, 1]".into());
        }

        for (intent, threshold) in &self.two_phase.thresholds {
            if *threshold == 0 {
                error(
                    &mut issues,
                    format!("two_phase.thresholds.{intent} must be >= 1"),
                );
            }
        }

        if self.fallback.max_loop == 0 {
            error(&mut issues, "fallback.max_loop must be >= 1".into());
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_port() -> u16 {
    5005
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_256() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_llm_url() -> String {
    "http://localhost:11434".into()
}
fn d_llm_model() -> String {
    "qwen2.5:14b".into()
}
fn d_20() -> u64 {
    20
}
fn d_900() -> u32 {
    900
}
fn d_01() -> f32 {
    0.1
}
fn d_03() -> f32 {
    0.3
}
fn d_300() -> u64 {
    300
}
fn d_50() -> u64 {
    50
}
fn d_100() -> u64 {
    100
}
fn d_3600() -> u64 {
    3600
}
fn d_1024() -> usize {
    1024
}
fn d_065() -> f64 {
    0.65
}
fn d_040() -> f64 {
    0.40
}
fn d_015() -> f64 {
    0.15
}
fn d_3() -> u32 {
    3
}
fn d_two_phase_thresholds() -> HashMap<String, usize> {
    HashMap::from([
        ("ask_piano_stabilimenti".to_string(), 3),
        ("ask_priority_establishment".to_string(), 5),
        ("ask_establishment_history".to_string(), 5),
        ("ask_never_inspected".to_string(), 5),
        ("ask_sanctioned_establishments".to_string(), 5),
    ])
}
