use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Wire protocol constants — part of the external observer contract.
pub const PROTOCOL_VERSION: &str = "1.0";
pub const DEFAULT_WS_HOST: &str = "localhost";
pub const DEFAULT_WS_PORT: u16 = 8765;
/// High-priority events retained for replay to late joiners.
pub const REPLAY_CAPACITY: usize = 50;
/// Per-client WS send deadline before the observer is dropped.
pub const CLIENT_SEND_TIMEOUT_SECS: u64 = 5;
/// TTS worker join deadline during shutdown.
pub const TTS_JOIN_TIMEOUT_SECS: u64 = 2;

/// Top-level config (coda.toml + CODA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CodaConfig {
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_host")]
    pub host: String,
    #[serde(default = "default_ws_port")]
    pub port: u16,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: default_ws_host(),
            port: default_ws_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request deadline for one chat call, in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            base_url: default_ollama_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Engine label reported in tts_start events ("mock" ships in-tree;
    /// real engines register behind the same trait).
    #[serde(default = "default_tts_engine")]
    pub engine: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: default_tts_engine(),
            voice: default_tts_voice(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Capture mode reported in stt_start events.
    #[serde(default = "default_stt_mode")]
    pub mode: String,
    #[serde(default = "default_stt_language")]
    pub language: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            mode: default_stt_mode(),
            language: default_stt_language(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Short-term turn log capacity.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Context window token budget handed to the LLM.
    #[serde(default = "default_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_true")]
    pub long_term_enabled: bool,
    /// Long-term store directory. Empty string means in-memory mode.
    #[serde(default = "default_long_term_path")]
    pub long_term_path: String,
    /// Forgetting kicks in above this record count.
    #[serde(default = "default_max_memories")]
    pub max_memories: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Jaccard threshold for merging topic clusters.
    #[serde(default = "default_topic_similarity")]
    pub topic_similarity_threshold: f64,
    #[serde(default = "default_max_topics_per_cluster")]
    pub max_topics_per_cluster: usize,
    /// Seconds a cached cluster summary stays valid.
    #[serde(default = "default_summary_ttl")]
    pub summary_cache_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_context_tokens: default_context_tokens(),
            long_term_enabled: true,
            long_term_path: default_long_term_path(),
            max_memories: default_max_memories(),
            min_similarity: default_min_similarity(),
            topic_similarity_threshold: default_topic_similarity(),
            max_topics_per_cluster: default_max_topics_per_cluster(),
            summary_cache_ttl_secs: default_summary_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Resource sampling interval for system_metrics events.
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_secs: default_monitoring_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root of the on-disk layout (logs, exports, memory, snapshots).
    #[serde(default = "default_data_dir")]
    pub dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_ws_host() -> String {
    DEFAULT_WS_HOST.to_string()
}
fn default_ws_port() -> u16 {
    DEFAULT_WS_PORT
}
fn default_llm_model() -> String {
    "llama3".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    256
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_tts_engine() -> String {
    "mock".to_string()
}
fn default_tts_voice() -> String {
    "alexandra".to_string()
}
fn default_stt_mode() -> String {
    "continuous".to_string()
}
fn default_stt_language() -> String {
    "en".to_string()
}
fn default_max_turns() -> usize {
    20
}
fn default_context_tokens() -> usize {
    800
}
fn default_true() -> bool {
    true
}
fn default_long_term_path() -> String {
    "data/memory/long_term".to_string()
}
fn default_max_memories() -> usize {
    1000
}
fn default_min_similarity() -> f64 {
    0.3
}
fn default_topic_similarity() -> f64 {
    0.7
}
fn default_max_topics_per_cluster() -> usize {
    5
}
fn default_summary_ttl() -> u64 {
    3600
}
fn default_monitoring_interval() -> u64 {
    5
}
fn default_data_dir() -> String {
    "data".to_string()
}

impl CodaConfig {
    /// Load config from a TOML file with CODA_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then ./coda.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("coda.toml");

        let config: CodaConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CODA_").split("_"))
            .extract()
            .map_err(|e| crate::error::CodaError::Config(e.to_string()))?;

        Ok(config)
    }
}
