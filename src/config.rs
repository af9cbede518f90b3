//! Engine configuration.
///
/// A plain struct constructed once and passed through the `Engine`
/// constructor rather than threaded global singletons.
/// `Config::from_env()` is the only place that reads process environment
/// variables; everything downstream takes `&Config`.
use std::path::PathBuf;

/// Embedding backend selection, mirroring `RECALL_EMBEDDING_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingMode {
    /// Vector layer disabled entirely.
    None,
    /// Local sentence-transformer style backend.
    Local,
    /// OpenAI-compatible remote HTTP API.
    OpenAi,
    /// SiliconFlow-compatible remote HTTP API.
    SiliconFlow,
    /// Custom remote HTTP API with a user-supplied base URL.
    Custom,
}

impl EmbeddingMode {
    fn from_env_str(s: &str) -> Self {
        match s {
            "local" => EmbeddingMode::Local,
            "openai" => EmbeddingMode::OpenAi,
            "siliconflow" => EmbeddingMode::SiliconFlow,
            "custom" => EmbeddingMode::Custom,
            _ => EmbeddingMode::None,
        }
    }
}

/// Extraction mode, mirroring `LLM_RELATION_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Rules,
    Adaptive,
    Llm,
}

impl ExtractionMode {
    fn from_env_str(s: &str) -> Self {
        match s {
            "rules" => ExtractionMode::Rules,
            "llm" => ExtractionMode::Llm,
            _ => ExtractionMode::Adaptive,
        }
    }
}

/// Top-level configuration for an `Engine` instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_root: PathBuf,

    pub embedding_mode: EmbeddingMode,
    pub embedding_api_key: Option<String>,
    pub embedding_api_base: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimension: usize,
    pub embedding_rate_limit: u32,
    pub embedding_rate_window_secs: u64,

    pub llm_api_key: Option<String>,
    pub llm_api_base: Option<String>,
    pub llm_model: Option<String>,
    pub llm_default_max_tokens: u32,
    pub extraction_mode: ExtractionMode,

    pub entity_summary_enabled: bool,
    pub episode_tracking_enabled: bool,
    pub foreshadowing_llm_enabled: bool,
    /// N-turn auto-trigger cadence for the foreshadowing analyzer. The
    /// stub analyzer never reads it (no active background scan), but it's
    /// wired through so a future analyzer has a knob to read.
    pub foreshadowing_check_interval: u64,

    pub context_max_per_type: usize,
    pub context_max_total: usize,
    pub context_decay_days: i64,

    pub dedup_high_threshold: f32,
    pub dedup_low_threshold: f32,

    /// Turns per volume (VolumeStore §4.1).
    pub volume_size: u64,
    /// Turns per file within a volume.
    pub volume_file_size: u64,
    /// Most-recent volumes kept fully resident in memory.
    pub preload_volumes: usize,

    /// WAL lines before InvertedIndex/MetadataIndex compact.
    pub compact_threshold: usize,

    /// HTTP bind address.
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            embedding_mode: EmbeddingMode::None,
            embedding_api_key: None,
            embedding_api_base: None,
            embedding_model: None,
            embedding_dimension: 384,
            embedding_rate_limit: 60,
            embedding_rate_window_secs: 60,
            llm_api_key: None,
            llm_api_base: None,
            llm_model: None,
            llm_default_max_tokens: 1024,
            extraction_mode: ExtractionMode::Adaptive,
            entity_summary_enabled: false,
            episode_tracking_enabled: false,
            foreshadowing_llm_enabled: false,
            foreshadowing_check_interval: 50,
            context_max_per_type: 10,
            context_max_total: 40,
            context_decay_days: 30,
            dedup_high_threshold: 0.92,
            dedup_low_threshold: 0.75,
            volume_size: 100_000,
            volume_file_size: 10_000,
            preload_volumes: 2,
            compact_threshold: 10_000,
            bind_addr: "127.0.0.1:18888".to_string(),
        }
    }
}

fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("recall")
}

impl Config {
    /// Build a configuration from process environment variables, falling
    /// back to defaults for anything unset. This is the only function in
    /// the crate allowed to call `std::env::var`.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("RECALL_DATA_ROOT") {
            cfg.data_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RECALL_EMBEDDING_MODE") {
            cfg.embedding_mode = EmbeddingMode::from_env_str(&v);
        }
        cfg.embedding_api_key = std::env::var("EMBEDDING_API_KEY").ok();
        cfg.embedding_api_base = std::env::var("EMBEDDING_API_BASE").ok();
        cfg.embedding_model = std::env::var("EMBEDDING_MODEL").ok();
        if let Ok(v) = std::env::var("EMBEDDING_DIMENSION") {
            if let Ok(n) = v.parse() {
                cfg.embedding_dimension = n;
            }
        }
        if let Ok(v) = std::env::var("EMBEDDING_RATE_LIMIT") {
            if let Ok(n) = v.parse() {
                cfg.embedding_rate_limit = n;
            }
        }
        if let Ok(v) = std::env::var("EMBEDDING_RATE_WINDOW") {
            if let Ok(n) = v.parse() {
                cfg.embedding_rate_window_secs = n;
            }
        }
        cfg.llm_api_key = std::env::var("LLM_API_KEY").ok();
        cfg.llm_api_base = std::env::var("LLM_API_BASE").ok();
        cfg.llm_model = std::env::var("LLM_MODEL").ok();
        if let Ok(v) = std::env::var("LLM_DEFAULT_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                cfg.llm_default_max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("LLM_RELATION_MODE") {
            cfg.extraction_mode = ExtractionMode::from_env_str(&v);
        }
        cfg.entity_summary_enabled = env_flag("ENTITY_SUMMARY_ENABLED", cfg.entity_summary_enabled);
        cfg.episode_tracking_enabled =
            env_flag("EPISODE_TRACKING_ENABLED", cfg.episode_tracking_enabled);
        cfg.foreshadowing_llm_enabled =
            env_flag("FORESHADOWING_LLM_ENABLED", cfg.foreshadowing_llm_enabled);

        if let Ok(v) = std::env::var("CONTEXT_MAX_PER_TYPE") {
            if let Ok(n) = v.parse() {
                cfg.context_max_per_type = n;
            }
        }
        if let Ok(v) = std::env::var("CONTEXT_MAX_TOTAL") {
            if let Ok(n) = v.parse() {
                cfg.context_max_total = n;
            }
        }
        if let Ok(v) = std::env::var("CONTEXT_DECAY_DAYS") {
            if let Ok(n) = v.parse() {
                cfg.context_decay_days = n;
            }
        }
        if let Ok(v) = std::env::var("DEDUP_HIGH_THRESHOLD") {
            if let Ok(n) = v.parse() {
                cfg.dedup_high_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("DEDUP_LOW_THRESHOLD") {
            if let Ok(n) = v.parse() {
                cfg.dedup_low_threshold = n;
            }
        }

        cfg
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => default,
    }
}
