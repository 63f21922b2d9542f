use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::embeddings::{gemini, DEFAULT_DIMENSIONS, DEFAULT_MODEL};

pub const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;
const DEFAULT_MIN_SIMILARITY: f32 = 0.5;
const MAX_QUERY_LENGTH: usize = 500;
/// Score given to keyword matches, below any vector match that passed the threshold
const KEYWORD_SCORE: f32 = 0.3;
const EMBED_TIMEOUT_MS: u64 = 3000;

const BATCH_SIZE: usize = 10;
const BATCH_DELAY_MS: u64 = 1000;
const MAX_BATCH_IDS: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// How often expired windows are dropped
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// When set, vectorize endpoints require `Authorization: Bearer <token>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_token: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_products_file")]
    pub products_file: String,
    #[serde(default = "default_embeddings_file")]
    pub embeddings_file: String,
    #[serde(default = "default_interactions_file")]
    pub interactions_file: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            products_file: default_products_file(),
            embeddings_file: default_embeddings_file(),
            interactions_file: default_interactions_file(),
        }
    }
}

fn default_products_file() -> String {
    "products.csv".to_string()
}

fn default_embeddings_file() -> String {
    "embeddings.bin".to_string()
}

fn default_interactions_file() -> String {
    "interactions.jsonl".to_string()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Gemini,
    /// fastembed, requires the `local-embeddings` feature
    Local,
    /// Keyword search only
    None,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the provider API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Upper bound of concurrent provider requests within a batch
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            dimensions: default_dimensions(),
            request_timeout_ms: default_request_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    gemini::DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_concurrency() -> usize {
    5
}

fn default_max_retries() -> usize {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

/// Which candidates the keyword matcher looks at when vector scoring succeeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordScope {
    /// Every candidate; matches already found by vector scoring are deduplicated
    #[default]
    All,
    /// Only candidates without a usable embedding
    Unembedded,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_min_similarity")]
    pub default_min_similarity: f32,
    #[serde(default = "max_query_length")]
    pub max_query_length: usize,
    #[serde(default = "keyword_score")]
    pub keyword_score: f32,
    #[serde(default = "embed_timeout_ms")]
    pub embed_timeout_ms: u64,
    #[serde(default)]
    pub keyword_scope: KeywordScope,
    /// Drop vector hits whose score is within `1 - threshold` of a better one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_threshold: Option<f32>,
    #[serde(default = "default_true")]
    pub log_interactions: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            default_min_similarity: DEFAULT_MIN_SIMILARITY,
            max_query_length: MAX_QUERY_LENGTH,
            keyword_score: KEYWORD_SCORE,
            embed_timeout_ms: EMBED_TIMEOUT_MS,
            keyword_scope: KeywordScope::default(),
            dedupe_threshold: None,
            log_interactions: true,
        }
    }
}

impl SearchConfig {
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn max_limit() -> usize {
    MAX_LIMIT
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn max_query_length() -> usize {
    MAX_QUERY_LENGTH
}

fn keyword_score() -> f32 {
    KEYWORD_SCORE
}

fn embed_timeout_ms() -> u64 {
    EMBED_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

/// What happens to the rest of a batch after one item fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep embedding the remaining items of the batch
    #[default]
    Continue,
    /// Count the remaining items of the batch as failed, move on to the next batch
    AbortBatch,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorizeConfig {
    #[serde(default = "batch_size")]
    pub batch_size: usize,
    #[serde(default = "batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "max_batch_ids")]
    pub max_batch_ids: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Re-embed products whose text changed since their embedding was stored
    #[serde(default = "default_true")]
    pub refresh_stale: bool,
}

impl Default for VectorizeConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            batch_delay_ms: BATCH_DELAY_MS,
            max_batch_ids: MAX_BATCH_IDS,
            failure_policy: FailurePolicy::default(),
            refresh_stale: true,
        }
    }
}

impl VectorizeConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

fn batch_size() -> usize {
    BATCH_SIZE
}

fn batch_delay_ms() -> u64 {
    BATCH_DELAY_MS
}

fn max_batch_ids() -> usize {
    MAX_BATCH_IDS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub vectorize: VectorizeConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let search = &self.search;
        if search.max_limit == 0 {
            bail!("search.max_limit must be greater than 0");
        }
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            bail!(
                "search.default_limit must be between 1 and search.max_limit ({}), got {}",
                search.max_limit,
                search.default_limit
            );
        }
        if !(0.0..=1.0).contains(&search.default_min_similarity) {
            bail!(
                "search.default_min_similarity must be between 0.0 and 1.0, got {}",
                search.default_min_similarity
            );
        }
        if !(0.0..=1.0).contains(&search.keyword_score) {
            bail!(
                "search.keyword_score must be between 0.0 and 1.0, got {}",
                search.keyword_score
            );
        }
        if let Some(threshold) = search.dedupe_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                bail!("search.dedupe_threshold must be between 0.0 and 1.0, got {threshold}");
            }
        }
        if search.max_query_length == 0 {
            bail!("search.max_query_length must be greater than 0");
        }
        if search.embed_timeout_ms == 0 {
            bail!("search.embed_timeout_ms must be greater than 0");
        }

        let embedding = &self.embedding;
        if embedding.provider != ProviderKind::None && embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if embedding.provider == ProviderKind::Gemini
            && (embedding.dimensions == 0 || embedding.dimensions > u16::MAX as usize)
        {
            bail!(
                "embedding.dimensions must be between 1 and {}, got {}",
                u16::MAX,
                embedding.dimensions
            );
        }
        if embedding.max_concurrency == 0 {
            bail!("embedding.max_concurrency must be greater than 0");
        }
        if embedding.request_timeout_ms == 0 {
            bail!("embedding.request_timeout_ms must be greater than 0");
        }

        let vectorize = &self.vectorize;
        if vectorize.batch_size == 0 {
            bail!("vectorize.batch_size must be greater than 0");
        }
        if vectorize.max_batch_ids == 0 {
            bail!("vectorize.max_batch_ids must be greater than 0");
        }

        let rate_limit = &self.server.rate_limit;
        if rate_limit.max_requests == 0 || rate_limit.window_secs == 0 {
            bail!("server.rate_limit.max_requests and window_secs must be greater than 0");
        }
        if rate_limit.sweep_interval_secs == 0 {
            bail!("server.rate_limit.sweep_interval_secs must be greater than 0");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults when missing.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            log::info!("Writing default config to {}", config_path.display());
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", config_path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a configured file name against the base directory.
    pub fn resolve(&self, file: &str) -> PathBuf {
        self.base_path.join(file)
    }
}
