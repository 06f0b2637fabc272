use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Credentials read from the environment once at startup, never from TOML.
    #[serde(skip)]
    pub secrets: Secrets,
}

/// Markdown source locations and extraction behavior.
#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_posts_dir")]
    pub posts_dir: PathBuf,
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    #[serde(default = "default_resume_path")]
    pub resume_path: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_normalization")]
    pub normalization: NormalizationMode,
    #[serde(default = "default_max_doc_chars")]
    pub max_doc_chars: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            posts_dir: default_posts_dir(),
            projects_dir: default_projects_dir(),
            resume_path: default_resume_path(),
            include_globs: default_include_globs(),
            normalization: default_normalization(),
            max_doc_chars: default_max_doc_chars(),
        }
    }
}

fn default_posts_dir() -> PathBuf {
    PathBuf::from("content/posts")
}
fn default_projects_dir() -> PathBuf {
    PathBuf::from("content/projects")
}
fn default_resume_path() -> PathBuf {
    PathBuf::from("content/resume.md")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.mdx".to_string()]
}
fn default_normalization() -> NormalizationMode {
    NormalizationMode::Structured
}
fn default_max_doc_chars() -> usize {
    16_000
}

/// How markdown markup is reduced to plain text before chunking.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    /// Keep structure as inline markers (TITLE:/SECTION:, bullets, IMPORTANT:).
    Structured,
    /// Strip all markup down to near-plain text.
    Aggressive,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_mode")]
    pub mode: ChunkMode,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            mode: default_chunk_mode(),
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_mode() -> ChunkMode {
    ChunkMode::Semantic
}
fn default_chunk_size() -> usize {
    1200
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    /// Paragraph/sentence boundaries with greedy packing.
    Semantic,
    /// Fixed-size sliding character window.
    Character,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            timeout_secs: default_embed_timeout_secs(),
            base_url: default_api_base_url(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    64
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_api_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("data/index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_chars: default_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_context_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            timeout_secs: default_generation_timeout_secs(),
            max_history_turns: default_max_history_turns(),
            base_url: default_api_base_url(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_max_history_turns() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Allowed requests per window per client key. 0 disables rate limiting.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_requests() -> u32 {
    30
}
fn default_window_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins allowed to call /chat in addition to the server's own host.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_message_max_chars")]
    pub message_max_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            message_max_chars: default_message_max_chars(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_max_body_bytes() -> usize {
    16 * 1024
}
fn default_message_max_chars() -> usize {
    2000
}

/// Provider and rate-limit store credentials, read from the environment
/// exactly once at startup. Empty variables count as unset.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub ratelimit_rest_url: Option<String>,
    pub ratelimit_rest_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            ratelimit_rest_url: non_empty_env("UPSTASH_REDIS_REST_URL"),
            ratelimit_rest_token: non_empty_env("UPSTASH_REDIS_REST_TOKEN"),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.secrets = Secrets::from_env();

    validate(&mut config)?;

    Ok(config)
}

/// Check value ranges and repair the one tolerated misconfiguration:
/// an overlap at or above the chunk size is clamped to `chunk_size - 1`
/// so the sliding window always makes forward progress.
fn validate(config: &mut Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.chunking.overlap >= config.chunking.chunk_size {
        let clamped = config.chunking.chunk_size - 1;
        warn!(
            overlap = config.chunking.overlap,
            chunk_size = config.chunking.chunk_size,
            clamped, "chunking.overlap >= chunk_size, clamping"
        );
        config.chunking.overlap = clamped;
    }

    if config.content.max_doc_chars == 0 {
        anyhow::bail!("content.max_doc_chars must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.context_chars == 0 {
        anyhow::bail!("retrieval.context_chars must be > 0");
    }

    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }
    if config.generation.max_history_turns == 0 {
        anyhow::bail!("generation.max_history_turns must be >= 1");
    }

    if config.rate_limit.max_requests > 0 && config.rate_limit.window_secs == 0 {
        anyhow::bail!("rate_limit.window_secs must be > 0 when rate limiting is enabled");
    }

    if config.server.max_body_bytes == 0 {
        anyhow::bail!("server.max_body_bytes must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gets_defaults() {
        let mut config: Config = toml::from_str("").unwrap();
        validate(&mut config).unwrap();
        assert_eq!(config.chunking.chunk_size, 1200);
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.content.max_doc_chars, 16_000);
        assert_eq!(config.index.path, PathBuf::from("data/index.json"));
    }

    #[test]
    fn test_overlap_clamped_below_chunk_size() {
        let mut config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_size = 100
            overlap = 150
            "#,
        )
        .unwrap();
        validate(&mut config).unwrap();
        assert_eq!(config.chunking.overlap, 99);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_size = 0
            "#,
        )
        .unwrap();
        assert!(validate(&mut config).is_err());
    }

    #[test]
    fn test_normalization_mode_parses() {
        let config: Config = toml::from_str(
            r#"
            [content]
            normalization = "aggressive"
            "#,
        )
        .unwrap();
        assert_eq!(config.content.normalization, NormalizationMode::Aggressive);
    }
}
