//! TOML configuration.
//!
//! Every knob has a default, so a workspace without a `recall.toml` works
//! out of the box with the offline `local` provider. Callers may override
//! any [`BuildConfig`] field per build.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embedding::ProviderKind;
use crate::error::{RecallError, Result};
use crate::models::{ChunkingParams, DocKind, Fingerprint};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl Config {
    /// Directory holding `index.json` and `meta.json` for `root`.
    pub fn index_dir(&self, root: &Path) -> PathBuf {
        if self.index.dir.is_absolute() {
            self.index.dir.clone()
        } else {
            root.join(&self.index.dir)
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.build.validate()?;
        if self.jobs.history_limit == 0 {
            return Err(RecallError::Config("jobs.history_limit must be > 0".into()));
        }
        if self.embedding.local_batch_size == 0 || self.embedding.remote_batch_size == 0 {
            return Err(RecallError::Config(
                "embedding batch sizes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from(".recall")
}

/// Parameters of a single build. Everything except `force` and
/// `max_total_chunks` is part of the reuse fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Defaults per provider when unset (see [`BuildConfig::model_name`]).
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dim")]
    pub dim: usize,
    #[serde(default = "default_kinds")]
    pub kinds: Vec<DocKind>,
    #[serde(default = "default_recent_days")]
    pub recent_days: u32,
    #[serde(default = "default_max_chunks_per_file")]
    pub max_chunks_per_file: usize,
    #[serde(default = "default_max_chars_per_chunk")]
    pub max_chars_per_chunk: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_max_total_chunks")]
    pub max_total_chunks: usize,
    #[serde(default = "default_max_embed_chars")]
    pub max_embed_chars: usize,
    #[serde(default)]
    pub force: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dim: default_dim(),
            kinds: default_kinds(),
            recent_days: default_recent_days(),
            max_chunks_per_file: default_max_chunks_per_file(),
            max_chars_per_chunk: default_max_chars_per_chunk(),
            overlap_chars: default_overlap_chars(),
            max_total_chunks: default_max_total_chunks(),
            max_embed_chars: default_max_embed_chars(),
            force: false,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_dim() -> usize {
    256
}
fn default_kinds() -> Vec<DocKind> {
    DocKind::ALL.to_vec()
}
fn default_recent_days() -> u32 {
    14
}
fn default_max_chunks_per_file() -> usize {
    64
}
fn default_max_chars_per_chunk() -> usize {
    1200
}
fn default_overlap_chars() -> usize {
    160
}
fn default_max_total_chunks() -> usize {
    5000
}
fn default_max_embed_chars() -> usize {
    4000
}

impl BuildConfig {
    pub fn provider_kind(&self) -> Result<ProviderKind> {
        self.provider.parse()
    }

    /// The configured model, or the provider's default model.
    pub fn model_name(&self) -> Result<String> {
        match &self.model {
            Some(m) if !m.trim().is_empty() => Ok(m.clone()),
            _ => Ok(self.provider_kind()?.default_model().to_string()),
        }
    }

    pub fn chunking(&self) -> ChunkingParams {
        ChunkingParams {
            max_chunks_per_file: self.max_chunks_per_file,
            max_chars_per_chunk: self.max_chars_per_chunk,
            overlap_chars: self.overlap_chars,
            max_total_chunks: self.max_total_chunks,
            max_embed_chars: self.max_embed_chars,
        }
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::new(
            self.provider_kind()?.as_str(),
            &self.model_name()?,
            self.dim,
            &self.kinds,
            self.recent_days,
            &self.chunking(),
        ))
    }

    pub fn validate(&self) -> Result<()> {
        self.provider_kind()?;
        if self.dim == 0 {
            return Err(RecallError::Config("build.dim must be > 0".into()));
        }
        if self.kinds.is_empty() {
            return Err(RecallError::Config("build.kinds must not be empty".into()));
        }
        if self.max_chars_per_chunk == 0 {
            return Err(RecallError::Config(
                "build.max_chars_per_chunk must be > 0".into(),
            ));
        }
        if self.overlap_chars >= self.max_chars_per_chunk {
            return Err(RecallError::Config(
                "build.overlap_chars must be smaller than build.max_chars_per_chunk".into(),
            ));
        }
        if self.max_chunks_per_file == 0 {
            return Err(RecallError::Config(
                "build.max_chunks_per_file must be > 0".into(),
            ));
        }
        if self.max_embed_chars == 0 {
            return Err(RecallError::Config("build.max_embed_chars must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Inline credential; takes precedence over `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_local_batch_size")]
    pub local_batch_size: usize,
    #[serde(default = "default_remote_batch_size")]
    pub remote_batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            local_batch_size: default_local_batch_size(),
            remote_batch_size: default_remote_batch_size(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_local_batch_size() -> usize {
    256
}
fn default_remote_batch_size() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            min_score: 0.0,
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_k() -> usize {
    8
}
fn default_excerpt_chars() -> usize {
    240
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

fn default_history_limit() -> usize {
    20
}

/// Glob patterns (relative to the workspace root) selecting each kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_notes_globs")]
    pub notes: Vec<String>,
    #[serde(default = "default_tasks_globs")]
    pub tasks: Vec<String>,
    #[serde(default = "default_log_globs")]
    pub log: Vec<String>,
    #[serde(default = "default_session_globs")]
    pub session: Vec<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            notes: default_notes_globs(),
            tasks: default_tasks_globs(),
            log: default_log_globs(),
            session: default_session_globs(),
        }
    }
}

impl LayoutConfig {
    pub fn patterns(&self, kind: DocKind) -> &[String] {
        match kind {
            DocKind::Notes => &self.notes,
            DocKind::Tasks => &self.tasks,
            DocKind::Log => &self.log,
            DocKind::Session => &self.session,
        }
    }
}

fn default_notes_globs() -> Vec<String> {
    vec![
        "NOTES.md".to_string(),
        "notes/**/*.md".to_string(),
        "notes/**/*.txt".to_string(),
    ]
}
fn default_tasks_globs() -> Vec<String> {
    vec![
        "TASKS.md".to_string(),
        "TODO.md".to_string(),
        "tasks/**/*.md".to_string(),
    ]
}
fn default_log_globs() -> Vec<String> {
    vec!["log/*.md".to_string(), "logs/*.md".to_string()]
}
fn default_session_globs() -> Vec<String> {
    vec!["sessions/**/*.md".to_string()]
}

/// Load configuration from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.build.provider, "local");
        assert_eq!(config.build.model_name().unwrap(), "hash-v1");
        assert_eq!(config.build.kinds.len(), 4);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [build]
            dim = 64
            kinds = ["notes", "log"]

            [search]
            k = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.build.dim, 64);
        assert_eq!(config.build.kinds, vec![DocKind::Notes, DocKind::Log]);
        assert_eq!(config.build.overlap_chars, 160);
        assert_eq!(config.search.k, 3);
        assert_eq!(config.jobs.history_limit, 20);
    }

    #[test]
    fn unknown_provider_rejected() {
        let build = BuildConfig {
            provider: "word2vec".into(),
            ..BuildConfig::default()
        };
        let err = build.validate().unwrap_err();
        assert!(matches!(err, RecallError::Config(_)));
    }

    #[test]
    fn overlap_must_be_below_max() {
        let build = BuildConfig {
            max_chars_per_chunk: 100,
            overlap_chars: 100,
            ..BuildConfig::default()
        };
        assert!(build.validate().is_err());
    }

    #[test]
    fn openai_default_model() {
        let build = BuildConfig {
            provider: "openai".into(),
            ..BuildConfig::default()
        };
        assert_eq!(build.model_name().unwrap(), "text-embedding-3-small");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config(&tmp.path().join("recall.toml")).unwrap();
        assert_eq!(config.build.dim, 256);
    }

    #[test]
    fn relative_index_dir_is_joined() {
        let config = Config::default();
        assert_eq!(
            config.index_dir(Path::new("/ws")),
            PathBuf::from("/ws/.recall")
        );
    }
}
