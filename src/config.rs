use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;

use crate::corpus::Field;
use crate::error::{Result, RetrievalError};
use crate::passage::PassageField;

pub type Number = f32;

pub const EPSILON: f32 = 1e-6;

/// Tolerance used when checking that a vector has unit length.
pub const NORM_TOLERANCE: f32 = 1e-3;

const CONFIG_FILE: &str = "scheme_rag_config";
const ENV_PREFIX: &str = "SCHEME_RAG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Offline feature-hashing embedder.
    Hashing,
    /// Ollama-compatible `/api/embed` endpoint.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
    /// Output dimension of the hashing embedder. Remote models decide their own.
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Hashing,
            base_url: "http://localhost:11434".to_string(),
            model: "paraphrase-multilingual-minilm".to_string(),
            timeout_secs: 30,
            batch_size: 64,
            dimensions: 384,
        }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-field repeat counts used to build the composite document text.
/// Fields not listed count once; a weight of zero drops the field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FieldWeights(BTreeMap<String, u32>);

impl FieldWeights {
    pub fn weight(&self, field: Field) -> u32 {
        self.0.get(field.name()).copied().unwrap_or(1)
    }

    pub fn with(mut self, field: Field, weight: u32) -> Self {
        self.0.insert(field.name().to_string(), weight);
        self
    }

    /// Every field counted once.
    pub fn uniform() -> Self {
        Self(BTreeMap::new())
    }

    fn validate(&self) -> Result<()> {
        for key in self.0.keys() {
            key.parse::<Field>().map_err(RetrievalError::Config)?;
        }
        Ok(())
    }
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self::uniform()
            .with(Field::SchemeName, 5)
            .with(Field::Tags, 3)
            .with(Field::Category, 0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub top_k: usize,
    /// Results scoring below this are dropped. The 0.0 default keeps every
    /// non-negative match and drops anti-correlated ones; pass -1.0 to keep
    /// everything.
    pub min_score: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PassageSettings {
    pub fields: Vec<PassageField>,
}

impl Default for PassageSettings {
    fn default() -> Self {
        Self {
            fields: vec![
                PassageField::new(Field::SchemeName, None),
                PassageField::new(Field::Details, Some(350)),
                PassageField::new(Field::Benefits, Some(200)),
                PassageField::new(Field::Eligibility, Some(200)),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    pub max_passage_chars: usize,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            max_passage_chars: 1200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub corpus_path: PathBuf,
    pub index_dir: PathBuf,
    pub index_file: String,
    pub metadata_file: String,
    pub embedding: EmbeddingSettings,
    pub weights: FieldWeights,
    pub search: SearchSettings,
    pub passage: PassageSettings,
    pub prompt: PromptSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            corpus_path: PathBuf::from("data/updated_data.csv"),
            index_dir: PathBuf::from("index"),
            index_file: "vectors.idx".to_string(),
            metadata_file: "index_meta.bin".to_string(),
            embedding: EmbeddingSettings::default(),
            weights: FieldWeights::default(),
            search: SearchSettings::default(),
            passage: PassageSettings::default(),
            prompt: PromptSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, overridden by an optional `scheme_rag_config.*` file in the
    /// working directory, overridden by `SCHEME_RAG_*` variables
    /// (`SCHEME_RAG_SEARCH__TOP_K=5`).
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RetrievalError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| RetrievalError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.batch_size == 0 {
            return Err(RetrievalError::Config("embedding.batch_size must be positive".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(RetrievalError::Config("embedding.dimensions must be positive".into()));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(RetrievalError::Config("embedding.timeout_secs must be positive".into()));
        }
        if self.search.top_k == 0 {
            return Err(RetrievalError::Config("search.top_k must be positive".into()));
        }
        if !(-1.0..=1.0).contains(&self.search.min_score) {
            return Err(RetrievalError::Config(format!(
                "search.min_score must lie in [-1, 1], got {}",
                self.search.min_score
            )));
        }
        self.weights.validate()
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join(&self.index_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.index_dir.join(&self.metadata_file)
    }

    pub fn print_config(&self) {
        println!("corpus_path={}", self.corpus_path.display());
        println!("index_path={}", self.index_path().display());
        println!("metadata_path={}", self.metadata_path().display());
        println!("embedding.provider={:?}", self.embedding.provider);
        println!("embedding.base_url={}", self.embedding.base_url);
        println!("embedding.model={}", self.embedding.model);
        println!("embedding.timeout_secs={}", self.embedding.timeout_secs);
        println!("embedding.batch_size={}", self.embedding.batch_size);
        println!("embedding.dimensions={}", self.embedding.dimensions);
        for field in Field::ALL {
            println!("weights.{}={}", field, self.weights.weight(field));
        }
        println!("search.top_k={}", self.search.top_k);
        println!("search.min_score={}", self.search.min_score);
        for pf in &self.passage.fields {
            match pf.max_chars {
                Some(limit) => println!("passage.{}={}", pf.field, limit),
                None => println!("passage.{}=unlimited", pf.field),
            }
        }
        println!("prompt.max_passage_chars={}", self.prompt.max_passage_chars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_boost_name_and_tags() {
        let weights = FieldWeights::default();
        assert_eq!(weights.weight(Field::SchemeName), 5);
        assert_eq!(weights.weight(Field::Tags), 3);
        assert_eq!(weights.weight(Field::Category), 0);
        assert_eq!(weights.weight(Field::Details), 1);
    }

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.index_path(), PathBuf::from("index/vectors.idx"));
        assert_eq!(settings.search.top_k, 3);
        assert_eq!(settings.search.min_score, 0.0);
    }

    #[test]
    fn unknown_weight_field_is_rejected() {
        let mut settings = Settings::default();
        settings.weights = FieldWeights::uniform();
        settings.weights.0.insert("pincode".into(), 2);
        assert!(matches!(settings.validate(), Err(RetrievalError::Config(_))));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut settings = Settings::default();
        settings.embedding.batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_deserialize_from_toml_source() {
        let toml = r#"
            index_dir = "/tmp/idx"

            [embedding]
            provider = "http"
            model = "nomic-embed-text"

            [weights]
            scheme_name = 2

            [search]
            top_k = 7
            min_score = 0.2

            [[passage.fields]]
            field = "details"
            max_chars = 10
        "#;
        let settings: Settings = Config::builder()
            .add_source(ConfigFile::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.index_dir, PathBuf::from("/tmp/idx"));
        assert_eq!(settings.embedding.provider, ProviderKind::Http);
        assert_eq!(settings.embedding.batch_size, 64);
        assert_eq!(settings.weights.weight(Field::SchemeName), 2);
        assert_eq!(settings.weights.weight(Field::Tags), 1);
        assert_eq!(settings.search.top_k, 7);
        assert_eq!(settings.passage.fields, vec![PassageField::new(Field::Details, Some(10))]);
        settings.validate().unwrap();
    }
}
