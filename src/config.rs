use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Runtime configuration assembled once in `main` and passed by reference.
///
/// Values come from the environment plus the global `--root` flag; nothing
/// reads environment variables after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: Paths,
    pub db_path: PathBuf,
    pub llm: LlmConfig,
}

/// Directory layout rooted at the workspace directory.
///
/// `data/` holds one subdirectory per project, `artifacts/` the index
/// byproducts, `outputs/` the extraction results and cost log.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub outputs_dir: PathBuf,
}

impl Paths {
    pub fn new(root: &Path) -> Self {
        let artifacts_dir = root.join("artifacts");
        Self {
            root: root.to_path_buf(),
            data_dir: root.join("data"),
            cache_dir: artifacts_dir.join("cache"),
            artifacts_dir,
            outputs_dir: root.join("outputs"),
        }
    }

    /// Create the data/artifacts/outputs directories if missing.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.artifacts_dir, &self.outputs_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn fragments_file(&self) -> PathBuf {
        self.artifacts_dir.join("fragments.jsonl")
    }

    pub fn fragment_ids_file(&self) -> PathBuf {
        self.artifacts_dir.join("fragment_ids.jsonl")
    }

    pub fn index_file(&self) -> PathBuf {
        self.artifacts_dir.join("tfidf.json")
    }

    pub fn index_copy_file(&self) -> PathBuf {
        self.outputs_dir.join("index.jsonl")
    }

    pub fn cost_log_file(&self) -> PathBuf {
        self.outputs_dir.join("cost_log.jsonl")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.outputs_dir.join("manifest.jsonl")
    }
}

/// Settings for the extraction LLM and its spend budget.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub budget_usd: f64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_budget_usd() -> f64 {
    3.0
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config(root: &Path) -> Result<Config> {
    let paths = Paths::new(root);

    let db_path = env_nonempty("DSR_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| root.join("dossier.sqlite"));

    let budget_usd = match env_nonempty("TOKEN_BUDGET_USD") {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Invalid TOKEN_BUDGET_USD: '{}'", raw))?,
        None => default_budget_usd(),
    };
    if !budget_usd.is_finite() || budget_usd < 0.0 {
        anyhow::bail!("TOKEN_BUDGET_USD must be a non-negative number");
    }

    let llm = LlmConfig {
        api_key: env_nonempty("OPENAI_API_KEY"),
        model: env_nonempty("OPENAI_MODEL").unwrap_or_else(default_model),
        base_url: env_nonempty("OPENAI_BASE_URL").unwrap_or_else(default_base_url),
        budget_usd,
    };

    Ok(Config {
        paths,
        db_path,
        llm,
    })
}
