// Configuration management module
// TOML settings for the model server, retrieval policy and evaluation runs

pub mod settings;

use console::style;

pub use settings::{
    Config, ConfigError, EmbeddingBackend, EmbeddingConfig, EvaluationConfig, OllamaConfig,
    RetrievalConfig, is_valid_table_name,
};

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> anyhow::Result<()> {
    eprintln!("{}", style("Current Configuration").bold().cyan());
    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Embedding model: {}", style(&config.ollama.model).cyan());
    eprintln!(
        "  Generation model: {}",
        style(&config.ollama.generation_model).cyan()
    );
    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Similarity threshold: {}",
        style(config.retrieval.similarity_threshold).cyan()
    );
    eprintln!("  Medication top N: {}", style(config.retrieval.top_n).cyan());
    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!("Corpus database: {}", style(config.database_path().display()).dim());
    eprintln!("Metrics log: {}", style(config.metrics_log_path().display()).dim());

    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
