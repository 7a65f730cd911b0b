use clap::{Parser, Subcommand};
use med_rag::Result;
use med_rag::commands::{
    ask, ask_medication, health_check, medication_info, process_label, run_evaluation,
    serve_mcp, show_sources,
};
use med_rag::config::{Config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "med-rag")]
#[command(about = "Retrieval-augmented medical question answering with answer quality scoring")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the corpus database and the metrics log
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Show the closest reference answer for a question
    Sources {
        question: String,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
    /// Answer a medical question grounded in the corpus
    Ask {
        question: String,
        /// Language of the answer, e.g. "spanish"
        #[arg(long)]
        language: Option<String>,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
    /// List the medications closest to a question
    Medication {
        question: String,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
    /// Answer a question about a medication from its drug sheet
    AskMedication {
        question: String,
        /// Language of the answer, e.g. "spanish"
        #[arg(long)]
        language: Option<String>,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
    /// Identify a medication from text read off its label
    Label {
        /// Text extracted from the label
        text: String,
        /// Language of the description
        #[arg(long)]
        language: Option<String>,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
    /// Score generated answers against sampled reference answers
    Evaluate {
        /// Number of question/answer pairs to sample (default from configuration)
        #[arg(long, short = 'n')]
        samples: Option<usize>,
        /// Also grade each answer on the 20-criterion rubric
        #[arg(long)]
        rubric: bool,
        /// Write the full JSON report to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Start MCP server on stdio
    Serve,
    /// Check the model server and corpus database
    Health,
}

fn load_config(config_dir: Option<PathBuf>) -> anyhow::Result<Config> {
    match config_dir {
        Some(dir) => Config::load(dir),
        None => Config::load_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if !show {
                eprintln!("Edit config.toml in the configuration directory to change settings");
            }
            show_config(&config)?;
        }
        Commands::Sources { question, json } => {
            show_sources(&config, &question, json).await?;
        }
        Commands::Ask {
            question,
            language,
            json,
        } => {
            ask(&config, &question, language.as_deref(), json).await?;
        }
        Commands::Medication { question, json } => {
            medication_info(&config, &question, json).await?;
        }
        Commands::AskMedication {
            question,
            language,
            json,
        } => {
            ask_medication(&config, &question, language.as_deref(), json).await?;
        }
        Commands::Label {
            text,
            language,
            json,
        } => {
            process_label(&config, &text, language.as_deref(), json).await?;
        }
        Commands::Evaluate {
            samples,
            rubric,
            output,
        } => {
            run_evaluation(&config, samples, rubric, output.as_deref()).await?;
        }
        Commands::Serve => {
            serve_mcp(&config).await?;
        }
        Commands::Health => {
            health_check(&config).await?;
        }
    }

    Ok(())
}
