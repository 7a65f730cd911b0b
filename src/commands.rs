use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Config, EmbeddingBackend};
use crate::database::Database;
use crate::embeddings::OllamaClient;
use crate::evaluation::{EvaluationReport, Evaluator};
use crate::metrics::{MedicationScore, MetricsReport};
use crate::service::{AnswerOutcome, Assistant, LabelOutcome, NO_CONTEXT_DISCLAIMER};

async fn assistant(config: &Config) -> Result<Assistant> {
    Assistant::from_config(config)
        .await
        .context("Failed to initialize the assistant")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_metrics(metrics: &MetricsReport) {
    println!("{}", style("Metrics").bold().yellow());
    println!(
        "  Cosine (query/reference):     {:.4}",
        metrics.cosine_similarity.query_reference
    );
    println!(
        "  Cosine (query/generated):     {:.4}",
        metrics.cosine_similarity.query_generated
    );
    println!(
        "  Cosine (reference/generated): {:.4}",
        metrics.cosine_similarity.reference_generated
    );
    println!(
        "  ROUGE-1 / ROUGE-2 / ROUGE-L:  {:.4} / {:.4} / {:.4}",
        metrics.rouge_scores.rouge1, metrics.rouge_scores.rouge2, metrics.rouge_scores.rouge_l
    );
}

/// Show the closest reference answer for a question
#[inline]
pub async fn show_sources(config: &Config, question: &str, json: bool) -> Result<()> {
    let assistant = assistant(config).await?;
    let matched = assistant.get_sources(question).await?;

    if json {
        return print_json(&matched);
    }

    match matched {
        Some(source) => {
            println!(
                "{} (similarity {:.4})",
                style("Closest reference").bold().cyan(),
                source.similarity
            );
            println!("  Focus area: {}", source.record.focus_area);
            println!("  Source:     {}", source.record.source);
            println!();
            println!("{}", source.record.answer);
        }
        None => println!("{}", style(NO_CONTEXT_DISCLAIMER).yellow()),
    }
    Ok(())
}

/// Answer a clinical question and report its quality metrics
#[inline]
pub async fn ask(
    config: &Config,
    question: &str,
    language: Option<&str>,
    json: bool,
) -> Result<()> {
    let assistant = assistant(config).await?;
    let response = assistant.answer(question, language).await?;

    if json {
        return print_json(&response);
    }

    match &response.outcome {
        AnswerOutcome::Grounded {
            answer,
            source,
            metrics,
        } => {
            println!("{}", answer);
            println!();
            println!(
                "{} {} (similarity {:.4})",
                style("Grounded in:").dim(),
                source.record.focus_area,
                source.similarity
            );
            if let Some(metrics) = metrics {
                print_metrics(metrics);
            }
        }
        AnswerOutcome::Ungrounded {
            answer,
            disclaimer,
            metrics,
        } => {
            println!("{}", style(disclaimer).yellow());
            println!();
            println!("{}", answer);
            if let Some(metrics) = metrics {
                print_metrics(metrics);
            }
        }
        AnswerOutcome::Failed { message } => {
            println!("{}", style(message).red());
        }
    }

    println!("{}", style(format!("Answered in {:.4}s", response.response_time)).dim());
    Ok(())
}

/// List the closest medications with their averaged similarity
#[inline]
pub async fn medication_info(config: &Config, question: &str, json: bool) -> Result<()> {
    let assistant = assistant(config).await?;
    let info = assistant.get_medication_info(question).await?;

    if json {
        return print_json(&info);
    }

    let Some(info) = info else {
        println!("{}", style("No medications are available in the corpus.").yellow());
        return Ok(());
    };

    println!(
        "{} (average similarity {:.4})",
        style("Closest medications").bold().cyan(),
        info.top_n_avg_similarity
    );
    for (rank, matched) in info.top_matches.iter().enumerate() {
        println!();
        println!(
            "{}. {} ({:.4})",
            rank + 1,
            style(&matched.record.drug).bold(),
            matched.similarity
        );
        println!("   Indication:   {}", matched.record.indication);
        println!("   Side effects: {}", matched.record.side_effects);
        println!("   Interactions: {}", matched.record.drug_interaction);
    }
    Ok(())
}

/// Answer a medication question from the closest drug sheet
#[inline]
pub async fn ask_medication(
    config: &Config,
    question: &str,
    language: Option<&str>,
    json: bool,
) -> Result<()> {
    let assistant = assistant(config).await?;
    let response = assistant.answer_medication(question, language).await?;

    if json {
        return print_json(&response);
    }

    let metrics = match &response.outcome {
        AnswerOutcome::Grounded {
            answer,
            source,
            metrics,
        } => {
            println!("{}", answer);
            if let Some(best) = source.best() {
                println!();
                println!("{} {}", style("Based on:").dim(), best.record.drug);
            }
            metrics.as_ref()
        }
        AnswerOutcome::Ungrounded {
            answer,
            disclaimer,
            metrics,
        } => {
            println!("{}", style(disclaimer).yellow());
            println!();
            println!("{}", answer);
            metrics.as_ref()
        }
        AnswerOutcome::Failed { message } => {
            println!("{}", style(message).red());
            None
        }
    };

    match metrics {
        Some(MedicationScore::Scored {
            bleu,
            cosine_similarity,
            degraded,
        }) => {
            println!(
                "{} BLEU {:.4}, cosine {:.4}{}",
                style("Relevance:").dim(),
                bleu,
                cosine_similarity,
                if *degraded { " (degraded)" } else { "" }
            );
        }
        Some(MedicationScore::NoValidMatch) => {
            println!("{}", style("Relevance: no valid medication match").dim());
        }
        None => {}
    }
    Ok(())
}

/// Identify a medication from label text and describe it
#[inline]
pub async fn process_label(
    config: &Config,
    text: &str,
    language: Option<&str>,
    json: bool,
) -> Result<()> {
    let assistant = assistant(config).await?;
    let outcome = assistant.process_medication_label(text, language).await;

    if json {
        return print_json(&outcome);
    }

    match outcome {
        LabelOutcome::Success {
            corrected_name,
            medication_info,
        } => {
            println!("{} {}", style("Medication:").bold().cyan(), corrected_name);
            println!();
            println!("{}", medication_info);
        }
        LabelOutcome::Error { message } => {
            println!("{} {}", style("Could not process label:").red(), message);
        }
    }
    Ok(())
}

fn print_evaluation(report: &EvaluationReport) {
    eprintln!();
    eprintln!("{}", style("Evaluation Summary").bold().cyan());
    eprintln!(
        "  Evaluated: {} of {} sampled",
        style(report.evaluated()).green(),
        report.sampled
    );
    if !report.skipped.is_empty() {
        eprintln!("  Skipped:   {}", style(report.skipped.len()).yellow());
        for skipped in &report.skipped {
            eprintln!(
                "    - {:?} at {:?}: {}",
                skipped.question, skipped.stage, skipped.reason
            );
        }
    }

    let Some(averages) = report.averages else {
        eprintln!("{}", style("No items could be evaluated.").red());
        return;
    };

    eprintln!();
    eprintln!("{}", style("Average Metrics").bold().yellow());
    eprintln!("  BLEU:              {:.4}", averages.bleu);
    eprintln!("  Token F1:          {:.4}", averages.token_f1);
    eprintln!("  Cosine similarity: {:.4}", averages.cosine_similarity);
    eprintln!("  STS similarity:    {:.4}", averages.sts_similarity);
    eprintln!("  ROUGE-1:           {:.4}", averages.rouge1);
    eprintln!("  ROUGE-2:           {:.4}", averages.rouge2);
    eprintln!("  ROUGE-L:           {:.4}", averages.rouge_l);

    if let Some(rubric) = &report.rubric_averages {
        eprintln!();
        eprintln!("{}", style("Rubric Averages (0-10)").bold().yellow());
        for criterion in rubric {
            eprintln!("  {:<28} {:.2}", criterion.criterion, criterion.score);
        }
    }
}

/// Evaluate sampled corpus pairs and print the summary
#[inline]
pub async fn run_evaluation(
    config: &Config,
    sample_size: Option<usize>,
    rubric: bool,
    output: Option<&Path>,
) -> Result<()> {
    let sample_size = sample_size.unwrap_or(config.evaluation.sample_size);
    let assistant = Arc::new(assistant(config).await?);

    info!("Starting evaluation of {} samples", sample_size);
    let report = Evaluator::new(assistant)
        .with_rubric_grading(rubric || config.evaluation.rubric_grading)
        .with_language(&config.evaluation.language)
        .with_progress(true)
        .run(sample_size)
        .await?;

    print_evaluation(&report);

    match output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&report)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            eprintln!();
            eprintln!("Report written to {}", style(path.display()).cyan());
        }
        None => print_json(&report)?,
    }
    Ok(())
}

/// Check the model server and corpus database
#[inline]
pub async fn health_check(config: &Config) -> Result<()> {
    eprintln!("{}", style("Health Check").bold().cyan());

    let mut healthy = true;

    match OllamaClient::new(config).and_then(|client| {
        client.health_check()?;
        client.list_models()
    }) {
        Ok(models) => {
            eprintln!(
                "  {} Ollama reachable at {}",
                style("✓").green(),
                config.ollama_url()?
            );
            for wanted in [&config.ollama.model, &config.ollama.generation_model] {
                if models.iter().any(|m| &m.name == wanted) {
                    eprintln!("  {} Model available: {}", style("✓").green(), wanted);
                } else {
                    healthy = false;
                    eprintln!("  {} Model not pulled: {}", style("✗").red(), wanted);
                }
            }
        }
        Err(e) => {
            healthy = false;
            error!("Ollama health check failed: {:#}", e);
            eprintln!("  {} Ollama unavailable: {:#}", style("✗").red(), e);
        }
    }

    if config.embedding.backend == EmbeddingBackend::Hashing {
        eprintln!(
            "  {} Embeddings use the offline hashing backend",
            style("!").yellow()
        );
    }

    match Database::initialize_from_config_dir(config.get_base_dir()).await {
        Ok(database) => {
            for table in [&config.retrieval.qa_table, &config.retrieval.medication_table] {
                match database.count_rows(table).await {
                    Ok(count) => eprintln!(
                        "  {} {}: {} rows",
                        style("✓").green(),
                        table,
                        count
                    ),
                    Err(e) => {
                        healthy = false;
                        eprintln!("  {} {}: {:#}", style("✗").red(), table, e);
                    }
                }
            }
        }
        Err(e) => {
            healthy = false;
            eprintln!("  {} Corpus database unavailable: {:#}", style("✗").red(), e);
        }
    }

    if !healthy {
        anyhow::bail!("One or more health checks failed");
    }
    Ok(())
}

/// Start the MCP server on stdio.
///
/// Stdout carries the protocol, so every human-readable line goes to stderr.
#[inline]
pub async fn serve_mcp(config: &Config) -> Result<()> {
    info!("Starting MCP server");

    if config.embedding.backend == EmbeddingBackend::Ollama {
        match OllamaClient::new(config).and_then(|client| client.health_check()) {
            Ok(()) => info!(
                "Ollama connected at {}:{} with model {}",
                config.ollama.host, config.ollama.port, config.ollama.model
            ),
            Err(e) => {
                warn!("Ollama is not ready: {:#}", e);
                eprintln!(
                    "{}",
                    style("Warning: Ollama may not be ready. Requests may fail.").yellow()
                );
            }
        }
    }

    let assistant = Arc::new(assistant(config).await?);

    let server = crate::mcp::McpServer::new(
        env!("CARGO_PKG_NAME").to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    crate::mcp::register_tools(&server, &assistant).await;
    let server = Arc::new(server);

    eprintln!(
        "{} {}",
        style("MCP server ready with tools:").green(),
        server.tool_names().await.join(", ")
    );
    eprintln!("Press Ctrl+C to stop the server");

    tokio::select! {
        result = Arc::clone(&server).serve_stdio() => {
            result?;
            info!("MCP server stopped normally");
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            eprintln!("Received interrupt signal, shutting down...");
        }
    }

    Ok(())
}
