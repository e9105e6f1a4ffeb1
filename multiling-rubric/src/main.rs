//! Multilingual rubric CLI

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use multiling_rubric::{
    analysis::analyze,
    config::Config,
    corpus::{read_jsonl, Language, Question, QuestionCategory},
    embedding::{CachedEmbedder, EmbeddingProvider, OpenAIEmbedder},
    extraction::AnswerExtractor,
    pipeline::{
        build_corpus, index_translations, load_master_corpus, load_question_sets,
        open_results_store, query_jobs, resolve_input, score_records, timestamp,
        translate_corpus, write_scoring_outputs, RAW_RESULTS_PREFIX, SCORED_PREFIX,
    },
    providers::create_model_targets,
    reporting::{
        print_console_report, print_exclusion_summary, print_translation_report, write_reports,
    },
    runner::{ConsoleProgress, Executor, ExecutorConfig},
    scoring::{HybridScorer, ScoredResponse},
    store::{load_records, RecordSink},
    translation::{LibreTranslateClient, QualityGate},
};

#[derive(Parser)]
#[command(name = "multiling-rubric")]
#[command(about = "Multilingual factual-accuracy and reasoning evaluation for language models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert the master TSV corpus into a timestamped JSONL corpus
    BuildCorpus {
        /// Path to the master corpus TSV
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (default: from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Translate the corpus and keep only translations that pass the quality gate
    Translate {
        /// Corpus file (default: latest corpus_*.jsonl)
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Comma-separated target languages (default: from config)
        #[arg(short, long)]
        languages: Option<String>,

        /// Number of parallel translation requests
        #[arg(long)]
        parallel: Option<usize>,

        /// Output directory (default: from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Query every model with every validated question
    Run {
        /// Comma-separated model identifiers (default: all configured)
        #[arg(short, long)]
        models: Option<String>,

        /// Comma-separated languages to query (default: source and targets)
        #[arg(short, long)]
        languages: Option<String>,

        /// Corpus file (default: latest corpus_*.jsonl)
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Number of parallel requests
        #[arg(long)]
        parallel: Option<usize>,

        /// Start a new raw results file instead of appending to the latest one
        #[arg(long)]
        fresh: bool,

        /// Output directory (default: from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Score raw model responses
    Score {
        /// Raw results file (default: latest raw_results_*.jsonl)
        #[arg(short, long)]
        results: Option<PathBuf>,

        /// Corpus file (default: latest corpus_*.jsonl)
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Output directory (default: from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarise scored responses per model, language and category
    Analyze {
        /// Scored results file (default: latest scored_*.jsonl)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory (default: from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List corpus questions
    ListQuestions {
        /// Corpus file, TSV or JSONL (default: latest corpus_*.jsonl)
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Only show one category
        #[arg(long)]
        category: Option<String>,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/rubric.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("multiling_rubric=debug,info")
    } else {
        EnvFilter::new("multiling_rubric=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::InitConfig { output } = &cli.command {
        return init_config(output);
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::BuildCorpus { input, output } => {
            let dir = output_dir(&config, output);
            let (path, count) = build_corpus(&input, &dir, &timestamp())?;
            println!("Wrote {} questions to {}", count, path.display());
        }

        Commands::Translate {
            corpus,
            languages,
            parallel,
            output,
        } => {
            translate(&config, corpus, languages, parallel, output).await?;
        }

        Commands::Run {
            models,
            languages,
            corpus,
            parallel,
            fresh,
            output,
        } => {
            run_models(&config, models, languages, corpus, parallel, fresh, output).await?;
        }

        Commands::Score {
            results,
            corpus,
            output,
        } => {
            score(&config, results, corpus, output).await?;
        }

        Commands::Analyze { input, output } => {
            analyze_results(&config, input, output)?;
        }

        Commands::ListQuestions { corpus, category } => {
            list_questions(&config, corpus, category)?;
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn output_dir(config: &Config, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| PathBuf::from(&config.output.output_dir))
}

fn split_list(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_languages(arg: &str) -> Result<Vec<Language>, Box<dyn std::error::Error>> {
    let mut languages = Vec::new();
    for tag in split_list(arg) {
        languages.push(tag.parse::<Language>()?);
    }
    Ok(languages)
}

/// Embedding client shared by the quality gate and the scorer
fn build_embedder(config: &Config) -> Arc<dyn EmbeddingProvider> {
    let settings = &config.embedding;
    let client = OpenAIEmbedder::new(std::env::var(&settings.api_key_env).ok())
        .with_base_url(&settings.base_url)
        .with_model(&settings.model)
        .with_rate_limit(settings.rpm)
        .with_retry(config.benchmark.retry_policy())
        .with_timeout(settings.timeout_ms);
    Arc::new(CachedEmbedder::new(Arc::new(client)))
}

fn source_questions(corpus: Vec<Question>, source: &Language) -> Vec<Question> {
    corpus.into_iter().filter(|q| q.language == *source).collect()
}

async fn translate(
    config: &Config,
    corpus: Option<PathBuf>,
    languages: Option<String>,
    parallel: Option<usize>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = output_dir(config, output);
    let source = &config.languages.source;
    let questions = source_questions(load_master_corpus(corpus.as_deref(), &dir)?, source);

    let mut targets = match languages {
        Some(list) => parse_languages(&list)?,
        None => config.languages.targets.clone(),
    };
    targets.retain(|t| {
        if t == source {
            tracing::warn!("{} is the source language; not translating into it", t);
        }
        t != source
    });

    if questions.is_empty() || targets.is_empty() {
        eprintln!("Error: nothing to translate ({} questions, {} target languages)", questions.len(), targets.len());
        std::process::exit(1);
    }

    println!("=== Translation Quality Gate ===");
    println!("Questions: {}", questions.len());
    println!(
        "Targets:   {}",
        targets.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!("Threshold: {:.2}", config.quality_gate.similarity_threshold);
    println!();

    let translator = LibreTranslateClient::from_env(&config.translation.api_key_env)
        .with_base_url(&config.translation.base_url)
        .with_rate_limit(config.translation.rpm)
        .with_retry(config.benchmark.retry_policy())
        .with_timeout(config.translation.timeout_ms);
    let gate = Arc::new(QualityGate::new(
        Arc::new(translator),
        build_embedder(config),
        config.quality_gate.similarity_threshold,
    ));

    let outcome = translate_corpus(
        gate,
        &questions,
        &targets,
        parallel.unwrap_or(config.benchmark.parallel_requests),
        &dir,
        &timestamp(),
    )
    .await?;

    print_translation_report(&outcome.reports);
    println!("Gate log written to: {}", outcome.log_path.display());
    Ok(())
}

async fn run_models(
    config: &Config,
    models: Option<String>,
    languages: Option<String>,
    corpus: Option<PathBuf>,
    parallel: Option<usize>,
    fresh: bool,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let started_at = Utc::now();
    let run_id = started_at.format("%Y%m%d-%H%M%S").to_string();
    let dir = output_dir(config, output);

    println!("=== Multilingual Rubric Run ===");
    println!("Run ID: {}", run_id);
    println!();

    let only = models.as_deref().map(split_list).unwrap_or_default();
    let targets = create_model_targets(config, &only)?;
    println!(
        "Models: {}",
        targets
            .iter()
            .map(|t| config.display_name(&t.id))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let source = &config.languages.source;
    let selected = match languages {
        Some(list) => parse_languages(&list)?,
        None => config.languages.all(),
    };
    let translated: Vec<Language> = selected.iter().filter(|l| *l != source).cloned().collect();

    let corpus = load_master_corpus(corpus.as_deref(), &dir)?;
    let mut sets = load_question_sets(&corpus, source, &translated, &dir)?;
    sets.retain(|t| selected.contains(t.language()));

    let jobs = query_jobs(&sets, &targets);
    if jobs.is_empty() {
        eprintln!("Error: No validated questions to run; run `translate` first");
        std::process::exit(1);
    }
    println!("Questions: {} across {} languages", sets.len(), selected.len());
    println!("Queries:   {}", jobs.len());
    println!();

    let (store, ledger) = open_results_store(&dir, &timestamp(), fresh)?;
    let results_path = store.path().to_path_buf();
    let sink: Arc<dyn RecordSink> = Arc::new(store);

    let mut executor_config = ExecutorConfig::from(&config.benchmark);
    if let Some(parallel) = parallel {
        executor_config.parallel_requests = parallel.max(1);
    }
    let executor = Executor::new(executor_config, run_id, sink, ledger)
        .with_progress(Arc::new(ConsoleProgress));

    println!("Querying models...");
    let summary = executor.execute_all(jobs).await;

    let elapsed = Utc::now() - started_at;
    println!();
    println!("{:-<50}", "");
    println!(
        "Completed {} queries in {}s: {} succeeded, {} failed",
        summary.total,
        elapsed.num_seconds(),
        summary.succeeded,
        summary.failed
    );
    if summary.unrecorded > 0 {
        println!("WARNING: {} results could not be written", summary.unrecorded);
    }
    println!("Results: {}", results_path.display());
    Ok(())
}

async fn score(
    config: &Config,
    results: Option<PathBuf>,
    corpus: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = output_dir(config, output);
    let results_path = resolve_input(results.as_deref(), &dir, RAW_RESULTS_PREFIX)?;
    let records = load_records(&results_path)?;
    println!("Scoring {} records from {}", records.len(), results_path.display());

    let corpus = load_master_corpus(corpus.as_deref(), &dir)?;
    let questions: HashMap<String, Question> =
        corpus.iter().map(|q| (q.id.clone(), q.clone())).collect();
    let sets = load_question_sets(
        &corpus,
        &config.languages.source,
        &config.languages.targets,
        &dir,
    )?;
    let translations = index_translations(sets);

    let scorer = HybridScorer::new(
        build_embedder(config),
        AnswerExtractor::new(&config.extraction.markers),
        config.scoring.clone(),
        config.classification.clone(),
    )?;

    let outcome = score_records(&scorer, &questions, &translations, &records).await;
    let (scored_path, exclusions_path) = write_scoring_outputs(&outcome, &dir, &timestamp())?;

    print_exclusion_summary(&outcome.summary);
    println!("Scored results: {}", scored_path.display());
    println!("Exclusions:     {}", exclusions_path.display());
    Ok(())
}

fn analyze_results(
    config: &Config,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = output_dir(config, output);
    let input = resolve_input(input.as_deref(), &dir, SCORED_PREFIX)?;
    let scored: Vec<ScoredResponse> = read_jsonl(&input)?;
    println!("Loaded {} scored responses from {}", scored.len(), input.display());

    let analysis = analyze(&scored, &config.languages.source);
    print_console_report(&analysis);

    let report_dir = dir.join(format!("analysis_{}", timestamp()));
    for path in write_reports(&analysis, &input, &report_dir)? {
        println!("Written: {}", path.display());
    }
    Ok(())
}

fn list_questions(
    config: &Config,
    corpus: Option<PathBuf>,
    category: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = output_dir(config, None);
    let questions = load_master_corpus(corpus.as_deref(), &dir)?;
    let only = category
        .as_deref()
        .map(|c| c.parse::<QuestionCategory>())
        .transpose()?;

    println!("Available Questions:");
    println!("{:-<80}", "");

    let mut by_category: HashMap<QuestionCategory, Vec<&Question>> = HashMap::new();
    for question in &questions {
        by_category.entry(question.category).or_default().push(question);
    }

    for category in QuestionCategory::all() {
        if only.is_some_and(|c| c != category) {
            continue;
        }
        let Some(list) = by_category.get(&category) else {
            continue;
        };
        println!("\n{} ({} questions):", category.as_str(), list.len());
        for question in list {
            println!("  {} [{}] {}", question.id, question.language, truncate(&question.text, 60));
        }
    }

    println!("\nTotal: {} questions", questions.len());
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

fn init_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    config.save_toml(output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}
