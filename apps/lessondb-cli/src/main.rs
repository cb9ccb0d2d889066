use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lessondb_core::config::EngineConfig;
use lessondb_core::embed::HashEmbedder;
use lessondb_core::loader::{DocumentLoader, LoadCursor};
use lessondb_core::traits::Embedder;
use lessondb_retrieval::{ContextPayload, Ingestor, RetrievalEngine, RetrievalRequest};
use lessondb_vector::health::health_channel;
use lessondb_vector::{backend_from_config, CollectionSpec, StoreClient};

const CURSOR_FILE: &str = ".ingest_cursor.json";

const USAGE: &str = "Usage: lessondb <command> [args...]

Commands:
  ingest [dir] [--restart]            load chunk files into the vector store (resumable)
  query <text> [--subject S] [--grade G] [--limit N] [--user ID] [--json]
  health                              probe the vector store
  stats                               collection size and active settings
  reset --yes                         remove every chunk from the collection";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

/// Value following `flag`, if present.
fn flag_value(args: &[String], flag: &str) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(i) => match args.get(i + 1) {
            Some(v) if !v.starts_with("--") => Ok(Some(v.clone())),
            _ => bail!("{flag} requires a value"),
        },
    }
}

/// First argument that is neither a flag nor a flag's value.
fn positional(args: &[String], valued_flags: &[&str]) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        let a = &args[i];
        if valued_flags.contains(&a.as_str()) {
            i += 2;
            continue;
        }
        if !a.starts_with("--") {
            return Some(a.clone());
        }
        i += 1;
    }
    None
}

fn embedder_for(config: &EngineConfig) -> Arc<dyn Embedder> {
    Arc::new(HashEmbedder::new(config.embedding.dimensions, config.embedding.max_tokens))
}

async fn connect(config: &EngineConfig, base: &Path) -> anyhow::Result<(Arc<StoreClient>, lessondb_vector::HealthMonitor)> {
    let backend = backend_from_config(config, base);
    StoreClient::connect(backend, config)
        .await
        .with_context(|| format!("connecting to the {:?} store", config.store.backend))
}

async fn ingest(config: &EngineConfig, base: &Path, args: &[String]) -> anyhow::Result<()> {
    let dir = positional(args, &[]).map(PathBuf::from).unwrap_or_else(|| config.rag_data_dir(base));
    let cursor_path = dir.join(CURSOR_FILE);
    if args.iter().any(|a| a == "--restart") && cursor_path.exists() {
        fs::remove_file(&cursor_path)?;
    }
    let start = LoadCursor::load(&cursor_path)?.unwrap_or_default();
    let files = DocumentLoader::list_files(&dir);
    println!("Ingesting {} files from {} (starting at file {})", files.len(), dir.display(), start.file_index);

    let (store, _monitor) = connect(config, base).await?;
    let ingestor = Ingestor::new(config, store, embedder_for(config));

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_position(start.file_index as u64);

    let mut upserted = 0usize;
    let total = ingestor
        .ingest_all(&dir, start, |report, next| {
            upserted += report.upserted;
            match next {
                Some(cursor) => {
                    cursor.save(&cursor_path)?;
                    pb.set_position(cursor.file_index as u64);
                }
                None => {
                    if cursor_path.exists() {
                        fs::remove_file(&cursor_path)?;
                    }
                    pb.set_position(files.len() as u64);
                }
            }
            pb.set_message(format!("{upserted} chunks stored"));
            Ok(())
        })
        .await?;
    pb.finish_with_message("done");

    let s = total.summary;
    println!("Examined:        {}", s.examined);
    println!("Stored:          {}", total.upserted);
    println!("Oversized:       {}", s.oversized);
    println!("Below quality:   {}", s.below_quality);
    println!("Malformed:       {}", s.malformed);
    println!("Over token limit (kept): {}", s.over_token_limit);
    Ok(())
}

async fn query(config: Arc<EngineConfig>, base: &Path, args: &[String]) -> anyhow::Result<()> {
    let valued = ["--subject", "--grade", "--limit", "--user"];
    let Some(text) = positional(args, &valued) else {
        bail!("Usage: lessondb query \"<text>\" [--subject S] [--grade G] [--limit N] [--user ID]");
    };
    let limit = flag_value(args, "--limit")?
        .map(|v| v.parse::<usize>().with_context(|| format!("--limit expects a number, got `{v}`")))
        .transpose()?;
    let request = RetrievalRequest {
        query: text,
        subject: flag_value(args, "--subject")?,
        grade: flag_value(args, "--grade")?,
        limit,
        requester: flag_value(args, "--user")?,
    };

    let (store, _monitor) = connect(&config, base).await?;
    let engine = RetrievalEngine::new(store, embedder_for(&config), Arc::clone(&config))?;
    let result = engine.retrieve(&request).await;

    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&ContextPayload::from_result(&result))?);
        return Ok(());
    }
    let outcome = result?;
    if outcome.results.is_empty() {
        println!("No matching material.");
        return Ok(());
    }
    if outcome.widened {
        println!("(no material for the requested grade; showing adjacent grades)");
    }
    for (i, r) in outcome.results.iter().enumerate() {
        println!(
            "{:>2}. {:.3}  sim={:.3} quality={:.2}  {} {} {}  [{}]",
            i + 1,
            r.combined_score,
            r.similarity,
            r.quality_score,
            r.chunk.subject,
            r.chunk.grade,
            r.chunk.id,
            r.chunk.source
        );
    }
    println!(
        "\n--- context ({} / {} tokens, {} skipped) ---\n{}",
        outcome.context.token_count,
        outcome.context.budget,
        outcome.context.skipped_ids.len(),
        outcome.context.render()
    );
    Ok(())
}

async fn health(config: &EngineConfig, base: &Path) -> anyhow::Result<()> {
    let (_tx, rx) = health_channel();
    let client = StoreClient::new(
        backend_from_config(config, base),
        CollectionSpec::from_config(config),
        config.health_check.clone(),
        rx,
    );
    let report = client.health_check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}

async fn stats(config: &EngineConfig, base: &Path) -> anyhow::Result<()> {
    let (store, _monitor) = connect(config, base).await?;
    let spec = store.spec();
    println!("Backend:     {}", store.backend_name());
    println!("Collection:  {} ({}, {})", spec.name, spec.metric.as_str(), spec.description);
    println!("Dimensions:  {}", spec.dimensions);
    println!("Chunks:      {}", store.count().await?);
    println!(
        "Ranking:     {} x similarity + {} x quality, floor {}, limit {}/{}",
        config.search.similarity_weight,
        config.search.quality_score_weight,
        config.search.min_similarity_threshold,
        config.search.default_limit,
        config.search.max_limit
    );
    println!("Context:     {} tokens", config.search.context_max_tokens);
    Ok(())
}

async fn reset(config: &EngineConfig, base: &Path, args: &[String]) -> anyhow::Result<()> {
    if !args.iter().any(|a| a == "--yes") {
        bail!("reset removes every chunk from `{}`; pass --yes to confirm", config.store.collection.name);
    }
    let (store, _monitor) = connect(config, base).await?;
    let before = store.count().await?;
    store.reset().await?;
    println!("Removed {before} chunks from {}", store.spec().name);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Arc::new(EngineConfig::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?);
    let base = env::current_dir()?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "ingest" => ingest(&config, &base, &args).await,
        "query" => query(Arc::clone(&config), &base, &args).await,
        "health" => health(&config, &base).await,
        "stats" => stats(&config, &base).await,
        "reset" => reset(&config, &base, &args).await,
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {cmd}\n\n{USAGE}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn positional_skips_flag_values() {
        let a = args(&["--subject", "数学", "一元一次方程", "--limit", "3"]);
        assert_eq!(positional(&a, &["--subject", "--limit"]).as_deref(), Some("一元一次方程"));
        assert_eq!(flag_value(&a, "--limit").unwrap().as_deref(), Some("3"));
        assert_eq!(flag_value(&a, "--grade").unwrap(), None);
    }

    #[test]
    fn flag_without_value_is_an_error() {
        let a = args(&["text", "--grade"]);
        assert!(flag_value(&a, "--grade").is_err());
    }
}
