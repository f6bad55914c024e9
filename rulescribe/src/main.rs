//! RuleScribe - board game metadata backfill CLI

use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rulescribe::{
    audit::{AuditSink, TracingAuditSink},
    config::{Args, Command},
    links::{LinkResolver, LinkVerifier, StalenessPolicy},
    pipeline::Pipeline,
    repository::{GameRepository, InMemoryRepository, SupabaseConfig, SupabaseRepository},
    service::GameService,
};
use scribe_agent::{backend::GeminiBackend, CompletionClient, RetryPolicy};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("rulescribe={0},scribe_agent={0},info", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = args.load_config()?;

    // Store: PostgREST when configured, memory otherwise
    let repository: Arc<dyn GameRepository> = match (&args.supabase_url, &args.supabase_key) {
        (Some(url), Some(key)) => {
            info!("Store: {}", url);
            Arc::new(SupabaseRepository::new(SupabaseConfig::new(url, key))?)
        }
        _ => {
            warn!("No store configured, using in-memory repository (dev mode)");
            Arc::new(InMemoryRepository::new())
        }
    };

    let backend = GeminiBackend::new(
        &config.completion.base_url,
        &config.completion.model,
        args.gemini_api_key.clone().unwrap_or_default(),
        config.completion.timeout(),
    )?;
    info!("Model: {}", config.completion.model);

    let client = CompletionClient::new(Arc::new(backend))
        .with_retry(RetryPolicy {
            max_attempts: config.completion.max_attempts,
            base_delay: config.completion.base_delay(),
        })
        .with_temperature(config.completion.temperature)
        .with_max_tokens(config.completion.max_output_tokens);

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let pipeline = Pipeline::new(client.clone(), audit.clone())
        .with_protection_threshold(config.generation.protection_threshold);
    let resolver = LinkResolver::new(
        client,
        LinkVerifier::from_config(&config.links)?,
        StalenessPolicy::from_days(config.links.cooldown_days),
        audit,
    );
    let service = GameService::new(repository, pipeline, resolver)
        .with_context_match_limit(config.generation.context_match_limit);

    match args.command {
        Command::Generate { query } => print_json(&service.create_game_from_query(&query).await?),
        Command::Regenerate { slug } => print_json(&service.regenerate(&slug).await?),
        Command::Links { slug, force } => print_json(&service.refresh_links(&slug, force).await?),
        Command::Search { query } => print_json(&service.search_games(&query).await?),
        Command::Recent { limit, offset } => {
            print_json(&service.list_recent_games(limit, offset).await?)
        }
        Command::Show { slug } => print_json(&service.get_game_by_slug(&slug).await?),
    }
}
