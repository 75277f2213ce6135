mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use entity_resolver::disambiguators::ChatDisambiguator;
use entity_resolver::sources::{FnsSource, HhSource, KonturSource, SourceHttp};
use entity_resolver::{MemoryCache, ResolutionCache, ResolutionResult, Resolver, RuleTable};

#[derive(Parser)]
#[command(name = "resolver", version, about = "Resolve a company name or registry number to one legal entity")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one query and print the result as JSON
    Resolve {
        /// Company name, brand, INN or OGRN
        query: String,

        /// Rule table file (overrides RESOLVER_RULES_PATH)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Never call the language model, even if configured
        #[arg(long)]
        no_disambiguation: bool,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}

/// Process exit code for a result.
fn exit_code(result: &ResolutionResult) -> u8 {
    match result {
        ResolutionResult::Resolved(_) | ResolutionResult::Ambiguous(_) => 0,
        ResolutionResult::NotFound => 2,
        ResolutionResult::Failed(_) => 3,
    }
}

#[cfg(feature = "sqlite")]
async fn persistent_cache(url: &str, ttl: chrono::Duration) -> Result<Option<Arc<dyn ResolutionCache>>> {
    let cache = entity_resolver::SqliteCache::new(url, ttl)
        .await
        .with_context(|| format!("failed to open cache at {}", url))?;
    Ok(Some(Arc::new(cache)))
}

#[cfg(not(feature = "sqlite"))]
async fn persistent_cache(_url: &str, _ttl: chrono::Duration) -> Result<Option<Arc<dyn ResolutionCache>>> {
    tracing::warn!("RESOLVER_CACHE_URL is set but sqlite support is not compiled in; using memory cache");
    Ok(None)
}

async fn build_cache(config: &Config) -> Result<Arc<dyn ResolutionCache>> {
    let ttl = chrono::Duration::seconds(config.resolver.cache_ttl_secs as i64);

    if let Some(url) = &config.cache_url {
        if let Some(cache) = persistent_cache(url, ttl).await? {
            return Ok(cache);
        }
    }

    Ok(Arc::new(MemoryCache::new(ttl)))
}

async fn build_resolver(config: &Config, rules: Option<PathBuf>, no_disambiguation: bool) -> Result<Resolver> {
    let http = SourceHttp::new(&config.user_agent)?;

    let mut builder = Resolver::builder(config.resolver.clone())
        .source(FnsSource::new(http.clone(), &config.fns_base_url))
        .source(HhSource::new(http.clone()))
        .shared_cache(build_cache(config).await?);

    match KonturSource::new(http, config.kontur_api_key.clone()) {
        Some(kontur) => builder = builder.source(kontur),
        None => tracing::info!("KONTUR_API_KEY not set, Kontur.Focus disabled"),
    }

    if let Some(path) = rules.or_else(|| config.rules_path.clone()) {
        let table = RuleTable::load(&path)
            .with_context(|| format!("failed to load rules from {}", path.display()))?;
        builder = builder.rules(table);
    }

    if !no_disambiguation {
        match ChatDisambiguator::from_env()? {
            Some(disambiguator) => builder = builder.disambiguator(disambiguator),
            None => tracing::info!("DEEPSEEK_API_KEY not set, last-resort disambiguation disabled"),
        }
    }

    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries the JSON result
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,entity_resolver=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Resolve {
            query,
            rules,
            no_disambiguation,
            pretty,
        } => {
            let resolver = build_resolver(&config, rules, no_disambiguation).await?;
            let result = resolver.resolve(&query).await;

            let output = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{}", output);

            Ok(ExitCode::from(exit_code(&result)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_resolver::FailureReason;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&ResolutionResult::Ambiguous(vec![])), 0);
        assert_eq!(exit_code(&ResolutionResult::NotFound), 2);
        assert_eq!(
            exit_code(&ResolutionResult::Failed(FailureReason::DisambiguationUnavailable)),
            3
        );
    }

    #[test]
    fn test_cli_parses_resolve() {
        let cli = Cli::try_parse_from(["resolver", "resolve", "ООО Ромашка", "--pretty", "--no-disambiguation"])
            .unwrap();
        match cli.command {
            Command::Resolve {
                query,
                rules,
                no_disambiguation,
                pretty,
            } => {
                assert_eq!(query, "ООО Ромашка");
                assert!(rules.is_none());
                assert!(no_disambiguation);
                assert!(pretty);
            }
        }
    }
}
