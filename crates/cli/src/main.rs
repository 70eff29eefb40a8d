mod metrics;
mod output;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fanout_core::{
    build_performer, clean_query, load_config, parse_keyword_filters,
    search::{HttpFetcher, LibrqbitMagnetDownloader, ReqwestFetcher},
    validate_config, CrawlContext, Feature, KeywordDetector, KeywordDetectorListener,
    SearchManager, SearchToken, ALL_TOKENS,
};

use output::OutputListener;

/// Run one query against every enabled backend and print results as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "fanout", version, about)]
struct Args {
    /// Configuration file.
    #[arg(short, long, value_name = "FILE", env = "FANOUT_CONFIG", default_value = "fanout.toml")]
    config: PathBuf,

    /// Print keyword histograms of the accepted results when done.
    #[arg(long)]
    keywords: bool,

    /// Dump Prometheus metrics to stderr when done.
    #[arg(long)]
    metrics: bool,

    /// Empty the crawl cache before searching.
    #[arg(long)]
    clear_cache: bool,

    /// Query words, optionally with `+:keyword:<word>` and `-:keyword:<word>` filters.
    /// Everything after the first word belongs to the query.
    #[arg(num_args = 1.., trailing_var_arg = true)]
    query: Vec<String>,
}

impl Args {
    fn query(&self) -> String {
        self.query.join(" ")
    }
}

/// Prints forced histogram rebuilds as JSON lines.
struct KeywordPrinter;

impl KeywordDetectorListener for KeywordPrinter {
    fn on_histogram_update(&self, feature: Feature, histogram: Vec<(String, usize)>, forced: bool) {
        if !forced {
            debug!(feature = feature.as_str(), entries = histogram.len(), "Histogram updated");
            return;
        }
        let line = json!({ "feature": feature.as_str(), "keywords": histogram });
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}") {
            warn!(error = %e, "Failed to write keywords");
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Logs go to stderr, results to stdout
    let json_logs = std::env::var("FANOUT_LOG_FORMAT").is_ok_and(|f| f == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(json_logs.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let args = Args::parse();
    let config_path = &args.config;

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let mut context =
        CrawlContext::from_config(&config.crawl).context("Failed to open crawl cache")?;
    if let Ok(dir) = std::env::var("FANOUT_MAGNET_DIR") {
        let downloader = LibrqbitMagnetDownloader::new(PathBuf::from(dir))
            .await
            .context("Failed to start magnet session")?;
        context = context.with_magnet_downloader(Arc::new(downloader));
    }
    let context = Arc::new(context);

    if args.clear_cache {
        context.clear_cache();
        info!("Crawl cache cleared");
        if args.query.is_empty() {
            return Ok(());
        }
    }

    let query = args.query();
    let filters = parse_keyword_filters(&query);
    let keywords = clean_query(&query, &filters);
    if keywords.is_empty() {
        bail!("No search keywords given");
    }

    let backends: Vec<_> = config.backends.iter().filter(|b| b.enabled).collect();
    if backends.is_empty() {
        bail!("No enabled backends in {:?}", config_path);
    }
    info!(
        keywords = %keywords,
        filters = filters.len(),
        backends = backends.len(),
        "Starting search"
    );

    let fetcher: Arc<dyn HttpFetcher> =
        Arc::new(ReqwestFetcher::new().context("Failed to create HTTP client")?);
    let detector = Arc::new(KeywordDetector::new(
        &config.detector,
        Arc::new(KeywordPrinter),
    ));
    let listener = Arc::new(
        OutputListener::new(
            std::io::stdout(),
            filters,
            backends.iter().map(|b| b.name.clone()).collect(),
        )
        .with_detector(Arc::clone(&detector)),
    );
    let manager = SearchManager::new(&config.manager, listener.clone());

    for (token, backend) in backends.iter().enumerate() {
        let performer = build_performer(
            backend,
            token as SearchToken,
            &keywords,
            &config.http,
            Arc::clone(&fetcher),
            Some(Arc::clone(&context)),
        )
        .with_context(|| format!("Failed to build backend {}", backend.name))?;
        manager.perform(performer)?;
    }

    tokio::select! {
        _ = listener.finished() => {}
        _ = shutdown_signal() => {
            info!("Interrupted, stopping searches");
            manager.stop(ALL_TOKENS);
            listener.finished().await;
        }
    }

    let (entries, bytes) = context.cache_size();
    info!(
        printed = listener.printed(),
        rejected = listener.rejected(),
        cache_entries = entries,
        cache_bytes = bytes,
        "Search finished"
    );

    if args.keywords {
        for feature in Feature::ALL {
            detector.request_histogram_update(feature, true);
        }
    }
    detector.shutdown();

    if args.metrics {
        eprint!("{}", metrics::encode_metrics());
    }

    Ok(())
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_args_query_and_flags() {
        let args = Args::try_parse_from([
            "fanout",
            "--keywords",
            "--metrics",
            "ubuntu",
            "-:keyword:beta",
        ])
        .unwrap();
        assert!(args.keywords);
        assert!(args.metrics);
        assert!(!args.clear_cache);
        assert_eq!(args.query(), "ubuntu -:keyword:beta");
    }

    #[test]
    fn test_args_config_path() {
        let args = Args::try_parse_from(["fanout", "-c", "/etc/fanout.toml", "debian"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/fanout.toml"));
        assert_eq!(args.query, vec!["debian"]);
    }

    #[test]
    fn test_args_rejects_unknown_option() {
        let err = Args::try_parse_from(["fanout", "--verbose", "x"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_args_help() {
        let err = Args::try_parse_from(["fanout", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_args_clear_cache_without_query() {
        let args = Args::try_parse_from(["fanout", "--clear-cache"]).unwrap();
        assert!(args.clear_cache);
        assert!(args.query.is_empty());
    }
}
