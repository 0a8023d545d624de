use anyhow::Result;
use pandescraper::{
    config::{Config, SourceSpec},
    emit::ElasticSink,
    fetch,
    geo::{load_lookup_table, LocationResolver, Nominatim},
    pipeline,
};
use reqwest::Client;
use std::{fs, path::PathBuf, sync::Arc};
use tokio::{sync::Semaphore, task};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) configuration + reference data ──────────────────────────
    let cfg = Config::from_env()?;
    fs::create_dir_all(&cfg.data_dir)?;

    let lookup = load_lookup_table(&cfg.lookup_path)?;
    let geocoder = Nominatim::new(&cfg.geocoder_endpoint, cfg.geocoder_timeout)?;
    let resolver = Arc::new(LocationResolver::new(lookup, Box::new(geocoder)));

    // ─── 3) fetch feeds + discover local files ──────────────────────
    let client = Client::new();
    let mut jobs: Vec<(Arc<SourceSpec>, PathBuf)> = Vec::new();
    for source in &cfg.sources {
        let source_dir = cfg.data_dir.join(&source.name);
        fs::create_dir_all(&source_dir)?;

        if !source.feeds.is_empty() {
            match fetch::urls::fetch_csv_urls(&client, &source.feeds).await {
                Ok(urls) => {
                    for url in urls {
                        match fetch::files::download_csv(&client, &url, &source_dir).await {
                            Ok(path) => info!(source = %source.name, file = %path.display(), "downloaded"),
                            Err(e) => error!(source = %source.name, url = %url, "download failed: {e:#}"),
                        }
                    }
                }
                Err(e) => error!(source = %source.name, "feed listing failed: {e:#}"),
            }
        }

        let spec = Arc::new(source.clone());
        for entry in fs::read_dir(&source_dir)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if is_csv {
                jobs.push((spec.clone(), path));
            }
        }
    }

    if jobs.is_empty() {
        info!("no files to process; exit");
        return Ok(());
    }
    info!(files = jobs.len(), "files to process");

    // ─── 4) process files on the blocking pool ──────────────────────
    // Bounded parallelism; the location cache is shared behind its mutex.
    let sem = Arc::new(Semaphore::new(cfg.workers.max(1)));
    let mut handles = Vec::with_capacity(jobs.len());
    for (source, path) in jobs {
        let sem = sem.clone();
        let resolver = resolver.clone();
        let elastic = cfg.elastic.clone();
        let max_batch = cfg.max_batch;

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            task::spawn_blocking(move || -> Result<pipeline::FileStats> {
                let mut sink = ElasticSink::new(&elastic)?;
                let stats =
                    pipeline::process_file(&path, &source, &resolver, &mut sink, max_batch)?;
                Ok(stats)
            })
            .await?
        }));
    }

    // ─── 5) run summary ─────────────────────────────────────────────
    let (mut ok, mut failed) = (0u64, 0u64);
    let (mut rows, mut emitted, mut dropped) = (0u64, 0u64, 0u64);
    for handle in handles {
        match handle.await? {
            Ok(stats) => {
                ok += 1;
                rows += stats.rows;
                emitted += stats.emitted;
                dropped += stats.dropped_date + stats.dropped_location;
            }
            Err(e) => {
                // file failures are isolated; the run keeps its exit code
                error!("file failed: {e:#}");
                failed += 1;
            }
        }
    }
    info!(
        files_ok = ok,
        files_failed = failed,
        rows,
        emitted,
        dropped,
        "run complete"
    );
    Ok(())
}
