//! Composition root and operator CLI.
//!
//! Everything is constructed once here — store, gated feed, runtime,
//! schedule — and passed down as explicit dependencies. Subcommands:
//!
//! - `serve` (default): start the worker pool and the trigger loop.
//! - `sync trigger <syncer> [--code CODE] [--date YYYY-MM-DD]`
//! - `sync status [--task NAME]`
//! - `doctor run`
//! - `quote <code>`: on-demand realtime snapshot through the L3 cache.
//! - `watchlist add|remove|list [CODE]`

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use leeksaver::cache::RealtimeCache;
use leeksaver::config::{Settings, RATE_BUCKET_CAPACITY, STALE_GRACE, WORKER_COUNT};
use leeksaver::doctor::DataDoctor;
use leeksaver::feed::eastmoney::EastmoneyFeed;
use leeksaver::feed::embedding::{Embedder, HttpEmbedder};
use leeksaver::feed::gate::{GatedFeed, RateGate, RetryPolicy};
use leeksaver::feed::MarketFeed;
use leeksaver::sched::generate::generate_schedule;
use leeksaver::sched::registry::build_registry;
use leeksaver::sched::runtime::{Job, JobOutcome, JobRuntime};
use leeksaver::sched::scheduler::Scheduler;
use leeksaver::store::Store;
use leeksaver::sync::{dispatch, syncer_by_name, Scope, SyncContext};

struct Engine {
    settings: Settings,
    store: Arc<Store>,
    ctx: Arc<SyncContext>,
    runtime: Arc<JobRuntime>,
}

/// Build the whole dependency graph. `with_fanout` decides whether syncers
/// and the doctor may enqueue child jobs.
fn build_engine(with_fanout: bool) -> Result<Engine> {
    let settings = Settings::from_env()?;
    let store = Arc::new(Store::open(&settings.database_path)?);

    let feed = EastmoneyFeed::new()?;
    let gate = RateGate::new(RATE_BUCKET_CAPACITY, settings.rate_qps);
    let gated: Arc<dyn MarketFeed> = Arc::new(GatedFeed::new(feed, gate, RetryPolicy::default()));

    let embedder: Option<Arc<dyn Embedder>> = match settings.embedding.clone() {
        Some(cfg) => Some(Arc::new(HttpEmbedder::new(cfg)?)),
        None => None,
    };

    let (runtime, _workers) = JobRuntime::start(store.clone(), WORKER_COUNT);
    let ctx = Arc::new(SyncContext {
        feed: gated,
        store: store.clone(),
        settings: settings.clone(),
        embedder,
        jobs: with_fanout.then(|| runtime.clone()),
    });

    Ok(Engine {
        settings,
        store,
        ctx,
        runtime,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("serve") => serve().await,
        Some("sync") => match args.get(1).map(String::as_str) {
            Some("trigger") => sync_trigger(&args[2..]).await,
            Some("status") => sync_status(&args[2..]).await,
            _ => exit_usage(),
        },
        Some("doctor") if args.get(1).map(String::as_str) == Some("run") => doctor_run().await,
        Some("quote") => quote(&args[1..]).await,
        Some("watchlist") => watchlist(&args[1..]).await,
        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => exit_usage(),
    }
}

fn print_usage() {
    eprintln!(
        "leeksaver — A-share market data sync engine\n\n\
         USAGE:\n\
         \x20 leeksaver [serve]\n\
         \x20 leeksaver sync trigger <syncer> [--code CODE] [--date YYYY-MM-DD]\n\
         \x20 leeksaver sync status [--task NAME]\n\
         \x20 leeksaver doctor run\n\
         \x20 leeksaver quote <code>\n\
         \x20 leeksaver watchlist add|remove|list [CODE]"
    );
}

fn exit_usage() -> ! {
    print_usage();
    std::process::exit(2)
}

async fn serve() -> Result<()> {
    let engine = build_engine(true)?;
    let registry = build_registry(&engine.settings);
    let schedule = generate_schedule(&registry, &engine.settings);
    tracing::info!(tasks = schedule.len(), "schedule generated, starting");

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        schedule,
        engine.runtime.clone(),
        engine.ctx.clone(),
        engine.store.clone(),
    );

    let loop_token = shutdown.clone();
    let driver = tokio::spawn(async move { scheduler.run(loop_token).await });

    tokio::signal::ctrl_c().await.context("signal handler")?;
    tracing::info!("shutdown signal received");
    shutdown.cancel();
    let _ = driver.await;
    Ok(())
}

async fn sync_trigger(args: &[String]) -> Result<()> {
    let Some(name) = args.first().cloned() else {
        exit_usage()
    };
    if syncer_by_name(&name).is_none() {
        eprintln!("unknown syncer: {name}");
        std::process::exit(2);
    }

    let mut code: Option<String> = None;
    let mut date: Option<chrono::NaiveDate> = None;
    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--code" => code = iter.next().cloned(),
            "--date" => {
                let raw = iter.next().cloned().unwrap_or_default();
                date = Some(
                    chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                        .with_context(|| format!("invalid --date {raw:?}"))?,
                );
            }
            other => bail!("unrecognized argument: {other}"),
        }
    }
    let scope = match (code, date) {
        (Some(code), _) => Scope::Codes(vec![code]),
        (None, Some(date)) => Scope::Date(date),
        (None, None) => Scope::Auto,
    };

    let engine = build_engine(false)?;
    let task_name: &'static str = syncer_by_name(&name)
        .map(|s| s.name())
        .expect("validated above");

    let (done_tx, done_rx) = oneshot::channel();
    let ctx = engine.ctx.clone();
    let job = Job::new(task_name, move |cancel| {
        dispatch(task_name, ctx, scope, cancel)
    })
    .with_dedup_key(format!("trigger:{task_name}"))
    .with_done(done_tx);
    engine.runtime.submit(job).await?;

    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_message(format!("running {task_name}"));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let outcome = done_rx.await.context("job runtime dropped the job")?;
    match outcome {
        JobOutcome::Succeeded => spinner.finish_with_message(format!("{task_name} succeeded")),
        JobOutcome::Failed(msg) => {
            spinner.abandon_with_message(format!("{task_name} failed: {msg}"));
        }
        JobOutcome::Cancelled => spinner.abandon_with_message(format!("{task_name} cancelled")),
    }
    if let Some(status) = engine.store.task_status(task_name).await? {
        println!(
            "last_outcome={} progress={:.0}%",
            status.last_outcome.as_deref().unwrap_or("-"),
            status.progress_pct.unwrap_or(0.0)
        );
    }
    Ok(())
}

async fn sync_status(args: &[String]) -> Result<()> {
    let settings = Settings::from_env()?;
    let store = Store::open(&settings.database_path)?;

    let filter = match args {
        [flag, name] if flag == "--task" => Some(name.clone()),
        [] => None,
        _ => exit_usage(),
    };

    let rows = match &filter {
        Some(task) => store.task_status(task).await?.into_iter().collect(),
        None => store.all_task_status().await?,
    };
    if rows.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }
    for row in rows {
        let last_error = match row.last_error.clone() {
            Some(e) => e,
            None => store
                .last_error_message(&row.task_name)
                .await?
                .unwrap_or_default(),
        };
        println!(
            "{:<22} last_run={:<20} next_run={:<20} progress={:>5.1}% outcome={:<10} {}",
            row.task_name,
            row.last_run_at.as_deref().unwrap_or("-"),
            row.next_run_at.as_deref().unwrap_or("-"),
            row.progress_pct.unwrap_or(0.0),
            row.last_outcome.as_deref().unwrap_or("-"),
            last_error,
        );
    }
    Ok(())
}

async fn doctor_run() -> Result<()> {
    let engine = build_engine(false)?;
    let today = chrono::Local::now().date_naive();
    let report = DataDoctor::new(engine.ctx.clone()).run(today).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed {
        std::process::exit(1);
    }
    Ok(())
}

async fn quote(args: &[String]) -> Result<()> {
    let Some(code) = args.first().cloned() else {
        exit_usage()
    };
    let engine = build_engine(false)?;
    let cache = RealtimeCache::new(engine.settings.realtime_cache_ttl, STALE_GRACE);

    let feed = engine.ctx.feed.clone();
    let fetch_code = code.clone();
    let frame = cache
        .get_or_fetch("realtime_quote", &code, || async move {
            feed.realtime_quote(&fetch_code).await
        })
        .await?;
    println!("{frame}");
    Ok(())
}

async fn watchlist(args: &[String]) -> Result<()> {
    let settings = Settings::from_env()?;
    let store = Store::open(&settings.database_path)?;
    match args {
        [cmd, code] if cmd == "add" => {
            store.watchlist_add(code).await?;
            println!("added {code}");
        }
        [cmd, code] if cmd == "remove" => {
            store.watchlist_remove(code).await?;
            println!("removed {code}");
        }
        [cmd] if cmd == "list" => {
            for code in store.watchlist_codes().await? {
                println!("{code}");
            }
        }
        _ => exit_usage(),
    }
    Ok(())
}
