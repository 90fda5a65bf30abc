use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use strider_client::{ItemProcessor, default_module_set};
use strider_core::{
    CrawlConfig, CrawlerError, DefaultDomainResolver, DomainResolver, HttpRequest, Item, Mid,
    Monitor, MonitorConfig, ModuleType, Scheduler, Status, TracingMonitorReporter,
};

#[derive(Parser)]
#[command(name = "strider", version, about = "Concurrent web crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl from a seed URL until the scheduler goes idle
    Crawl(CrawlArgs),

    /// Parse or generate module identifiers
    Mid(MidArgs),
}

#[derive(Args)]
struct CrawlArgs {
    /// Seed URL
    #[arg(short, long, env = "STRIDER_URL")]
    url: String,

    /// JSON crawl configuration (buffers, worker counts, fetch settings)
    #[arg(short, long, env = "STRIDER_CONFIG")]
    config: Option<PathBuf>,

    /// Accepted primary domain; repeatable. Defaults to the seed's domain
    #[arg(short, long = "domain")]
    domains: Vec<String>,

    /// Maximum link depth, the seed being depth 0
    #[arg(long, env = "STRIDER_MAX_DEPTH")]
    max_depth: Option<u32>,

    /// Write items as JSON lines to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Consecutive idle checks before the crawl counts as finished
    #[arg(long, env = "STRIDER_IDLE_CHECKS", default_value_t = 5)]
    idle_checks: u32,

    /// Milliseconds between idle checks
    #[arg(long, env = "STRIDER_CHECK_INTERVAL", default_value_t = 100)]
    check_interval: u64,

    /// Allow requests to private/reserved IP ranges
    #[arg(long, default_value_t = false)]
    allow_private: bool,
}

#[derive(Args)]
struct MidArgs {
    /// MID to decode
    #[arg(long, conflicts_with = "generate")]
    parse: Option<String>,

    /// Build a MID from its parts
    #[arg(long, requires_all = ["module_type", "serial"])]
    generate: bool,

    /// Module type: downloader, analyzer or pipeline
    #[arg(long = "type")]
    module_type: Option<ModuleType>,

    #[arg(long)]
    serial: Option<u64>,

    /// Address of a remote module instance, as ip:port
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("strider=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl(args) => cmd_crawl(args).await,
        Commands::Mid(args) => cmd_mid(&args),
    }
}

fn load_config(args: &CrawlArgs, seed: &HttpRequest) -> Result<CrawlConfig> {
    let mut config = match &args.config {
        Some(path) => CrawlConfig::from_path(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => CrawlConfig::default(),
    };

    if !args.domains.is_empty() {
        config.request.accepted_domains = args.domains.clone();
    }
    if config.request.accepted_domains.is_empty() {
        let host = seed
            .host()
            .with_context(|| format!("Seed URL {} has no host", seed.url))?;
        let domain = DefaultDomainResolver
            .primary_domain(host)
            .context("Failed to derive the seed's primary domain")?;
        config.request.accepted_domains.push(domain);
    }
    if let Some(max_depth) = args.max_depth {
        config.request.max_depth = max_depth;
    }
    if args.allow_private {
        config.fetch.allow_private_urls = true;
    }

    config.check().context("Invalid crawl configuration")?;
    Ok(config)
}

type Output = Arc<Mutex<Box<dyn Write + Send>>>;

fn open_output(path: Option<&Path>) -> Result<Output> {
    let writer: Box<dyn Write + Send> = match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    };
    Ok(Arc::new(Mutex::new(writer)))
}

/// Item processor appending each item as one JSON line.
fn json_lines(output: Output) -> ItemProcessor {
    Arc::new(move |item: Item| -> Result<Item, CrawlerError> {
        let mut writer = output
            .lock()
            .map_err(|_| CrawlerError::pipeline("output writer poisoned"))?;
        serde_json::to_writer(&mut *writer, &item)
            .map_err(|e| CrawlerError::pipeline(format!("couldn't encode item: {e}")))?;
        writeln!(writer).map_err(|e| CrawlerError::pipeline(format!("couldn't write item: {e}")))?;
        Ok(item)
    })
}

async fn cmd_crawl(args: CrawlArgs) -> Result<()> {
    let seed = HttpRequest::parse(&args.url).context("Invalid seed URL")?;
    let config = load_config(&args, &seed)?;
    let output = open_output(args.output.as_deref())?;

    let modules = default_module_set(&config, vec![json_lines(output.clone())])
        .context("Failed to build crawler modules")?;

    let scheduler = Scheduler::new();
    scheduler
        .init(config.request.clone(), config.buffers, modules)
        .context("Failed to initialize scheduler")?;

    let mut errors = scheduler
        .error_chan()
        .context("Scheduler error channel unavailable")?;
    let error_drain = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(error) = errors.recv().await {
            count += 1;
            tracing::warn!(%error, "Crawl error");
        }
        count
    });

    tracing::info!(url = %seed.url, domains = ?config.request.accepted_domains, max_depth = config.request.max_depth, "Starting crawl");
    scheduler.start(seed).context("Failed to start scheduler")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping crawl");
            ctrl_c.cancel();
        }
    });

    let monitor_config = MonitorConfig::default()
        .with_check_interval(Duration::from_millis(args.check_interval))
        .with_max_idle_count(args.idle_checks);
    let checks = Monitor::new(scheduler.clone(), monitor_config)
        .run(cancel, &TracingMonitorReporter)
        .await
        .context("Monitor failed")?;

    if scheduler.status() == Status::Started {
        scheduler.stop().context("Failed to stop scheduler")?;
    }
    let error_count = error_drain.await.context("Error drain task failed")?;

    match output.lock() {
        Ok(mut writer) => writer.flush().context("Failed to flush output")?,
        Err(_) => bail!("Output writer poisoned"),
    }

    tracing::info!(%checks, %error_count, "Crawl finished");
    eprintln!("{}", scheduler.summary());
    Ok(())
}

fn cmd_mid(args: &MidArgs) -> Result<()> {
    let mid = if let Some(encoded) = &args.parse {
        Mid::parse(encoded).with_context(|| format!("Invalid MID: {encoded}"))?
    } else if args.generate {
        let (Some(module_type), Some(serial)) = (args.module_type, args.serial) else {
            bail!("--generate needs --type and --serial");
        };
        Mid::generate(module_type, serial, args.addr)
    } else {
        bail!("Nothing to do: pass --parse <mid> or --generate");
    };

    let parts = mid.parts();
    let rendered = serde_json::json!({
        "mid": mid.as_str(),
        "type": parts.module_type,
        "serial": parts.serial,
        "addr": parts.addr.map(|addr| addr.to_string()),
    });
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}
