use clap::{Parser, ValueEnum};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wwwatch::{JsonStorage, RedisStorage, Storage, Worker, DEFAULT_FLUSH_INTERVAL};

#[derive(Parser, Debug)]
#[command(name = "wwwatch", version, about = "Access log monitoring tool")]
struct Cli {
    /// Path to the access log file
    #[arg(value_name = "ACCESS_LOG")]
    access_log: PathBuf,

    /// Counter namespace (Redis key name)
    name: String,

    /// Seconds of log time between flushes
    #[arg(long, default_value_t = DEFAULT_FLUSH_INTERVAL)]
    flush_interval: u64,

    /// Milliseconds to wait for new data once the end of the log is reached
    #[arg(long, default_value_t = 100)]
    poll_delay_ms: u64,

    /// Where counters and the read checkpoint are kept
    #[arg(long, value_enum, default_value_t = Backend::Redis)]
    storage: Backend,

    /// Redis server URL
    #[arg(long, default_value = "redis://localhost:6379/")]
    redis_url: String,

    /// Host part of per-host Redis keys [default: system host name]
    #[arg(long)]
    host_tag: Option<String>,

    /// JSON state document [default: wwwatch-<NAME>.json]
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Section of the JSON document that holds the counters
    #[arg(long, default_value = wwwatch::json_store::DEFAULT_SECTION)]
    section: String,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Redis,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", error_chain(e.as_ref()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let storage: Box<dyn Storage> = match cli.storage {
        Backend::Redis => {
            let host = cli.host_tag.clone().unwrap_or_else(hostname);
            Box::new(RedisStorage::connect(&cli.redis_url, &cli.name, &host)?)
        }
        Backend::Json => {
            let path = cli
                .state_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("wwwatch-{}.json", cli.name)));
            Box::new(JsonStorage::open(path).with_section(cli.section.clone()))
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::Relaxed);
    })?;

    info!(
        "watching {} (flush every {}s)",
        cli.access_log.display(),
        cli.flush_interval
    );
    let mut worker = Worker::builder(&cli.access_log)
        .flush_interval(cli.flush_interval)
        .poll_delay(Duration::from_millis(cli.poll_delay_ms))
        .stop_signal(stop)
        .build(storage);
    worker.run()?;
    Ok(())
}

/// `outer: inner: root` rendering of an error and its sources.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(unix)]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes for the whole call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}
