use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rateguard::config::{PolicyOverrides, RateGuardConfig};
use rateguard::guard::{RateGuard, Responder, Verdict, RESET_HEADER};
use rateguard::ratelimit::{Algorithm, Limiter};
use rateguard::store::MemoryStore;

type CliGuard = RateGuard<Limiter<Arc<MemoryStore>>>;

/// Evaluate rate limit decisions for a sequence of keys.
///
/// Keys are taken from the command line, or read from stdin one per line.
/// Each decision is printed to stdout as a JSON line.
#[derive(Parser, Debug)]
#[command(name = "rateguard", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the policy window in milliseconds
    #[arg(long)]
    window_ms: Option<i64>,

    /// Override the policy maximum
    #[arg(long)]
    max: Option<i64>,

    /// Override the algorithm (fixed or sliding)
    #[arg(long)]
    algorithm: Option<Algorithm>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Keys to check, in order
    keys: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            window_ms: self.window_ms,
            max: self.max,
            algorithm: self.algorithm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Rejection {
    status: u16,
    message: String,
}

/// Collects what the guard would send on a transport response.
#[derive(Debug, Default)]
struct CapturedResponse {
    headers: BTreeMap<&'static str, String>,
    rejection: Option<Rejection>,
}

impl Responder for CapturedResponse {
    fn set_header(&mut self, name: &'static str, value: String) {
        self.headers.insert(name, value);
    }

    fn reject(&mut self, status: u16, message: &str) {
        self.rejection = Some(Rejection {
            status,
            message: message.to_string(),
        });
    }
}

#[derive(Serialize)]
struct Decision<'a> {
    key: &'a str,
    allowed: bool,
    headers: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejection: Option<Rejection>,
    reset_at: Option<String>,
}

impl<'a> Decision<'a> {
    fn new(key: &'a str, verdict: Verdict, response: CapturedResponse) -> Self {
        let reset_at = response
            .headers
            .get(RESET_HEADER)
            .and_then(|secs| secs.parse::<i64>().ok())
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|t| t.to_rfc3339());

        Self {
            key,
            allowed: verdict == Verdict::Proceed,
            headers: response.headers,
            rejection: response.rejection,
            reset_at,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting RateGuard v{}", env!("CARGO_PKG_VERSION"));

    let config = RateGuardConfig::load_with(cli.config.as_deref(), &cli.overrides())?;
    let policy = config.policy()?;

    info!(
        window_ms = policy.window_ms(),
        max = policy.max(),
        algorithm = %policy.algorithm(),
        status_code = config.guard.status_code,
        "Configuration loaded"
    );

    let store = Arc::new(
        MemoryStore::builder()
            .cleanup_interval(config.store.cleanup_interval())
            .build(),
    );
    let guard = RateGuard::new(config.guard_options(), Limiter::new(store.clone()))?;

    if cli.keys.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let key = line.trim();
            if !key.is_empty() {
                evaluate(&guard, key).await?;
            }
        }
    } else {
        for key in &cli.keys {
            evaluate(&guard, key).await?;
        }
    }

    store.shutdown();
    debug!(records = guard.backend().store().len(), "RateGuard stopped");
    Ok(())
}

async fn evaluate(guard: &CliGuard, key: &str) -> anyhow::Result<()> {
    let mut response = CapturedResponse::default();
    let verdict = guard.guard(key, &mut response).await;

    let decision = Decision::new(key, verdict, response);
    println!("{}", serde_json::to_string(&decision)?);
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
