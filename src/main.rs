//! Zentinel SOAP invoker binary.
//!
//! Run with: `zentinel-soap-invoker --config service.yaml --input request.xml`
//!
//! Reads the request payload, calls the configured SOAP operation and writes
//! the response body.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_soap_invoker::{SoapMessage, SoapService, SoapServiceConfig};

/// SOAP service invoker for Zentinel.
///
/// Calls one operation of a WSDL-described SOAP service with an XML payload.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Request payload file (defaults to stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Response output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Message metadata as key=value, may be repeated
    #[arg(short, long, value_parser = parse_metadata)]
    metadata: Vec<(String, String)>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn parse_metadata(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays free for the response.
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting Zentinel SOAP invoker v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    let config = load_config(&args.config).await?;

    info!(
        wsdl_url = %config.wsdl_url,
        service = %config.service_name,
        port = %config.port_name,
        per_message_dispatch = config.per_message_dispatch,
        "Configuration loaded"
    );

    let payload = match &args.input {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read input file {}", path.display()))?,
        None => tokio::task::spawn_blocking(|| {
            let mut buffer = Vec::new();
            std::io::stdin().read_to_end(&mut buffer).map(|_| buffer)
        })
        .await
        .context("stdin reader panicked")?
        .context("Failed to read stdin")?,
    };

    let mut message = SoapMessage::new(payload);
    for (key, value) in args.metadata {
        message.add_metadata(key, value);
    }

    // The engine performs blocking IO.
    let (message, stats) = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut service = SoapService::new(config);
        service
            .initialize()
            .context("Failed to initialize SOAP service")?;
        service.invoke(&mut message).context("SOAP invocation failed")?;
        let stats = service.stats();
        service.close();
        Ok((message, stats))
    })
    .await
    .context("SOAP invocation task panicked")??;

    info!(
        invocations = stats.invocations,
        dispatch_builds = stats.dispatch_builds,
        "SOAP invocation completed"
    );

    match &args.output {
        Some(path) => tokio::fs::write(path, message.payload())
            .await
            .with_context(|| format!("Failed to write output file {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(message.payload())
                .context("Failed to write stdout")?;
            stdout.flush().context("Failed to flush stdout")?;
        }
    }

    Ok(())
}

async fn load_config(path: &Path) -> Result<SoapServiceConfig> {
    if !path.exists() {
        bail!("Config file not found: {}", path.display());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read config file")?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).context("Failed to parse config file")
    } else {
        serde_yaml::from_str(&content).context("Failed to parse config file")
    }
}
