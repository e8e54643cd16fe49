use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use video_signing::{
    InlineProvider, KeyMaterial, SessionConfig, SignAlgorithm, SigningError, SigningProvider,
    SigningSession, UnitSignature, WorkerConfig, WorkerProvider,
};

#[derive(Debug, Clone, ValueEnum)]
enum ProviderKind {
    Inline,
    Worker,
}

/// Sign SHA-256 digests of video units with a pluggable signing provider.
#[derive(Parser)]
struct Args {
    /// `rsa`, `ecdsa` or the full algorithm name.
    #[clap(long, env = "SIGNING_ALGORITHM", default_value = "ecdsa")]
    algorithm: SignAlgorithm,
    #[clap(long, env = "SIGNING_PRIVATE_KEY")]
    private_key: PathBuf,
    #[clap(long, env = "SIGNING_PUBLIC_KEY")]
    public_key: PathBuf,
    #[clap(long, env = "SIGNING_PROVIDER", default_value = "inline")]
    provider: ProviderKind,
    /// Simulated signing latency for the worker provider.
    #[clap(long, default_value = "0")]
    latency_ms: u64,
    #[clap(long, default_value = "5000")]
    timeout_ms: u64,
    /// Hex-encoded digests. Read one per line from stdin when none are given.
    hashes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UnitLine {
    hash: String,
    algorithm: &'static str,
    signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn read_key(path: &Path) -> Result<KeyMaterial> {
    let bytes = std::fs::read(path).with_context(|| format!("reading key {}", path.display()))?;
    Ok(KeyMaterial::new(bytes))
}

/// Decode a hex digest, with or without a `0x` prefix.
fn parse_digest(s: &str) -> Result<Vec<u8>, SigningError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| SigningError::InvalidArgument(format!("invalid hex digest: {e}")))
}

fn read_hashes(args: &Args) -> Result<Vec<String>> {
    if !args.hashes.is_empty() {
        return Ok(args.hashes.clone());
    }
    let mut hashes = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line.context("reading digests from stdin")?;
        let line = line.trim();
        if !line.is_empty() {
            hashes.push(line.to_string());
        }
    }
    Ok(hashes)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let algorithm = args.algorithm;
    let config = SessionConfig::new(
        algorithm,
        read_key(&args.private_key)?,
        read_key(&args.public_key)?,
    );

    let provider: Box<dyn SigningProvider> = match args.provider {
        ProviderKind::Inline => Box::new(InlineProvider::new()),
        ProviderKind::Worker => Box::new(WorkerProvider::new(WorkerConfig {
            latency_ms: args.latency_ms,
            ..WorkerConfig::default()
        })),
    };
    let mut session = SigningSession::open(provider, config).context("opening signing session")?;

    let hashes = read_hashes(&args)?;
    let timeout = Duration::from_millis(args.timeout_ms);
    let mut out = io::stdout().lock();
    let mut signed = 0usize;

    for hash in &hashes {
        let outcome = match parse_digest(hash) {
            Ok(digest) => session.sign_unit(&digest, timeout),
            Err(e) => UnitSignature::Unsigned(e),
        };
        let line = match outcome {
            UnitSignature::Signed(signature) => {
                signed += 1;
                UnitLine {
                    hash: hash.clone(),
                    algorithm: algorithm.as_str(),
                    signed: true,
                    signature: Some(hex::encode(signature)),
                    error: None,
                }
            }
            UnitSignature::Unsigned(e) => UnitLine {
                hash: hash.clone(),
                algorithm: algorithm.as_str(),
                signed: false,
                signature: None,
                error: Some(e.to_string()),
            },
        };
        serde_json::to_writer(&mut out, &line).context("writing result")?;
        writeln!(out).context("writing result")?;
    }

    session.close().context("closing signing session")?;
    info!(units = hashes.len(), signed, "done");
    Ok(())
}
