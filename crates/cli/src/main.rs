//! htmlc command-line entry point.
//!
//! Reads one HTML document from a file or stdin and writes the compressed
//! document to a file or stdout. Logging goes to stderr so stdout carries
//! only the document.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use htmlc_client::{Compressor, DefaultMinifier, FetchConfig, HttpFetcher, RequestContext};
use htmlc_core::CompressorConfig;

/// Combine, minify and cache the CSS/JS of an HTML document.
#[derive(Debug, Parser)]
#[command(name = "htmlc", version)]
struct Args {
    /// HTML file to compress; stdin when omitted or `-`.
    input: Option<PathBuf>,

    /// Write the result here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML config file; overrides `HTMLC_CONFIG_FILE`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scheme of the request the document answers.
    #[arg(long)]
    scheme: Option<String>,

    /// Host of the request the document answers.
    #[arg(long)]
    host: Option<String>,

    /// URI of the request the document answers.
    #[arg(long)]
    uri: Option<String>,
}

impl Args {
    fn load_config(&self) -> Result<CompressorConfig> {
        let mut config = match &self.config {
            Some(path) => CompressorConfig::load_with_file(Some(path)),
            None => CompressorConfig::load(),
        }
        .context("failed to load configuration")?;

        if let Some(scheme) = &self.scheme {
            config.current_url_scheme = Some(scheme.clone());
        }
        if let Some(host) = &self.host {
            config.current_url_host = Some(host.clone());
        }
        if let Some(uri) = &self.uri {
            config.current_url_uri = Some(uri.clone());
        }
        Ok(config)
    }

    fn read_input(&self) -> Result<String> {
        match self.input.as_deref().filter(|path| path.as_os_str() != "-") {
            Some(path) => std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display())),
            None => {
                let mut html = String::new();
                std::io::stdin().read_to_string(&mut html).context("failed to read stdin")?;
                Ok(html)
            }
        }
    }

    fn write_output(&self, html: &str) -> Result<()> {
        match &self.output {
            Some(path) => std::fs::write(path, html).with_context(|| format!("failed to write {}", path.display())),
            None => std::io::stdout().write_all(html.as_bytes()).context("failed to write stdout"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    let config = args.load_config()?;
    let html = args.read_input()?;

    let context = RequestContext::from_config(&config)?;
    let fetcher = HttpFetcher::new(FetchConfig::from_config(&config, &context))?;
    let compressor = Compressor::new(config, fetcher, DefaultMinifier)?;

    tracing::debug!(host = compressor.context().host(), uri = compressor.context().uri(), "compressing document");
    args.write_output(&compressor.compress_or_original(&html))
}
