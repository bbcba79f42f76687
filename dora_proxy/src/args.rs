use core::{
    net::{AddrParseError, SocketAddr},
    time::Duration,
};

use anyhow::{Context as _, Result};
use attestation_tracker::consts::DEFAULT_BACKFILL_WORKERS;
use clap::{
    builder::TypedValueParser as _, error::ErrorKind, CommandFactory as _, Error as ClapError,
    Parser,
};
use reqwest::Url;

use crate::config::ProxyConfig;

const UPSTREAM_API_PREFIX: &str = "/api";

/// Dora explorer API proxy that reports the last slot each validator attested in
#[derive(Parser)]
#[clap(version, verbatim_doc_comment)]
pub struct ProxyArgs {
    /// Address to listen on. `:PORT` listens on all interfaces
    #[clap(
        long,
        env = "PROXY_LISTEN_ADDR",
        default_value = ":8081",
        value_parser = parse_listen_address
    )]
    listen_address: SocketAddr,

    /// Base URL of the explorer API. `/api` is appended unless already present
    #[clap(long, env = "PROXY_UPSTREAM_BASE_URL", default_value = "http://localhost:8080")]
    upstream_base_url: String,

    /// Base URL of the Beacon Node API
    #[clap(long, env = "PROXY_CONSENSUS_API_URL", default_value = "http://localhost:5052")]
    consensus_api_url: Url,

    /// Timeout for every outbound HTTP request in seconds
    #[clap(long, env = "PROXY_REQUEST_TIMEOUT", default_value_t = 20)]
    request_timeout: u64,

    /// Time budget of the startup backfill in seconds
    #[clap(long, env = "PROXY_BACKFILL_TIMEOUT", default_value_t = 600)]
    backfill_timeout: u64,

    /// Number of concurrent backfill workers
    #[clap(
        long,
        env = "PROXY_BACKFILL_WORKERS",
        default_value_t = DEFAULT_BACKFILL_WORKERS,
        value_parser = clap::value_parser!(u16).range(1..).map(usize::from)
    )]
    backfill_workers: usize,

    /// Skip the startup backfill of recent epochs
    #[clap(long, env = "PROXY_DISABLE_BACKFILL")]
    disable_backfill: bool,

    /// Collect Prometheus metrics and serve them at `/metrics`
    #[clap(long, env = "PROXY_METRICS")]
    metrics: bool,
}

impl ProxyArgs {
    pub fn try_into_config(self) -> Result<ProxyConfig> {
        let Self {
            listen_address,
            upstream_base_url,
            consensus_api_url,
            request_timeout,
            backfill_timeout,
            backfill_workers,
            disable_backfill,
            metrics,
        } = self;

        let upstream_url = with_api_prefix(&upstream_base_url)
            .parse()
            .with_context(|| format!("invalid upstream base URL: {upstream_base_url}"))?;

        Ok(ProxyConfig {
            listen_address,
            upstream_url,
            consensus_api_url,
            request_timeout: Duration::from_secs(request_timeout),
            backfill_timeout: Duration::from_secs(backfill_timeout),
            backfill_workers,
            backfill_enabled: !disable_backfill,
            metrics_enabled: metrics,
        })
    }

    pub fn clap_error(message: impl core::fmt::Display) -> ClapError {
        Self::command().error(ErrorKind::ValueValidation, message)
    }
}

fn parse_listen_address(address: &str) -> Result<SocketAddr, AddrParseError> {
    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => address.parse(),
    }
}

fn with_api_prefix(base_url: &str) -> String {
    if base_url.ends_with(UPSTREAM_API_PREFIX) {
        base_url.to_owned()
    } else {
        format!("{}{UPSTREAM_API_PREFIX}", base_url.trim_end_matches('/'))
    }
}
