use core::future::{Future, IntoFuture as _};
use std::{process::ExitCode, sync::Arc};

use anyhow::{bail, Error as AnyhowError, Result};
use attestation_tracker::{
    BackfillScanner, BeaconApi, ContinuousScanner, Deadline, LastAttestCache, SlotProcessor,
};
use clap::{Error as ClapError, Parser as _};
use log::{error, info, warn};
use prometheus_metrics::Metrics;
use reqwest::Client;
use tokio::{net::TcpListener, runtime::Builder, task::JoinError};
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use tokio::signal::unix::SignalKind;

use crate::{
    args::ProxyArgs,
    config::ProxyConfig,
    routing::ProxyState,
    upstream::Upstream,
};

mod args;
mod config;
mod error;
mod routing;
mod transform;
mod upstream;

const USER_AGENT: &str = concat!("dora-proxy/", env!("CARGO_PKG_VERSION"));

fn main() -> ExitCode {
    if let Err(error) = try_main() {
        error.downcast_ref().map(ClapError::exit);
        error!("{error:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn try_main() -> Result<()> {
    binary_utils::initialize_logger(module_path!(), false)?;

    let config = ProxyArgs::try_parse()?
        .try_into_config()
        .map_err(ProxyArgs::clap_error)?;

    block_on(run(config))
}

async fn run(config: ProxyConfig) -> Result<()> {
    let ProxyConfig {
        listen_address,
        upstream_url,
        consensus_api_url,
        request_timeout,
        backfill_timeout,
        backfill_workers,
        backfill_enabled,
        metrics_enabled,
    } = config;

    let metrics = if metrics_enabled {
        let metrics = Metrics::new()?;
        metrics.register_with_default_metrics()?;
        Some(Arc::new(metrics))
    } else {
        None
    };

    let client = Client::builder()
        .timeout(request_timeout)
        .user_agent(USER_AGENT)
        .build()?;

    let cache = Arc::new(LastAttestCache::new());

    let beacon_api = Arc::new(BeaconApi::new(
        client.clone(),
        consensus_api_url.clone(),
        metrics.clone(),
    ));

    let processor = Arc::new(SlotProcessor::new(
        Arc::clone(&beacon_api),
        Arc::clone(&cache),
        metrics.clone(),
    ));

    let shutdown = CancellationToken::new();

    let scanner = ContinuousScanner::new(Arc::clone(&processor));
    let scanner_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scanner.run(shutdown).await }
    });

    let backfill_task = backfill_enabled.then(|| {
        let backfill =
            BackfillScanner::new(processor, metrics.clone()).with_workers(backfill_workers);
        let deadline = Deadline::after(backfill_timeout).with_cancellation(&shutdown);

        tokio::spawn(async move {
            if let Err(error) = backfill.backfill(&deadline).await {
                warn!("backfill did not complete: {:?}", AnyhowError::new(error));
            }
        })
    });

    let state = ProxyState {
        upstream: Arc::new(Upstream::new(client, upstream_url.clone())),
        beacon_api,
        cache,
        metrics,
    };

    let listener = TcpListener::bind(listen_address).await?;

    info!(
        "dora proxy listening on {listen_address} \
         (upstream: {upstream_url}, consensus API: {consensus_api_url})",
    );

    let server = axum::serve(listener, routing::router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let mut server_task = tokio::spawn(server);

    tokio::select! {
        result = &mut server_task => {
            shutdown.cancel();
            result.map_err(join_error)??;
            bail!("HTTP server stopped unexpectedly");
        }
        result = wait_for_signal() => result?,
    }

    info!("shutting down");

    shutdown.cancel();

    server_task.await.map_err(join_error)??;
    scanner_task.await.map_err(join_error)?;

    if let Some(backfill_task) = backfill_task {
        backfill_task.await.map_err(join_error)?;
    }

    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut interrupt = tokio::signal::unix::signal(SignalKind::interrupt())?;
        let mut terminate = tokio::signal::unix::signal(SignalKind::terminate())?;

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

fn join_error(error: JoinError) -> AnyhowError {
    if error.is_panic() {
        binary_utils::payload_into_error(error.into_panic())
    } else {
        error.into()
    }
}

fn block_on(future: impl Future<Output = Result<()>>) -> Result<()> {
    // This is roughly what `#[tokio::main]` expands to.
    Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}
