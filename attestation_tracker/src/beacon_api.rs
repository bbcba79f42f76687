use std::sync::Arc;

use anyhow::{ensure, Result};
use log::{debug, warn};
use mime::APPLICATION_JSON;
use prometheus_metrics::Metrics;
use reqwest::{header::ACCEPT, Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    consts::{BLOCK_FETCH_ATTEMPTS, BLOCK_FETCH_BACKOFF_STEP},
    containers::{BlockBody, BlockResponse, Committee, Envelope, HeadBlock, HeadHeader},
    deadline::Deadline,
    primitives::Slot,
    voters::CommitteeAssignment,
};

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum Error {
    #[error("deadline expired before the beacon node responded")]
    DeadlineExpired,
    #[error("beacon node head has no block root")]
    HeadRootUnavailable,
    #[error("beacon node head has no slot")]
    HeadSlotUnavailable,
    #[error("beacon node head has neither slot nor block root")]
    HeadUnidentified,
    #[error("received unexpected status code: {status}")]
    UnexpectedStatusCode { status: StatusCode },
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Head {
    pub slot: Slot,
    pub root: Option<String>,
}

// The head block fallback may carry only one of the two.
struct HeadIdentifiers {
    slot: Option<Slot>,
    root: Option<String>,
}

/// Read-only client for the subset of the Beacon Node API the tracker needs.
pub struct BeaconApi {
    client: Client,
    base_url: Url,
    metrics: Option<Arc<Metrics>>,
}

impl BeaconApi {
    #[must_use]
    pub const fn new(client: Client, base_url: Url, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            client,
            base_url,
            metrics,
        }
    }

    pub async fn resolve_head(&self, deadline: &Deadline) -> Result<Head> {
        let result = self
            .head_identifiers(deadline)
            .await
            .and_then(|HeadIdentifiers { slot, root }| {
                let slot = slot.ok_or(Error::HeadSlotUnavailable)?;
                Ok(Head { slot, root })
            });

        self.record_head_failure(result)
    }

    /// Unlike [`Self::resolve_head`], succeeds when the beacon node reports a root but no slot.
    pub async fn resolve_head_root(&self, deadline: &Deadline) -> Result<String> {
        let result = self
            .head_identifiers(deadline)
            .await
            .and_then(|HeadIdentifiers { root, .. }| {
                root.ok_or_else(|| Error::HeadRootUnavailable.into())
            });

        self.record_head_failure(result)
    }

    fn record_head_failure<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            if let Some(metrics) = self.metrics.as_ref() {
                metrics.tracker_head_resolution_failures.inc();
            }
        }

        result
    }

    async fn head_identifiers(&self, deadline: &Deadline) -> Result<HeadIdentifiers> {
        match deadline.run(self.head_identifiers_unbounded()).await {
            Some(result) => result,
            None => Err(Error::DeadlineExpired.into()),
        }
    }

    async fn head_identifiers_unbounded(&self) -> Result<HeadIdentifiers> {
        let response = self.get("/eth/v1/beacon/headers/head").await?;
        let status = response.status();

        if status.is_success() {
            let Envelope { data } = response.json::<Envelope<HeadHeader>>().await?;

            match data.header.message.slot {
                Some(slot) if !data.root.is_empty() => {
                    return Ok(HeadIdentifiers {
                        slot: Some(slot),
                        root: Some(data.root),
                    })
                }
                _ => debug!("head header has no root or slot; falling back to head block"),
            }
        } else {
            debug!("head header request returned {status}; falling back to head block");
        }

        self.head_identifiers_from_block().await
    }

    async fn head_identifiers_from_block(&self) -> Result<HeadIdentifiers> {
        let response = self.get("/eth/v2/beacon/blocks/head").await?;
        let status = response.status();

        ensure!(status.is_success(), Error::UnexpectedStatusCode { status });

        let HeadBlock { root, data } = response.json().await?;

        let slot = data.message.slot;
        let root = root
            .filter(|root| !root.is_empty())
            .or_else(|| data.root.filter(|root| !root.is_empty()));

        ensure!(slot.is_some() || root.is_some(), Error::HeadUnidentified);

        Ok(HeadIdentifiers { slot, root })
    }

    /// Fetches the body of the block proposed at `slot`.
    ///
    /// Transport errors and unsuccessful responses are retried with a linearly growing pause.
    /// Returns `None` once attempts run out, on an undecodable body, or when `deadline` expires.
    pub async fn fetch_block(&self, slot: Slot, deadline: &Deadline) -> Option<BlockBody> {
        let path = format!("/eth/v2/beacon/blocks/{slot}");

        for attempt in 1..=BLOCK_FETCH_ATTEMPTS {
            match deadline.run(self.get(&path)).await? {
                Ok(response) if response.status().is_success() => {
                    return match deadline.run(response.json::<BlockResponse>()).await? {
                        Ok(block) => Some(block.data.message.body),
                        Err(error) => {
                            debug!("failed to decode block at slot {slot}: {error}");
                            None
                        }
                    };
                }
                Ok(response) => debug!(
                    "block request for slot {slot} returned {} \
                     (attempt {attempt} of {BLOCK_FETCH_ATTEMPTS})",
                    response.status(),
                ),
                Err(error) => debug!(
                    "block request for slot {slot} failed \
                     (attempt {attempt} of {BLOCK_FETCH_ATTEMPTS}): {error:?}",
                ),
            }

            if attempt < BLOCK_FETCH_ATTEMPTS {
                deadline
                    .run(tokio::time::sleep(BLOCK_FETCH_BACKOFF_STEP * attempt))
                    .await?;
            }
        }

        warn!("giving up on block at slot {slot} after {BLOCK_FETCH_ATTEMPTS} attempts");

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.tracker_block_fetch_failures.inc();
        }

        None
    }

    /// Returns an empty assignment if committees cannot be retrieved.
    pub async fn resolve_committees(&self, slot: Slot, deadline: &Deadline) -> CommitteeAssignment {
        match deadline.run(self.committees(slot)).await {
            Some(Ok(committees)) => committees,
            Some(Err(error)) => {
                debug!("failed to resolve committees at slot {slot}: {error:?}");
                CommitteeAssignment::new()
            }
            None => {
                debug!("deadline expired while resolving committees at slot {slot}");
                CommitteeAssignment::new()
            }
        }
    }

    async fn committees(&self, slot: Slot) -> Result<CommitteeAssignment> {
        let response = self
            .get(&format!("/eth/v1/beacon/states/{slot}/committees?slot={slot}"))
            .await?;

        let committees = Self::json::<Vec<Committee>>(response).await?;

        Ok(committees
            .into_iter()
            .map(|Committee { index, validators }| (index, validators))
            .collect())
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();

        ensure!(status.is_success(), Error::UnexpectedStatusCode { status });

        let Envelope { data } = response.json().await?;

        Ok(data)
    }

    async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path)?;

        self.client
            .get(url)
            .header(ACCEPT, APPLICATION_JSON.as_ref())
            .send()
            .await
            .map_err(Into::into)
    }

    // `Url::join` would drop any path the base URL has.
    fn url(&self, path: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}{path}").parse().map_err(Into::into)
    }
}
