use std::sync::Arc;

use attestation_tracker::{consts::HEAD_RESOLUTION_TIMEOUT, BeaconApi, Deadline, LastAttestCache};
use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method},
    response::{IntoResponse as _, Response},
    routing::{get, post},
    Router,
};
use prometheus::TextEncoder;
use prometheus_metrics::Metrics;

use crate::{error::Error, transform, upstream::Upstream};

const HEAD_ID: &str = "head";

#[derive(Clone)]
pub struct ProxyState {
    pub upstream: Arc<Upstream>,
    pub beacon_api: Arc<BeaconApi>,
    pub cache: Arc<LastAttestCache>,
    pub metrics: Option<Arc<Metrics>>,
}

impl ProxyState {
    fn start_timer(&self, route: &str) -> Option<prometheus::HistogramTimer> {
        self.metrics
            .as_ref()
            .and_then(|metrics| prometheus_metrics::start_timer_vec(&metrics.proxy_response_times, route))
    }
}

pub fn router(state: ProxyState) -> Router {
    let mut router = Router::new()
        .route("/api/v1/validator", post(validator))
        .route("/api/v1/epoch/latest", get(latest_epoch))
        .route("/api/v1/slot/{slot_or_hash}", get(slot));

    if state.metrics.is_some() {
        router = router.route("/metrics", get(metrics));
    }

    router.with_state(state)
}

/// `POST /api/v1/validator`
async fn validator(
    State(state): State<ProxyState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    let _timer = state.start_timer("validator");

    state
        .upstream
        .forward(Method::POST, "/v1/validator", query.as_deref(), &headers, body)
        .await?
        .transform_json(|value| {
            transform::map_validator_status(value);
            transform::attach_last_attestation_slot(value, &state.cache);
        })
}

/// `GET /api/v1/epoch/latest`
async fn latest_epoch(
    State(state): State<ProxyState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let _timer = state.start_timer("epoch_latest");

    let response = state
        .upstream
        .forward(Method::GET, "/v1/epoch/latest", query.as_deref(), &headers, Bytes::new())
        .await?;

    Ok(response.into_response())
}

/// `GET /api/v1/slot/{slot_or_hash}`
///
/// `head` is resolved to the block root of the current head first.
async fn slot(
    State(state): State<ProxyState>,
    Path(slot_or_hash): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let _timer = state.start_timer("slot");

    let block_id = if slot_or_hash == HEAD_ID {
        state
            .beacon_api
            .resolve_head_root(&Deadline::after(HEAD_RESOLUTION_TIMEOUT))
            .await
            .map_err(Error::HeadUnresolved)?
    } else {
        slot_or_hash
    };

    let response = state
        .upstream
        .forward(
            Method::GET,
            &format!("/v1/slot/{block_id}"),
            query.as_deref(),
            &headers,
            Bytes::new(),
        )
        .await?;

    Ok(response.into_response())
}

/// `GET /metrics`
async fn metrics() -> Result<String, Error> {
    let mut buffer = String::new();

    TextEncoder::new()
        .encode_utf8(prometheus::gather().as_slice(), &mut buffer)
        .map_err(Error::Metrics)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use core::{future::IntoFuture as _, net::SocketAddr};

    use anyhow::Result;
    use axum::http::StatusCode;
    use httpmock::{Method as MockMethod, MockServer};
    use reqwest::Client;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use super::*;

    struct Servers {
        upstream: MockServer,
        beacon_node: MockServer,
    }

    impl Servers {
        fn start() -> Self {
            Self {
                upstream: MockServer::start(),
                beacon_node: MockServer::start(),
            }
        }

        fn state(&self, cache: Arc<LastAttestCache>) -> Result<ProxyState> {
            let upstream = Upstream::new(Client::new(), self.upstream.url("/api").parse()?);
            let beacon_api = BeaconApi::new(Client::new(), self.beacon_node.url("/").parse()?, None);

            Ok(ProxyState {
                upstream: Arc::new(upstream),
                beacon_api: Arc::new(beacon_api),
                cache,
                metrics: None,
            })
        }
    }

    async fn serve(state: ProxyState) -> Result<String> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let address = listener.local_addr()?;

        tokio::spawn(axum::serve(listener, router(state)).into_future());

        Ok(format!("http://{address}"))
    }

    #[tokio::test]
    async fn validator_response_is_mapped_and_decorated() -> Result<()> {
        let servers = Servers::start();
        let cache = Arc::new(LastAttestCache::new());

        cache.set_if_greater(42, 1234);

        let upstream_mock = servers.upstream.mock(|when, then| {
            when.method(MockMethod::POST)
                .path("/api/v1/validator")
                .query_param("limit", "2")
                .header("accept", "application/json")
                .json_body(json!({ "indicesOrPubkey": "42,17" }));
            then.status(200).json_body(json!({
                "status": "OK",
                "data": [
                    { "validatorindex": 42, "status": "active_ongoing", "slashed": false },
                    { "validatorindex": "17", "status": "withdrawal_done", "slashed": true },
                ],
            }));
        });

        let base_url = serve(servers.state(cache)?).await?;

        let response = Client::new()
            .post(format!("{base_url}/api/v1/validator?limit=2"))
            .header("accept", "text/html")
            .json(&json!({ "indicesOrPubkey": "42,17" }))
            .send()
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").map(|value| value.as_bytes()),
            Some(b"application/json".as_slice()),
        );

        assert_eq!(
            response.json::<Value>().await?,
            json!({
                "status": "OK",
                "data": [
                    {
                        "validatorindex": 42,
                        "status": "active_online",
                        "slashed": false,
                        "lastattestationslot": 1234,
                    },
                    {
                        "validatorindex": "17",
                        "status": "slashed",
                        "slashed": true,
                        "lastattestationslot": 0,
                    },
                ],
            }),
        );

        upstream_mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn metrics_are_served_only_when_enabled() -> Result<()> {
        let servers = Servers::start();

        let disabled_url = serve(servers.state(Arc::new(LastAttestCache::new()))?).await?;

        let response = Client::new().get(format!("{disabled_url}/metrics")).send().await?;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let enabled_state = ProxyState {
            metrics: Some(Arc::new(Metrics::new()?)),
            ..servers.state(Arc::new(LastAttestCache::new()))?
        };

        let enabled_url = serve(enabled_state).await?;

        let response = Client::new().get(format!("{enabled_url}/metrics")).send().await?;

        assert_eq!(response.status(), StatusCode::OK);

        Ok(())
    }

    #[tokio::test]
    async fn latest_epoch_passes_status_and_body_through() -> Result<()> {
        let servers = Servers::start();

        servers.upstream.mock(|when, then| {
            when.method(MockMethod::GET).path("/api/v1/epoch/latest");
            then.status(503)
                .header("x-upstream", "dora")
                .body("maintenance");
        });

        let base_url = serve(servers.state(Arc::default())?).await?;

        let response = Client::new()
            .get(format!("{base_url}/api/v1/epoch/latest"))
            .send()
            .await?;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("x-upstream").map(|value| value.as_bytes()),
            Some(b"dora".as_slice()),
        );
        assert_eq!(response.text().await?, "maintenance");

        Ok(())
    }

    #[tokio::test]
    async fn slot_head_is_resolved_to_block_root() -> Result<()> {
        let servers = Servers::start();

        servers.beacon_node.mock(|when, then| {
            when.path("/eth/v1/beacon/headers/head");
            then.status(200).json_body(json!({
                "data": { "root": "0xabcd", "header": { "message": { "slot": "99" } } },
            }));
        });

        let upstream_mock = servers.upstream.mock(|when, then| {
            when.method(MockMethod::GET).path("/api/v1/slot/0xabcd");
            then.status(200)
                .json_body(json!({ "status": "OK", "data": { "slot": 99 } }));
        });

        let base_url = serve(servers.state(Arc::default())?).await?;

        let response = Client::new()
            .get(format!("{base_url}/api/v1/slot/head"))
            .send()
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.json::<Value>().await?,
            json!({ "status": "OK", "data": { "slot": 99 } }),
        );

        upstream_mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn slot_by_number_is_forwarded_as_is() -> Result<()> {
        let servers = Servers::start();

        let upstream_mock = servers.upstream.mock(|when, then| {
            when.path("/api/v1/slot/12345");
            then.status(200).json_body(json!({ "status": "OK" }));
        });

        let base_url = serve(servers.state(Arc::default())?).await?;

        let response = Client::new()
            .get(format!("{base_url}/api/v1/slot/12345"))
            .send()
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        upstream_mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn unresolvable_head_is_a_bad_gateway() -> Result<()> {
        let servers = Servers::start();

        servers.beacon_node.mock(|when, then| {
            when.path_contains("/head");
            then.status(500);
        });

        let base_url = serve(servers.state(Arc::default())?).await?;

        let response = Client::new()
            .get(format!("{base_url}/api/v1/slot/head"))
            .send()
            .await?;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.json::<Value>().await?,
            json!({ "status": "ERROR: failed to resolve head" }),
        );

        Ok(())
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_bad_gateway() -> Result<()> {
        let servers = Servers::start();

        // Nothing listens on a port that was just released.
        let closed_port = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await?
            .local_addr()?
            .port();

        let state = ProxyState {
            upstream: Arc::new(Upstream::new(
                Client::new(),
                format!("http://127.0.0.1:{closed_port}/api").parse()?,
            )),
            ..servers.state(Arc::default())?
        };

        let base_url = serve(state).await?;

        let response = Client::new()
            .get(format!("{base_url}/api/v1/epoch/latest"))
            .send()
            .await?;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.json::<Value>().await?,
            json!({ "status": "ERROR: upstream unreachable" }),
        );

        Ok(())
    }
}
