use core::{net::SocketAddr, time::Duration};

use reqwest::Url;

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub listen_address: SocketAddr,
    /// Explorer API base URL, `/api` included.
    pub upstream_url: Url,
    pub consensus_api_url: Url,
    pub request_timeout: Duration,
    pub backfill_timeout: Duration,
    pub backfill_workers: usize,
    pub backfill_enabled: bool,
    pub metrics_enabled: bool,
}
