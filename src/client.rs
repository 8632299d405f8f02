use crate::config::MinerConfig;
use crate::policy::Action;
use crate::retry::{retry, Backoff};
use crate::snapshot::{
    ContractError, DigSnapshot, Document, MinerSnapshot, Snapshots, SpeedSnapshot,
    StatusSnapshot,
};
use reqwest::Client;
use std::net::Ipv6Addr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const CONNECT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            ClientError::Status { .. } | ClientError::Contract(_) => false,
        }
    }
}

#[derive(Debug, Error)]
#[error("fetching {document}: {source}")]
pub struct RefreshError {
    pub document: Document,
    #[source]
    pub source: ClientError,
}

#[derive(Debug, Clone)]
pub struct BobcatClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    backoff: Backoff,
}

impl BobcatClient {
    pub fn new(cfg: &MinerConfig) -> Self {
        let http = Client::builder()
            .user_agent(concat!("bobcatd/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url_for(&cfg.ip_address),
            username: cfg.username.clone(),
            password: cfg.resolve_password(),
            backoff: Backoff::from(&cfg.retry),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn can_connect(&self) -> bool {
        match self
            .http
            .get(&self.base_url)
            .timeout(CONNECT_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                debug!(url = %self.base_url, error = %err, "miner connectivity check failed");
                false
            }
        }
    }

    pub async fn refresh_status(&self) -> Result<StatusSnapshot, ClientError> {
        let body = self.get_text(Document::Status).await?;
        Ok(StatusSnapshot::from_json(&body)?)
    }

    pub async fn refresh_miner(&self) -> Result<MinerSnapshot, ClientError> {
        let body = self.get_text(Document::Miner).await?;
        Ok(MinerSnapshot::from_json(&body)?)
    }

    pub async fn refresh_speed(&self) -> Result<SpeedSnapshot, ClientError> {
        let body = self.get_text(Document::Speed).await?;
        Ok(SpeedSnapshot::from_json(&body)?)
    }

    pub async fn refresh_dig(&self) -> Result<DigSnapshot, ClientError> {
        let body = self.get_text(Document::Dig).await?;
        Ok(DigSnapshot::from_json(&body)?)
    }

    // Fetches all four documents in order. The DNS diagnostics are optional:
    // a failure there is logged and leaves `dig` empty.
    pub async fn refresh(&self) -> Result<Snapshots, RefreshError> {
        let status = self.refresh_status().await.map_err(|source| RefreshError {
            document: Document::Status,
            source,
        })?;
        let miner = self.refresh_miner().await.map_err(|source| RefreshError {
            document: Document::Miner,
            source,
        })?;
        let speed = self.refresh_speed().await.map_err(|source| RefreshError {
            document: Document::Speed,
            source,
        })?;
        let dig = match self.refresh_dig().await {
            Ok(dig) => Some(dig),
            Err(err) => {
                warn!(error = %err, "dig.json unavailable");
                None
            }
        };

        Ok(Snapshots {
            status,
            miner,
            speed,
            dig,
        })
    }

    pub async fn perform(&self, action: Action) -> Result<(), ClientError> {
        let url = format!("{}{}", self.base_url, action.path());
        let (http, url_ref) = (&self.http, &url);
        let (username, password) = (&self.username, &self.password);

        retry(&self.backoff, &url, ClientError::is_transient, || async move {
            let resp = http
                .post(url_ref)
                .basic_auth(username, Some(password))
                .send()
                .await
                .map_err(|source| ClientError::Transport {
                    url: url_ref.clone(),
                    source,
                })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ClientError::Status {
                    url: url_ref.clone(),
                    status: status.as_u16(),
                });
            }
            Ok(())
        })
        .await?;

        info!(%action, url = %url, "admin action accepted");
        Ok(())
    }

    async fn get_text(&self, document: Document) -> Result<String, ClientError> {
        let url = format!("{}{}", self.base_url, document.path());
        let (http, url_ref) = (&self.http, &url);

        retry(&self.backoff, &url, ClientError::is_transient, || async move {
            let transport = |source: reqwest::Error| ClientError::Transport {
                url: url_ref.clone(),
                source,
            };
            let resp = http.get(url_ref).send().await.map_err(transport)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ClientError::Status {
                    url: url_ref.clone(),
                    status: status.as_u16(),
                });
            }
            resp.text().await.map_err(transport)
        })
        .await
    }
}

fn base_url_for(host: &str) -> String {
    let host = host.trim();
    match host.parse::<Ipv6Addr>() {
        Ok(v6) => format!("http://[{v6}]"),
        Err(_) => format!("http://{host}"),
    }
}


#[cfg(test)]
mod tests {
    use super::fake_miner::{FakeMiner, Post};
    use super::*;
    use crate::config::test_config;
    use axum::http::StatusCode;

    fn client_for(miner: &FakeMiner) -> BobcatClient {
        BobcatClient::new(&test_config(&miner.addr.to_string()).miner)
    }

    #[tokio::test]
    async fn refresh_decodes_all_documents() {
        let miner = FakeMiner::spawn().await;
        let client = client_for(&miner);

        assert!(client.can_connect().await);
        let snaps = client.refresh().await.unwrap();
        assert_eq!(snaps.status.status, "Synced");
        assert_eq!(snaps.miner.temp0, 38);
        assert_eq!(snaps.speed.download_speed, 94);
        assert!(snaps.dig.is_some());
    }

    #[tokio::test]
    async fn missing_dig_is_tolerated() {
        let miner = FakeMiner::spawn().await;
        miner.set("/dig.json", StatusCode::NOT_FOUND, "");
        let snaps = client_for(&miner).refresh().await.unwrap();
        assert!(snaps.dig.is_none());
    }

    #[tokio::test]
    async fn malformed_document_is_a_contract_error() {
        let miner = FakeMiner::spawn().await;
        miner.set(
            "/status.json",
            StatusCode::OK,
            r#"{"status":"Synced","gap":"unknown","miner_height":"1","blockchain_height":"1","epoch":"1"}"#,
        );
        let err = client_for(&miner).refresh().await.unwrap_err();
        assert_eq!(err.document, Document::Status);
        assert!(matches!(err.source, ClientError::Contract(_)));
        assert!(!err.source.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let miner = FakeMiner::spawn().await;
        miner.set("/miner.json", StatusCode::INTERNAL_SERVER_ERROR, "busy");
        let err = client_for(&miner).refresh_miner().await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn admin_actions_use_basic_auth() {
        let miner = FakeMiner::spawn().await;
        let client = client_for(&miner);
        client.perform(Action::Fastsync).await.unwrap();
        client.perform(Action::Reboot).await.unwrap();

        assert_eq!(
            miner.posts(),
            vec![
                Post {
                    path: "/admin/fastsync".to_string(),
                    authorization: Some("Basic Ym9iY2F0OnNlY3JldA==".to_string()),
                },
                Post {
                    path: "/admin/reboot".to_string(),
                    authorization: Some("Basic Ym9iY2F0OnNlY3JldA==".to_string()),
                },
            ]
        );
    }

    #[test]
    fn base_url_brackets_ipv6_hosts() {
        assert_eq!(base_url_for(" 192.168.0.8 "), "http://192.168.0.8");
        assert_eq!(base_url_for("127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(base_url_for("fe80::1"), "http://[fe80::1]");
        assert_eq!(base_url_for("::1"), "http://[::1]");
        assert!(reqwest::Url::parse(&format!("{}/status.json", base_url_for("fe80::1"))).is_ok());
    }

    #[tokio::test]
    async fn unreachable_miner_exhausts_retries() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = BobcatClient::new(&test_config(&addr.to_string()).miner);
        assert!(!client.can_connect().await);
        let err = client.refresh_status().await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
