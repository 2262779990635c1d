//! The apex API: a privileged HTTP service exposing buy/sell/transfer/status/notify. The
//! service itself lives outside this crate; what lives here is a trait so the dispatcher,
//! capital-flow engine, and proxy routes depend on `Arc<dyn ApexClient>` rather than a
//! concrete HTTP type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

pub const STATUS_TIMEOUT: Duration = Duration::from_secs(15);
pub const BUY_TRANSFER_TIMEOUT: Duration = Duration::from_secs(90);
pub const SELL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHolding {
    pub mint: String,
    pub ui_amount: f64,
    pub usd_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHoldings {
    pub sol_balance: f64,
    pub tokens: Vec<TokenHolding>,
}

impl WorkerHoldings {
    pub fn has_tokens_raw(&self) -> bool {
        self.tokens.iter().any(|t| t.ui_amount > 0.0)
    }

    /// `None` if any token's pricing is unavailable — callers must treat this as "pricing
    /// failed", not as zero.
    pub fn total_usd_value(&self) -> Option<f64> {
        self.tokens
            .iter()
            .filter(|t| t.ui_amount > 0.0)
            .map(|t| t.usd_value)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyRequest {
    pub worker: String,
    pub mint: String,
    pub amount_sol: f64,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellRequest {
    pub worker: String,
    pub mint: String,
    pub percent: f64,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellResult {
    pub success: bool,
    pub percent_sold: f64,
    pub tx_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTokenRequest {
    pub worker: String,
    pub mint: String,
    pub percent: f64,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSolRequest {
    pub from_worker: String,
    pub to_worker: String,
    pub amount_sol: f64,
}

/// Abstracts the privileged local backend. The capital-flow engine and the proxy routes depend
/// on this trait, never on a concrete client, so tests can substitute an in-memory fake.
#[async_trait]
pub trait ApexClient: Send + Sync {
    async fn status(&self, worker: &str) -> Result<WorkerHoldings>;
    async fn buy(&self, req: &BuyRequest) -> Result<serde_json::Value>;
    async fn sell(&self, req: &SellRequest) -> Result<SellResult>;
    async fn transfer_token(&self, req: &TransferTokenRequest) -> Result<serde_json::Value>;
    async fn transfer_sol(&self, req: &TransferSolRequest) -> Result<serde_json::Value>;

    /// Thin read-proxy for the apex sub-resources "acknowledged but not re-specified"
    /// (transactions, positions, feed reads): forwards a GET verbatim and returns the JSON body.
    async fn read_proxy(&self, path: &str) -> Result<serde_json::Value>;
}

/// `reqwest`-backed implementation. Every call uses a class-appropriate timeout.
pub struct HttpApexClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpApexClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Turns a non-2xx response into `Error::Apex { status, body }` so callers can pass the upstream
/// status code and body through verbatim rather than collapsing it into a transport error.
async fn ok_or_apex_error(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(crate::error::Error::apex_status(status, body))
}

#[async_trait]
impl ApexClient for HttpApexClient {
    async fn status(&self, worker: &str) -> Result<WorkerHoldings> {
        let resp = self
            .http
            .get(self.url(&format!("/status/{worker}")))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;
        let resp = ok_or_apex_error(resp).await?;
        Ok(resp.json::<WorkerHoldings>().await?)
    }

    async fn buy(&self, req: &BuyRequest) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.url("/buy"))
            .timeout(BUY_TRANSFER_TIMEOUT)
            .json(req)
            .send()
            .await?;
        let resp = ok_or_apex_error(resp).await?;
        Ok(resp.json().await?)
    }

    async fn sell(&self, req: &SellRequest) -> Result<SellResult> {
        let resp = self
            .http
            .post(self.url("/sell"))
            .timeout(SELL_TIMEOUT)
            .json(req)
            .send()
            .await?;
        let resp = ok_or_apex_error(resp).await?;
        Ok(resp.json::<SellResult>().await?)
    }

    async fn transfer_token(&self, req: &TransferTokenRequest) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.url("/transfer"))
            .timeout(BUY_TRANSFER_TIMEOUT)
            .json(req)
            .send()
            .await?;
        let resp = ok_or_apex_error(resp).await?;
        Ok(resp.json().await?)
    }

    async fn transfer_sol(&self, req: &TransferSolRequest) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.url("/transfer-sol"))
            .timeout(BUY_TRANSFER_TIMEOUT)
            .json(req)
            .send()
            .await?;
        let resp = ok_or_apex_error(resp).await?;
        Ok(resp.json().await?)
    }

    async fn read_proxy(&self, path: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(self.url(path))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;
        let resp = ok_or_apex_error(resp).await?;
        Ok(resp.json().await?)
    }
}
