//! Signed REST client for USDⓈ-M futures.
//!
//! Every call is authenticated the same way: the parameters go into the query
//! string together with `recvWindow` and `timestamp`, the query is signed with
//! the user's secret, and the API key travels in the `X-MBX-APIKEY` header.
//! Nothing is retried here; a failed call is reported to the caller once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::TradeError;
use crate::models::{AccountSnapshot, Credentials, OrderAck, OrderRequest};
use crate::trading::ExecutorConfig;

use super::signer::{signed_query, Params};
use super::types::{AccountResponse, ExchangeErrorBody};
use super::ExchangeGateway;

pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// "No need to change margin type."
const MARGIN_TYPE_UNCHANGED: i64 = -4046;

/// Longest slice of an unparseable error body kept in a transport error.
const MAX_ERROR_BODY: usize = 256;

/// Live futures REST transport.
pub struct FuturesClient {
    http: Client,
    base_url: String,
    recv_window_ms: u64,
}

impl FuturesClient {
    pub fn new(config: &ExecutorConfig) -> Result<Self, TradeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TradeError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
        })
    }

    /// Sign `params` with the user's secret and send them to `path`.
    pub async fn signed_call<T: DeserializeOwned>(
        &self,
        creds: &Credentials,
        method: Method,
        path: &str,
        mut params: Params,
    ) -> Result<T, TradeError> {
        params.push("recvWindow", self.recv_window_ms);
        let query = signed_query(params, &creds.api_secret);
        let url = format!("{}{}?{}", self.base_url, path, query);

        debug!(method = %method, path = %path, key = %creds.masked_key(), "Signed request");

        let response = self
            .http
            .request(method, &url)
            .header(API_KEY_HEADER, &creds.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ExchangeErrorBody>(&body) {
                Ok(err) => TradeError::ExchangeRequest {
                    status: status.as_u16(),
                    code: err.code,
                    message: err.msg,
                },
                Err(_) => TradeError::Transport(format!("HTTP {}: {}", status.as_u16(), truncate(&body))),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| TradeError::Transport(format!("unexpected response from {}: {}", path, e)))
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl ExchangeGateway for FuturesClient {
    async fn account(&self, creds: &Credentials) -> Result<AccountSnapshot, TradeError> {
        let resp: AccountResponse = self
            .signed_call(creds, Method::GET, "/fapi/v2/account", Params::new())
            .await?;
        Ok(resp.into())
    }

    async fn set_isolated_margin(&self, creds: &Credentials, symbol: &str) -> Result<(), TradeError> {
        let params = Params::new().with("symbol", symbol).with("marginType", "ISOLATED");

        match self
            .signed_call::<serde_json::Value>(creds, Method::POST, "/fapi/v1/marginType", params)
            .await
        {
            Ok(_) => {
                info!(symbol = %symbol, "Margin type set to ISOLATED");
                Ok(())
            }
            Err(e) if e.exchange_code() == Some(MARGIN_TYPE_UNCHANGED) => {
                debug!(symbol = %symbol, "Margin type already ISOLATED");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn set_leverage(&self, creds: &Credentials, symbol: &str, leverage: u32) -> Result<(), TradeError> {
        let params = Params::new().with("symbol", symbol).with("leverage", leverage);
        self.signed_call::<serde_json::Value>(creds, Method::POST, "/fapi/v1/leverage", params)
            .await?;
        Ok(())
    }

    async fn place_order(&self, creds: &Credentials, order: &OrderRequest) -> Result<OrderAck, TradeError> {
        self.signed_call(creds, Method::POST, "/fapi/v1/order", order.to_params())
            .await
    }

    async fn cancel_all_orders(&self, creds: &Credentials, symbol: &str) -> Result<(), TradeError> {
        let params = Params::new().with("symbol", symbol);
        self.signed_call::<serde_json::Value>(creds, Method::DELETE, "/fapi/v1/allOpenOrders", params)
            .await?;
        Ok(())
    }
}
