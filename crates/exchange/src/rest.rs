use anyhow::Result;
use ethers::signers::{LocalWallet, Signer};
use governor::clock::DefaultClock;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::signing::{sign_order_request, signature_to_hex};

/// Rate-limited HTTP transport to the Hyperliquid `/info` and `/exchange`
/// endpoints. 1200 requests/minute is the documented account-level cap;
/// 20/s keeps comfortably under it without a burst allowance that could
/// trip the exchange's own limiter during a dispatch retry.
pub struct HyperliquidRest {
    http: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl HyperliquidRest {
    /// # Panics
    /// Panics if the rate limiter quota cannot be constructed (never, for a
    /// fixed non-zero quota).
    #[must_use]
    pub fn new(base_url: String) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(20).unwrap());
        Self {
            http: Client::new(),
            base_url,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// # Errors
    /// Returns an error if the request fails or the body is not valid JSON.
    pub async fn get(&self, endpoint: &str) -> Result<Value> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.http.get(&url).send().await?;
        Ok(response.json().await?)
    }

    /// # Errors
    /// Returns an error if the request fails or the body is not valid JSON.
    pub async fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.http.post(&url).json(&body).send().await?;
        Ok(response.json().await?)
    }

    /// # Errors
    /// Returns an error if the `/info` request fails.
    pub async fn info(&self, body: Value) -> Result<Value> {
        self.post("/info", body).await
    }

    /// Signs `action` with the API wallet and posts it to `/exchange`.
    ///
    /// # Errors
    /// Returns an error if signing or the HTTP round trip fails.
    pub async fn exchange(&self, wallet: &LocalWallet, action: Value) -> Result<Value> {
        let nonce = now_millis();
        let signature = sign_order_request(wallet, &action, nonce).await?;
        let payload = json!({
            "action": action,
            "nonce": nonce,
            "signature": {
                "r": format!("0x{:x}", signature.r),
                "s": format!("0x{:x}", signature.s),
                "v": signature.v,
            },
            "vaultAddress": Value::Null,
        });
        let _ = signature_to_hex(&signature);
        self.post("/exchange", payload).await
    }

    #[must_use]
    pub fn wallet_address(wallet: &LocalWallet) -> String {
        format!("{:#x}", wallet.address())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}
