/// HTTP client for Thor node communication
///
/// Talks to the node's REST API for the handful of endpoints fee estimation
/// needs. [`NodeApi`] is the seam the estimators are written against so they
/// can run over any node source.
use crate::api::types::{
    AccountState, BestBlock, BlockHeader, CallOutput, CallRequest, FeeHistory, PriorityFee,
};
use crate::blockchain::{parse_quantity, Address};
use crate::errors::{FeeError, FeeResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Header carrying the node software version.
pub const NODE_VERSION_HEADER: &str = "x-thorest-ver";

#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Best block header together with the reported node version.
    async fn best_block(&self) -> FeeResult<BestBlock>;

    /// Simulate clauses at `revision` (`best` or `next`).
    async fn inspect_clauses(
        &self,
        request: &CallRequest,
        revision: &str,
    ) -> FeeResult<Vec<CallOutput>>;

    async fn fee_history(
        &self,
        block_count: u32,
        newest_block: &str,
        reward_percentiles: &[u8],
    ) -> FeeResult<FeeHistory>;

    /// Suggested maximum priority fee per gas, in wei.
    async fn max_priority_fee(&self) -> FeeResult<u128>;

    async fn account(&self, address: &Address) -> FeeResult<AccountState>;
}

/// reqwest-backed [`NodeApi`] for a single node URL
#[derive(Debug, Clone)]
pub struct ThorClient {
    client: Client,
    base_url: String,
}

impl ThorClient {
    pub fn new(base_url: impl Into<String>) -> FeeResult<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> FeeResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            FeeError::NetworkError(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(ThorClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> FeeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {}", url);
        let response = self.client.get(&url).query(query).send().await?;
        Self::read_json(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> FeeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .query(query)
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> FeeResult<T> {
        let status = response.status();
        if !status.is_success() {
            // Thor reports failures as plain text
            let message = response.text().await.unwrap_or_default();
            return Err(FeeError::NodeError {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| FeeError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl NodeApi for ThorClient {
    async fn best_block(&self) -> FeeResult<BestBlock> {
        let url = format!("{}/blocks/best", self.base_url);
        log::debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        let node_version = response
            .headers()
            .get(NODE_VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let header: BlockHeader = Self::read_json(response).await?;
        Ok(BestBlock {
            header,
            node_version,
        })
    }

    async fn inspect_clauses(
        &self,
        request: &CallRequest,
        revision: &str,
    ) -> FeeResult<Vec<CallOutput>> {
        self.post_json(
            "/accounts/*",
            &[("revision", revision.to_string())],
            request,
        )
        .await
    }

    async fn fee_history(
        &self,
        block_count: u32,
        newest_block: &str,
        reward_percentiles: &[u8],
    ) -> FeeResult<FeeHistory> {
        let percentiles = reward_percentiles
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");

        self.get_json(
            "/fees/history",
            &[
                ("blockCount", block_count.to_string()),
                ("newestBlock", newest_block.to_string()),
                ("rewardPercentiles", percentiles),
            ],
        )
        .await
    }

    async fn max_priority_fee(&self) -> FeeResult<u128> {
        let response: PriorityFee = self.get_json("/fees/priority", &[]).await?;
        parse_quantity(&response.max_priority_fee_per_gas)
    }

    async fn account(&self, address: &Address) -> FeeResult<AccountState> {
        self.get_json(&format!("/accounts/{}", address), &[]).await
    }
}


#[cfg(test)]
mod integration_tests {
    use super::*;

    const TESTNET: &str = "https://testnet.vechain.org";

    #[tokio::test]
    #[ignore = "requires network access to a Thor testnet node"]
    async fn test_real_best_block() {
        let client = ThorClient::new(TESTNET).unwrap();
        let best = client.best_block().await.unwrap();
        assert!(best.header.number > 0);
        assert!(best.node_version.is_some());
    }

    #[tokio::test]
    #[ignore = "requires network access to a Thor testnet node"]
    async fn test_real_fee_endpoints() {
        let client = ThorClient::new(TESTNET).unwrap();
        let history = client.fee_history(8, "next", &[20, 40, 75]).await.unwrap();
        assert!(!history.base_fee_per_gas.is_empty());
        assert!(client.max_priority_fee().await.is_ok());
    }
}
