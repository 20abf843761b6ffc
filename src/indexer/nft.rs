use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use anyhow::Result;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::abi;
use crate::config::NftSettings;
use crate::db::models::{NftToken, TokenType};
use crate::db::storage::Storage;
use crate::eth_rpc::ChainRpc;

#[derive(Debug, Clone)]
pub struct NftWorkItem {
    pub contract: String,
    /// Decimal token id.
    pub token_id: String,
    pub token_type: TokenType,
}

/// Producer handle. Enqueue is synchronous fire-and-forget: the channel is
/// unbounded, so block ingestion never waits on the metadata consumer.
#[derive(Debug, Clone)]
pub struct NftQueue {
    tx: mpsc::UnboundedSender<NftWorkItem>,
}

impl NftQueue {
    pub fn enqueue(&self, item: NftWorkItem) {
        if self.tx.send(item).is_err() {
            debug!("nft metadata consumer is gone, dropping item");
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Background consumer that resolves token metadata one item at a time,
/// rate-limited so third-party gateways never see bursts.
pub struct NftPipeline {
    storage: Arc<dyn Storage>,
    rpc: Arc<dyn ChainRpc>,
    http: reqwest::Client,
    gateway: String,
    item_delay: Duration,
}

impl NftPipeline {
    pub fn new(storage: Arc<dyn Storage>, rpc: Arc<dyn ChainRpc>, settings: &NftSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            storage,
            rpc,
            http,
            gateway: settings.ipfs_gateway.clone(),
            item_delay: Duration::from_millis(settings.item_delay_ms),
        }
    }

    pub fn spawn(self) -> (NftQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx));
        (NftQueue { tx }, handle)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<NftWorkItem>) {
        debug!("nft metadata consumer started");
        while let Some(item) = rx.recv().await {
            tokio::time::sleep(self.item_delay).await;
            if let Err(e) = self.process_item(&item).await {
                warn!(
                    "failed to persist nft {}/{}: {:#}",
                    item.contract, item.token_id, e
                );
            }
        }
        debug!("nft metadata consumer stopped");
    }

    /// Resolve and persist one token's metadata. Every upstream read is
    /// best-effort; a record is written even on total failure so the item is
    /// not retried forever.
    async fn process_item(&self, item: &NftWorkItem) -> Result<()> {
        let metadata_uri = self.fetch_token_uri(item).await;

        let owner = if item.token_type == TokenType::Erc721 {
            self.fetch_owner(item).await
        } else {
            None
        };

        let mut nft = NftToken {
            contract_address: item.contract.to_lowercase(),
            token_id: item.token_id.clone(),
            owner,
            name: None,
            description: None,
            image_url: None,
            attributes: None,
            metadata_uri: metadata_uri.clone(),
        };

        if let Some(uri) = &metadata_uri {
            if let Some(metadata) = self.fetch_metadata(uri).await {
                nft.name = metadata.name;
                nft.description = metadata.description;
                nft.image_url = metadata
                    .image
                    .map(|image| resolve_display_url(&image, &self.gateway));
                nft.attributes = metadata.attributes;
            } else {
                debug!("no metadata resolved from {}", uri);
            }
        }

        self.storage.upsert_nft(&nft).await
    }

    async fn fetch_token_uri(&self, item: &NftWorkItem) -> Option<String> {
        let id = U256::from_str_radix(&item.token_id, 10).ok()?;
        let selector = match item.token_type {
            TokenType::Erc1155 => abi::SEL_URI,
            _ => abi::SEL_TOKEN_URI,
        };
        let data = abi::call_data(selector, &[abi::encode_u256(id)]);
        let result = self.rpc.call(&item.contract, &data).await.ok()?;
        let uri = abi::decode_string(&result)?;
        Some(substitute_id(&uri, id))
    }

    async fn fetch_owner(&self, item: &NftWorkItem) -> Option<String> {
        let id = U256::from_str_radix(&item.token_id, 10).ok()?;
        let data = abi::call_data(abi::SEL_OWNER_OF, &[abi::encode_u256(id)]);
        let result = self.rpc.call(&item.contract, &data).await.ok()?;
        abi::decode_address(&result)
    }

    async fn fetch_metadata(&self, uri: &str) -> Option<NftMetadata> {
        match resolve_uri(uri, &self.gateway) {
            ResolvedUri::Inline(json) => serde_json::from_str(&json).ok(),
            ResolvedUri::Http(url) => {
                let response = self.http.get(&url).send().await.ok()?;
                response.json().await.ok()
            }
            ResolvedUri::Unsupported => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct NftMetadata {
    name: Option<String>,
    description: Option<String>,
    image: Option<String>,
    attributes: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedUri {
    /// Fetch over HTTP(S).
    Http(String),
    /// Inline JSON payload from a data: URI.
    Inline(String),
    Unsupported,
}

pub fn resolve_uri(uri: &str, gateway: &str) -> ResolvedUri {
    if let Some(path) = uri.strip_prefix("ipfs://") {
        let path = path.strip_prefix("ipfs/").unwrap_or(path);
        return ResolvedUri::Http(format!("{}/{}", gateway.trim_end_matches('/'), path));
    }
    if let Some(payload) = uri.strip_prefix("data:application/json;base64,") {
        return match base64::decode(payload).ok().and_then(|b| String::from_utf8(b).ok()) {
            Some(json) => ResolvedUri::Inline(json),
            None => ResolvedUri::Unsupported,
        };
    }
    if let Some(payload) = uri.strip_prefix("data:application/json,") {
        return ResolvedUri::Inline(payload.to_string());
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return match Url::parse(uri) {
            Ok(url) => ResolvedUri::Http(url.to_string()),
            Err(_) => ResolvedUri::Unsupported,
        };
    }
    ResolvedUri::Unsupported
}

/// Rewrite an image URI into something a browser can load; non-ipfs URIs are
/// kept as-is.
pub fn resolve_display_url(uri: &str, gateway: &str) -> String {
    if let Some(path) = uri.strip_prefix("ipfs://") {
        let path = path.strip_prefix("ipfs/").unwrap_or(path);
        return format!("{}/{}", gateway.trim_end_matches('/'), path);
    }
    uri.to_string()
}

/// ERC-1155 metadata URIs may carry a literal "{id}" to be replaced with the
/// 64-digit zero-padded lowercase hex id.
fn substitute_id(uri: &str, id: U256) -> String {
    if uri.contains("{id}") {
        uri.replace("{id}", &format!("{:0>64}", format!("{id:x}")))
    } else {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi;
    use crate::indexer::test_support::{MockRpc, MockStorage};
    use std::time::Instant;

    const GATEWAY: &str = "https://ipfs.io/ipfs/";
    const CONTRACT: &str = "0xc0ffee0000000000000000000000000000000001";

    fn settings(item_delay_ms: u64) -> NftSettings {
        NftSettings {
            ipfs_gateway: GATEWAY.to_string(),
            item_delay_ms,
            http_timeout_secs: 1,
        }
    }

    fn abi_string(s: &str) -> String {
        let bytes = s.as_bytes();
        let mut padded = bytes.to_vec();
        while padded.len() % 32 != 0 {
            padded.push(0);
        }
        format!("0x{:064x}{:064x}{}", 32, bytes.len(), hex::encode(padded))
    }

    #[tokio::test]
    async fn enqueue_never_blocks_ingestion() {
        let storage = Arc::new(MockStorage::default());
        let rpc = Arc::new(MockRpc::new(1));
        // artificially slow consumer
        let pipeline = NftPipeline::new(storage.clone(), rpc, &settings(5_000));
        let (queue, _consumer) = pipeline.spawn();

        let started = Instant::now();
        for token_id in 0..100 {
            queue.enqueue(NftWorkItem {
                contract: CONTRACT.to_string(),
                token_id: token_id.to_string(),
                token_type: TokenType::Erc721,
            });
        }
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(storage.state().nfts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_persists_placeholder_on_total_failure() {
        let storage = Arc::new(MockStorage::default());
        // every eth_call returns empty, so no uri and no owner resolve
        let rpc = Arc::new(MockRpc::new(1));
        let pipeline = NftPipeline::new(storage.clone(), rpc, &settings(10));
        let (queue, _consumer) = pipeline.spawn();

        queue.enqueue(NftWorkItem {
            contract: CONTRACT.to_string(),
            token_id: "7".to_string(),
            token_type: TokenType::Erc721,
        });

        for _ in 0..200 {
            if !storage.state().nfts.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let state = storage.state();
        let nft = state
            .nfts
            .get(&(CONTRACT.to_string(), "7".to_string()))
            .expect("placeholder row must exist");
        assert!(nft.name.is_none());
        assert!(nft.image_url.is_none());
        assert!(nft.metadata_uri.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_resolves_inline_metadata() {
        let storage = Arc::new(MockStorage::default());
        let rpc = Arc::new(MockRpc::new(1));

        let metadata = r#"{"name":"Punk #7","image":"ipfs://QmImg"}"#;
        let uri = format!("data:application/json;base64,{}", base64::encode(metadata));
        let call = abi::call_data(
            abi::SEL_TOKEN_URI,
            &[abi::encode_u256(U256::from(7u64))],
        );
        rpc.set_call_result(CONTRACT, &call, &abi_string(&uri));

        let pipeline = NftPipeline::new(storage.clone(), rpc, &settings(1));
        let (queue, _consumer) = pipeline.spawn();
        queue.enqueue(NftWorkItem {
            contract: CONTRACT.to_string(),
            token_id: "7".to_string(),
            token_type: TokenType::Erc721,
        });

        for _ in 0..200 {
            if !storage.state().nfts.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let state = storage.state();
        let nft = state
            .nfts
            .get(&(CONTRACT.to_string(), "7".to_string()))
            .expect("nft row must exist");
        assert_eq!(nft.name.as_deref(), Some("Punk #7"));
        assert_eq!(nft.image_url.as_deref(), Some("https://ipfs.io/ipfs/QmImg"));
        assert_eq!(nft.metadata_uri.as_deref(), Some(uri.as_str()));
    }

    #[test]
    fn resolves_ipfs_uris_through_gateway() {
        assert_eq!(
            resolve_uri("ipfs://QmHash/1.json", GATEWAY),
            ResolvedUri::Http("https://ipfs.io/ipfs/QmHash/1.json".to_string())
        );
        // some contracts emit ipfs://ipfs/<hash>
        assert_eq!(
            resolve_uri("ipfs://ipfs/QmHash", GATEWAY),
            ResolvedUri::Http("https://ipfs.io/ipfs/QmHash".to_string())
        );
    }

    #[test]
    fn resolves_inline_base64_json() {
        let payload = base64::encode(r#"{"name":"Piece #1"}"#);
        let uri = format!("data:application/json;base64,{payload}");
        match resolve_uri(&uri, GATEWAY) {
            ResolvedUri::Inline(json) => assert!(json.contains("Piece #1")),
            other => panic!("expected inline, got {other:?}"),
        }

        assert_eq!(
            resolve_uri("data:application/json;base64,%%%", GATEWAY),
            ResolvedUri::Unsupported
        );
    }

    #[test]
    fn resolves_http_and_rejects_the_rest() {
        assert!(matches!(
            resolve_uri("https://example.com/meta/1", GATEWAY),
            ResolvedUri::Http(_)
        ));
        assert_eq!(resolve_uri("ftp://example.com/x", GATEWAY), ResolvedUri::Unsupported);
        assert_eq!(resolve_uri("", GATEWAY), ResolvedUri::Unsupported);
    }

    #[test]
    fn substitutes_erc1155_id_placeholder() {
        let uri = substitute_id("https://example.com/{id}.json", U256::from(10u64));
        assert_eq!(
            uri,
            format!("https://example.com/{:064x}.json", 10)
        );
        assert_eq!(
            substitute_id("https://example.com/fixed.json", U256::from(10u64)),
            "https://example.com/fixed.json"
        );
    }

    #[test]
    fn display_url_keeps_non_ipfs_uris() {
        assert_eq!(
            resolve_display_url("ipfs://QmImg", GATEWAY),
            "https://ipfs.io/ipfs/QmImg"
        );
        assert_eq!(
            resolve_display_url("https://cdn.example.com/1.png", GATEWAY),
            "https://cdn.example.com/1.png"
        );
    }
}
