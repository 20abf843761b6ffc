use std::sync::Arc;

use alloy_primitives::U256;
use anyhow::Result;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::abi;
use crate::db::models::{Token, TokenHolder, TokenTransfer, TokenType, TransactionLog};
use crate::db::storage::Storage;
use crate::eth_rpc::{ChainRpc, RpcError};
use crate::indexer::nft::{NftQueue, NftWorkItem};
use crate::metrics::Metrics;

/// A log that matched one of the known transfer signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub token_type: TokenType,
    pub from: String,
    pub to: String,
    pub value: Option<U256>,
    pub token_id: Option<U256>,
}

/// Classify a log against the known transfer event signatures. ERC-20 and
/// ERC-721 share the Transfer topic hash and are disambiguated by topic
/// count.
pub fn decode_transfer(log: &TransactionLog) -> Option<DecodedTransfer> {
    let topic0 = log.topic0.as_deref()?;

    if topic0.eq_ignore_ascii_case(abi::TRANSFER_TOPIC) {
        return match log.topics.len() {
            3 => Some(DecodedTransfer {
                token_type: TokenType::Erc20,
                from: abi::topic_address(&log.topics[1])?,
                to: abi::topic_address(&log.topics[2])?,
                value: Some(abi::u256_word(&log.data, 0)?),
                token_id: None,
            }),
            4 => Some(DecodedTransfer {
                token_type: TokenType::Erc721,
                from: abi::topic_address(&log.topics[1])?,
                to: abi::topic_address(&log.topics[2])?,
                value: None,
                token_id: Some(abi::topic_u256(&log.topics[3])?),
            }),
            _ => None,
        };
    }

    if topic0.eq_ignore_ascii_case(abi::TRANSFER_SINGLE_TOPIC) && log.topics.len() == 4 {
        return Some(DecodedTransfer {
            token_type: TokenType::Erc1155,
            from: abi::topic_address(&log.topics[2])?,
            to: abi::topic_address(&log.topics[3])?,
            token_id: Some(abi::u256_word(&log.data, 0)?),
            value: Some(abi::u256_word(&log.data, 1)?),
        });
    }

    None
}

/// Extracts token transfers from logs, registers tokens lazily, and keeps
/// holder balances authoritative by re-reading chain state after every
/// touching transfer.
pub struct TokenProcessor {
    storage: Arc<dyn Storage>,
    rpc: Arc<dyn ChainRpc>,
    nft_queue: NftQueue,
    known_tokens: DashMap<String, ()>,
    metrics: Metrics,
}

impl TokenProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        rpc: Arc<dyn ChainRpc>,
        nft_queue: NftQueue,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            rpc,
            nft_queue,
            known_tokens: DashMap::new(),
            metrics,
        }
    }

    /// Process one persisted log. Non-transfer logs are a no-op; extraction
    /// failures for one log never block sibling logs (the caller skips on
    /// non-network errors).
    pub async fn process_log(&self, log: &TransactionLog) -> Result<()> {
        let Some(decoded) = decode_transfer(log) else {
            return Ok(());
        };

        let token_address = log.address.to_lowercase();
        let transfer = TokenTransfer {
            transaction_hash: log.transaction_hash.clone(),
            log_index: log.log_index,
            block_number: log.block_number,
            token_address: token_address.clone(),
            from_address: decoded.from.clone(),
            to_address: decoded.to.clone(),
            value: decoded.value.map(|v| v.to_string()),
            token_id: decoded.token_id.map(|id| id.to_string()),
            token_type: decoded.token_type.as_str().to_string(),
        };

        let inserted = self.storage.upsert_token_transfer(&transfer).await?;
        self.ensure_token(&token_address, decoded.token_type).await?;
        if inserted {
            self.storage
                .increment_token_transfer_count(&token_address)
                .await?;
            self.metrics.record_token_transfer();
        }

        for holder in [&transfer.from_address, &transfer.to_address] {
            if abi::is_zero_address(holder) {
                continue;
            }
            self.update_holder(
                &token_address,
                decoded.token_type,
                holder,
                transfer.token_id.as_deref(),
            )
            .await?;
        }

        if decoded.token_type.is_nft() {
            if let Some(token_id) = &transfer.token_id {
                self.nft_queue.enqueue(NftWorkItem {
                    contract: token_address,
                    token_id: token_id.clone(),
                    token_type: decoded.token_type,
                });
            }
        }

        Ok(())
    }

    /// Register the token on first sight. The in-process set is a pure cache;
    /// a miss falls through to a storage existence check so multiple
    /// instances never create duplicate rows.
    async fn ensure_token(&self, address: &str, token_type: TokenType) -> Result<()> {
        if self.known_tokens.contains_key(address) {
            return Ok(());
        }
        if self.storage.get_token(address).await?.is_some() {
            self.known_tokens.insert(address.to_string(), ());
            return Ok(());
        }

        let token = self.fetch_token_metadata(address, token_type).await;
        self.storage.upsert_token(&token).await?;
        self.known_tokens.insert(address.to_string(), ());
        Ok(())
    }

    /// Best-effort metadata reads: contracts without a read method yield
    /// null fields, not failure.
    async fn fetch_token_metadata(&self, address: &str, token_type: TokenType) -> Token {
        let name = self.call_string(address, abi::SEL_NAME).await;
        let symbol = self.call_string(address, abi::SEL_SYMBOL).await;
        let decimals = if token_type == TokenType::Erc20 {
            self.call_u256(address, abi::SEL_DECIMALS)
                .await
                .and_then(|v| i32::try_from(v).ok())
        } else {
            None
        };
        let total_supply = self
            .call_u256(address, abi::SEL_TOTAL_SUPPLY)
            .await
            .map(|v| v.to_string());

        Token {
            address: address.to_string(),
            name,
            symbol,
            decimals,
            total_supply,
            token_type: token_type.as_str().to_string(),
            holder_count: 0,
            transfer_count: 0,
        }
    }

    async fn call_string(&self, to: &str, selector: &str) -> Option<String> {
        let result = self.rpc.call(to, &abi::call_data(selector, &[])).await.ok()?;
        abi::decode_string(&result)
    }

    async fn call_u256(&self, to: &str, selector: &str) -> Option<U256> {
        let result = self.rpc.call(to, &abi::call_data(selector, &[])).await.ok()?;
        abi::decode_u256(&result)
    }

    /// Re-read the holder's authoritative balance from chain state. Never
    /// derived by summing transfer deltas: re-reads tolerate missed or
    /// duplicate events and reorg replay. A failed read leaves the stored
    /// balance untouched.
    async fn update_holder(
        &self,
        token_address: &str,
        token_type: TokenType,
        holder: &str,
        token_id: Option<&str>,
    ) -> Result<()> {
        let balance = match self
            .read_balance(token_address, token_type, holder, token_id)
            .await
        {
            Ok(balance) => balance,
            Err(e) if e.is_network() => return Err(e.into()),
            Err(e) => {
                debug!(
                    "balance read failed for {} on {}: {}",
                    holder, token_address, e
                );
                return Ok(());
            }
        };

        self.storage
            .upsert_token_holder(&TokenHolder {
                token_address: token_address.to_string(),
                holder_address: holder.to_string(),
                token_id: token_id.map(String::from),
                balance: balance.to_string(),
            })
            .await?;

        let count = self.storage.count_positive_holders(token_address).await?;
        self.storage
            .set_token_holder_count(token_address, count)
            .await?;
        Ok(())
    }

    async fn read_balance(
        &self,
        token_address: &str,
        token_type: TokenType,
        holder: &str,
        token_id: Option<&str>,
    ) -> Result<U256, RpcError> {
        match token_type {
            TokenType::Erc20 => {
                let arg = abi::encode_address(holder)
                    .ok_or_else(|| RpcError::Decode(format!("bad holder address {holder}")))?;
                let result = self
                    .rpc
                    .call(token_address, &abi::call_data(abi::SEL_BALANCE_OF, &[arg]))
                    .await?;
                abi::decode_u256(&result)
                    .ok_or_else(|| RpcError::Decode(format!("bad balanceOf result {result}")))
            }
            TokenType::Erc721 => {
                let id = parse_token_id(token_id)?;
                let result = self
                    .rpc
                    .call(
                        token_address,
                        &abi::call_data(abi::SEL_OWNER_OF, &[abi::encode_u256(id)]),
                    )
                    .await?;
                let owner = abi::decode_address(&result)
                    .ok_or_else(|| RpcError::Decode(format!("bad ownerOf result {result}")))?;
                if owner.eq_ignore_ascii_case(holder) {
                    Ok(U256::from(1u64))
                } else {
                    Ok(U256::ZERO)
                }
            }
            TokenType::Erc1155 => {
                let id = parse_token_id(token_id)?;
                let holder_arg = abi::encode_address(holder)
                    .ok_or_else(|| RpcError::Decode(format!("bad holder address {holder}")))?;
                let result = self
                    .rpc
                    .call(
                        token_address,
                        &abi::call_data(abi::SEL_BALANCE_OF_ID, &[holder_arg, abi::encode_u256(id)]),
                    )
                    .await?;
                abi::decode_u256(&result)
                    .ok_or_else(|| RpcError::Decode(format!("bad balanceOf result {result}")))
            }
        }
    }

    /// Retry metadata reads for tokens indexed while their contract was
    /// unreadable. Returns how many tokens gained metadata.
    pub async fn backfill_token_metadata(&self) -> Result<usize> {
        let tokens = self.storage.tokens_missing_metadata().await?;
        let mut updated = 0;
        for token in tokens {
            let token_type = TokenType::parse(&token.token_type).unwrap_or(TokenType::Erc20);
            let fresh = self.fetch_token_metadata(&token.address, token_type).await;
            if fresh.name.is_some() || fresh.symbol.is_some() || fresh.total_supply.is_some() {
                self.storage.upsert_token(&fresh).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Live balances for every token the address holds. Each holding is
    /// refreshed from chain state; unreadable contracts keep the stored value.
    pub async fn get_token_balances(&self, address: &str) -> Result<Vec<TokenHolder>> {
        let holder = address.to_lowercase();
        let mut holdings = self.storage.get_holdings(&holder).await?;
        for holding in &mut holdings {
            let token_type = self
                .storage
                .get_token(&holding.token_address)
                .await?
                .and_then(|t| TokenType::parse(&t.token_type))
                .unwrap_or(TokenType::Erc20);
            match self
                .read_balance(
                    &holding.token_address,
                    token_type,
                    &holder,
                    holding.token_id.as_deref(),
                )
                .await
            {
                Ok(balance) => holding.balance = balance.to_string(),
                Err(e) => warn!(
                    "live balance read failed for {} on {}: {}",
                    holder, holding.token_address, e
                ),
            }
        }
        Ok(holdings)
    }
}

fn parse_token_id(token_id: Option<&str>) -> Result<U256, RpcError> {
    let raw = token_id.ok_or_else(|| RpcError::Decode("transfer missing token id".into()))?;
    U256::from_str_radix(raw, 10)
        .map_err(|_| RpcError::Decode(format!("bad token id {raw}")))
}
