use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Token standard of an observed transfer or contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Erc20,
    Erc721,
    Erc1155,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Erc20 => "erc20",
            TokenType::Erc721 => "erc721",
            TokenType::Erc1155 => "erc1155",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "erc20" => Some(TokenType::Erc20),
            "erc721" => Some(TokenType::Erc721),
            "erc1155" => Some(TokenType::Erc1155),
            _ => None,
        }
    }

    pub fn is_nft(&self) -> bool {
        matches!(self, TokenType::Erc721 | TokenType::Erc1155)
    }
}

pub const TX_STATUS_SUCCESS: &str = "success";
pub const TX_STATUS_FAILED: &str = "failed";
pub const TX_STATUS_PENDING: &str = "pending";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Block {
    pub number: i64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
    pub miner: Option<String>,
    pub gas_used: i64,
    pub gas_limit: i64,
    pub base_fee_per_gas: Option<String>,
    pub transaction_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub hash: String,
    pub block_number: i64,
    pub transaction_index: i64,
    pub from_address: String,
    pub to_address: Option<String>,
    pub contract_address: Option<String>,
    pub value: String,
    pub gas: i64,
    pub gas_price: Option<String>,
    pub input: String,
    pub status: String,
    pub method_id: Option<String>,
    pub method_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionLog {
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub address: String,
    pub topic0: Option<String>,
    pub topics: Vec<String>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenTransfer {
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    /// Decimal amount for ERC-20/1155; None for ERC-721.
    pub value: Option<String>,
    /// Decimal token id for ERC-721/1155; None for ERC-20.
    pub token_id: Option<String>,
    pub token_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Token {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<i32>,
    pub total_supply: Option<String>,
    pub token_type: String,
    pub holder_count: i64,
    pub transfer_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenHolder {
    pub token_address: String,
    pub holder_address: String,
    /// Set for ERC-721/1155 holdings, None for fungible balances.
    pub token_id: Option<String>,
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NftToken {
    pub contract_address: String,
    pub token_id: String,
    pub owner: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub attributes: Option<serde_json::Value>,
    pub metadata_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InternalTransaction {
    pub transaction_hash: String,
    /// Dash-joined path of call indices from the root call, e.g. "0-2-1".
    pub trace_address: String,
    pub block_number: i64,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub value: String,
    pub call_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AddressEntry {
    pub address: String,
    pub balance: String,
    pub is_contract: bool,
    pub transaction_count: i64,
    pub last_seen_block: i64,
}

/// Singleton durability record; `last_indexed_block` is the crash-safe cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IndexerState {
    pub last_indexed_block: i64,
    pub is_running: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NetworkStats {
    pub latest_block: i64,
    pub total_transactions: i64,
    pub total_addresses: i64,
    pub gas_price: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyStats {
    pub day: NaiveDate,
    pub block_count: i64,
    pub transaction_count: i64,
}
