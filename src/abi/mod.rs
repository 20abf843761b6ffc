//! Minimal ABI helpers for the event and read-call surface the indexer needs:
//! topic constants, 32-byte word decoding, call-data encoding, and a static
//! selector table for best-effort method naming.

use alloy_primitives::U256;

/// Transfer(address,address,uint256) — shared by ERC-20 and ERC-721.
/// ERC-20 emits 3 topics (value in data), ERC-721 emits 4 (tokenId indexed).
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// TransferSingle(address,address,address,uint256,uint256) — ERC-1155.
pub const TRANSFER_SINGLE_TOPIC: &str =
    "0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62";

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub const SEL_NAME: &str = "0x06fdde03";
pub const SEL_SYMBOL: &str = "0x95d89b41";
pub const SEL_DECIMALS: &str = "0x313ce567";
pub const SEL_TOTAL_SUPPLY: &str = "0x18160ddd";
pub const SEL_BALANCE_OF: &str = "0x70a08231";
pub const SEL_BALANCE_OF_ID: &str = "0x00fdd58e";
pub const SEL_OWNER_OF: &str = "0x6352211e";
pub const SEL_TOKEN_URI: &str = "0xc87b56dd";
pub const SEL_URI: &str = "0x0e89341c";

const METHOD_NAMES: &[(&str, &str)] = &[
    ("0xa9059cbb", "transfer"),
    ("0x23b872dd", "transferFrom"),
    ("0x095ea7b3", "approve"),
    ("0x40c10f19", "mint"),
    ("0x42966c68", "burn"),
    ("0xa22cb465", "setApprovalForAll"),
    ("0x42842e0e", "safeTransferFrom"),
    ("0xb88d4fde", "safeTransferFrom"),
    ("0xf242432a", "safeTransferFrom"),
    ("0x2eb2c2d6", "safeBatchTransferFrom"),
    ("0xd0e30db0", "deposit"),
    ("0x2e1a7d4d", "withdraw"),
    ("0x7ff36ab5", "swapExactETHForTokens"),
    ("0x38ed1739", "swapExactTokensForTokens"),
    ("0x18cbafe5", "swapExactTokensForETH"),
    ("0x5ae401dc", "multicall"),
    ("0xac9650d8", "multicall"),
    ("0x1249c58b", "mint"),
    ("0xa0712d68", "mint"),
];

/// Look up a human-readable name for a 4-byte selector. Unknown selectors are
/// not an error; callers keep the raw id.
pub fn method_name(selector: &str) -> Option<&'static str> {
    METHOD_NAMES
        .iter()
        .find(|(sel, _)| sel.eq_ignore_ascii_case(selector))
        .map(|(_, name)| *name)
}

/// Extract the 4-byte selector from transaction input data.
pub fn method_id(input: &str) -> Option<String> {
    let hex = strip_prefix(input);
    if hex.len() < 8 {
        return None;
    }
    Some(format!("0x{}", hex[..8].to_lowercase()))
}

fn strip_prefix(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    hex::decode(strip_prefix(s)).ok()
}

fn word(bytes: &[u8], index: usize) -> Option<&[u8]> {
    let start = index.checked_mul(32)?;
    let end = start.checked_add(32)?;
    bytes.get(start..end)
}

/// Decode the `index`-th 32-byte word of ABI-encoded data as a U256.
pub fn u256_word(data: &str, index: usize) -> Option<U256> {
    let bytes = decode_hex(data)?;
    word(&bytes, index).map(U256::from_be_slice)
}

/// Decode the `index`-th 32-byte word of ABI-encoded data as an address.
pub fn address_word(data: &str, index: usize) -> Option<String> {
    let bytes = decode_hex(data)?;
    word(&bytes, index).map(|w| format!("0x{}", hex::encode(&w[12..32])))
}

/// An indexed address parameter is a 32-byte topic with the address in the
/// low 20 bytes.
pub fn topic_address(topic: &str) -> Option<String> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != 32 {
        return None;
    }
    Some(format!("0x{}", hex::encode(&bytes[12..32])))
}

/// An indexed uint256 parameter (e.g. an ERC-721 tokenId topic).
pub fn topic_u256(topic: &str) -> Option<U256> {
    U256::from_str_radix(strip_prefix(topic), 16).ok()
}

pub fn encode_address(addr: &str) -> Option<String> {
    let hex = strip_prefix(addr);
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("{:0>64}", hex.to_lowercase()))
}

pub fn encode_u256(value: U256) -> String {
    format!("{:0>64}", format!("{value:x}"))
}

/// Build eth_call data from a selector and pre-encoded 32-byte words.
pub fn call_data(selector: &str, args: &[String]) -> String {
    let mut data = selector.to_string();
    for arg in args {
        data.push_str(arg);
    }
    data
}

/// Decode an ABI-encoded string return value. Tolerates the legacy bytes32
/// encoding some early ERC-20 contracts use for name()/symbol().
pub fn decode_string(result: &str) -> Option<String> {
    let bytes = decode_hex(result)?;
    if bytes.is_empty() {
        return None;
    }
    if bytes.len() == 32 {
        let trimmed: Vec<u8> = bytes.iter().copied().take_while(|&b| b != 0).collect();
        let s = String::from_utf8(trimmed).ok()?;
        return if s.is_empty() { None } else { Some(s) };
    }
    let offset = word(&bytes, 0).map(U256::from_be_slice)?;
    let offset = usize::try_from(offset).ok()?;
    let len_end = offset.checked_add(32)?;
    let len_word = bytes.get(offset..len_end)?;
    let len = usize::try_from(U256::from_be_slice(len_word)).ok()?;
    let data = bytes.get(len_end..len_end.checked_add(len)?)?;
    let s = String::from_utf8(data.to_vec()).ok()?;
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Decode a single uint256 return value.
pub fn decode_u256(result: &str) -> Option<U256> {
    u256_word(result, 0)
}

/// Decode a single address return value.
pub fn decode_address(result: &str) -> Option<String> {
    address_word(result, 0)
}

pub fn is_zero_address(addr: &str) -> bool {
    addr.eq_ignore_ascii_case(ZERO_ADDRESS)
}
