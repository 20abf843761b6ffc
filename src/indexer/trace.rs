use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use alloy_primitives::U256;

use crate::db::models::InternalTransaction;
use crate::eth_rpc::{hex_to_u256, ChainRpc, TraceFrame};

const SUPPORT_UNKNOWN: i8 = 0;
const SUPPORT_YES: i8 = 1;
const SUPPORT_NO: i8 = -1;

/// Flattens callTracer traces into internal-transaction rows. The trace
/// method is probed once per transport; nodes without it are skipped until
/// the next reconnect.
pub struct Tracer {
    rpc: Arc<dyn ChainRpc>,
    support: AtomicI8,
}

impl Tracer {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            rpc,
            support: AtomicI8::new(SUPPORT_UNKNOWN),
        }
    }

    /// Re-probe after a reconnect; the replacement node may differ.
    pub fn reset_support(&self) {
        self.support.store(SUPPORT_UNKNOWN, Ordering::SeqCst);
    }

    /// Trace one transaction. Returns None when tracing is unsupported or
    /// the individual trace fails; not every transaction is traceable.
    pub async fn trace(
        &self,
        tx_hash: &str,
        block_number: i64,
    ) -> Option<Vec<InternalTransaction>> {
        if self.support.load(Ordering::SeqCst) == SUPPORT_NO {
            return None;
        }

        match self.rpc.trace_transaction(tx_hash).await {
            Ok(frame) => {
                self.support.store(SUPPORT_YES, Ordering::SeqCst);
                Some(flatten_trace(&frame, tx_hash, block_number))
            }
            Err(e) if e.is_method_not_found() => {
                info!("node does not support debug_traceTransaction, disabling tracing");
                self.support.store(SUPPORT_NO, Ordering::SeqCst);
                None
            }
            Err(e) => {
                debug!("trace failed for {}: {}", tx_hash, e);
                None
            }
        }
    }
}

/// Flatten the call tree below the root frame. The root call is the
/// transaction itself; only subcalls carrying value or creating a contract
/// become rows.
pub fn flatten_trace(
    root: &TraceFrame,
    tx_hash: &str,
    block_number: i64,
) -> Vec<InternalTransaction> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    for (index, call) in root.calls.iter().enumerate() {
        path.push(index);
        walk(call, &mut path, &mut out, tx_hash, block_number);
        path.pop();
    }
    out
}

fn walk(
    frame: &TraceFrame,
    path: &mut Vec<usize>,
    out: &mut Vec<InternalTransaction>,
    tx_hash: &str,
    block_number: i64,
) {
    let value = frame
        .value
        .as_deref()
        .and_then(hex_to_u256)
        .unwrap_or(U256::ZERO);
    let call_type = frame.call_type.as_deref().unwrap_or("CALL");
    let is_create = call_type.starts_with("CREATE");

    if !value.is_zero() || is_create {
        out.push(InternalTransaction {
            transaction_hash: tx_hash.to_string(),
            trace_address: path
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join("-"),
            block_number,
            from_address: frame.from.as_deref().map(str::to_lowercase),
            to_address: frame.to.as_deref().map(str::to_lowercase),
            value: value.to_string(),
            call_type: call_type.to_string(),
        });
    }

    for (index, child) in frame.calls.iter().enumerate() {
        path.push(index);
        walk(child, path, out, tx_hash, block_number);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(call_type: &str, value: Option<&str>, calls: Vec<TraceFrame>) -> TraceFrame {
        TraceFrame {
            call_type: Some(call_type.to_string()),
            from: Some("0xAAAA000000000000000000000000000000000001".to_string()),
            to: Some("0xBBBB000000000000000000000000000000000002".to_string()),
            value: value.map(String::from),
            calls,
        }
    }

    #[test]
    fn flatten_keeps_value_and_create_calls_only() {
        let root = frame(
            "CALL",
            Some("0x100"),
            vec![
                frame("CALL", Some("0x1"), vec![]),
                frame("STATICCALL", None, vec![frame("CALL", Some("0x5"), vec![])]),
                frame("CREATE", Some("0x0"), vec![]),
                frame("DELEGATECALL", Some("0x0"), vec![]),
            ],
        );

        let rows = flatten_trace(&root, "0xtx", 42);
        let paths: Vec<&str> = rows.iter().map(|r| r.trace_address.as_str()).collect();
        assert_eq!(paths, vec!["0", "1-0", "2"]);
        assert_eq!(rows[0].value, "1");
        assert_eq!(rows[1].value, "5");
        assert_eq!(rows[2].call_type, "CREATE");
        assert!(rows.iter().all(|r| r.block_number == 42));
    }

    #[test]
    fn flatten_skips_root_frame() {
        let root = frame("CALL", Some("0x100"), vec![]);
        assert!(flatten_trace(&root, "0xtx", 1).is_empty());
    }

    #[test]
    fn flatten_lowercases_addresses() {
        let root = frame("CALL", None, vec![frame("CALL", Some("0x1"), vec![])]);
        let rows = flatten_trace(&root, "0xtx", 1);
        assert_eq!(
            rows[0].from_address.as_deref(),
            Some("0xaaaa000000000000000000000000000000000001")
        );
    }

    #[tokio::test]
    async fn tracer_disables_itself_until_reconnect() {
        use crate::indexer::test_support::MockRpc;

        let rpc = Arc::new(MockRpc::new(1));
        let tracer = Tracer::new(rpc.clone());

        // the mock answers unknown hashes with -32601
        assert!(tracer.trace("0xmissing", 1).await.is_none());

        rpc.set_trace(
            "0xt",
            frame("CALL", Some("0x100"), vec![frame("CALL", Some("0x1"), vec![])]),
        );
        // still disabled from the failed capability probe
        assert!(tracer.trace("0xt", 1).await.is_none());

        // a reconnect re-probes and tracing comes back
        tracer.reset_support();
        let rows = tracer.trace("0xt", 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trace_address, "0");
    }
}
