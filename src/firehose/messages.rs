//! Provider message decoding.
//!
//! The two firehose providers deliver notifications with differing shapes;
//! both collapse into a typed `RawTxEvent`. Unknown fields are ignored;
//! frames missing required fields are `Protocol` errors the caller counts and
//! drops. Base64-encoded transactions are decoded lazily for account keys.

use base64::Engine;
use serde_json::Value;
use solana_sdk::transaction::VersionedTransaction;

use crate::errors::{SniperError, SniperResult};
use crate::types::{now_ms, RawTxEvent, TokenBalance};

/// Build the `transactionSubscribe` request for the given accounts.
pub fn subscribe_request(account_include: &[String]) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "transactionSubscribe",
        "params": [
            {
                "accountInclude": account_include,
                "failed": false,
            },
            {
                "commitment": "processed",
                "encoding": "base64",
                "transactionDetails": "full",
                "showRewards": false,
                "maxSupportedTransactionVersion": 0,
            }
        ]
    })
    .to_string()
}

/// Pull the notification payload out of either provider envelope.
/// Returns `None` for subscription acks and keepalive frames.
fn extract_notification(value: &Value) -> Option<&Value> {
    if let Some(params) = value.get("params") {
        return params.get("result");
    }
    match value.get("result") {
        Some(result) if result.is_object() => Some(result),
        _ => None,
    }
}

fn parse_token_balances(meta: &Value, key: &str) -> Vec<TokenBalance> {
    meta.get(key)
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    Some(TokenBalance {
                        account_index: entry.get("accountIndex")?.as_u64()? as u8,
                        mint: entry.get("mint")?.as_str()?.to_string(),
                        owner: entry
                            .get("owner")
                            .and_then(|o| o.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        ui_amount: entry
                            .get("uiTokenAmount")
                            .and_then(|a| a.get("uiAmount"))
                            .and_then(|a| a.as_f64())
                            .unwrap_or(0.0),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_lamport_balances(meta: &Value, key: &str) -> Vec<u64> {
    meta.get(key)
        .and_then(|v| v.as_array())
        .map(|entries| entries.iter().filter_map(|v| v.as_u64()).collect())
        .unwrap_or_default()
}

/// Account keys from a json-encoded message, tolerating both the plain-string
/// and the `{pubkey: …}` list shapes.
fn account_keys_from_json(message: &Value) -> Vec<String> {
    let keys = message
        .get("accountKeys")
        .or_else(|| message.get("staticAccountKeys"));
    keys.and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|k| {
                    k.as_str()
                        .map(|s| s.to_string())
                        .or_else(|| k.get("pubkey").and_then(|p| p.as_str()).map(|s| s.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Account keys decoded from a base64 transaction blob.
fn account_keys_from_base64(tx_b64: &str) -> SniperResult<Vec<String>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(tx_b64)
        .map_err(|e| SniperError::protocol(format!("invalid base64 transaction: {e}")))?;
    let tx: VersionedTransaction = bincode::deserialize(&bytes)
        .map_err(|e| SniperError::protocol(format!("undecodable transaction: {e}")))?;
    Ok(tx
        .message
        .static_account_keys()
        .iter()
        .map(|k| k.to_string())
        .collect())
}

/// Decode one websocket text frame.
///
/// `Ok(None)` for non-notification frames (acks, keepalives); `Err(Protocol)`
/// for notification frames with a broken shape.
pub fn parse_frame(text: &str) -> SniperResult<Option<RawTxEvent>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SniperError::protocol(format!("invalid frame json: {e}")))?;

    let Some(outer) = extract_notification(&value) else {
        return Ok(None);
    };

    // One provider nests `{transaction, meta}` one level down under
    // `transaction`; the other inlines them next to signature/slot.
    let container = outer
        .get("transaction")
        .filter(|t| t.get("meta").is_some())
        .unwrap_or(outer);

    let signature = outer
        .get("signature")
        .or_else(|| container.get("signature"))
        .and_then(|s| s.as_str())
        .ok_or_else(|| SniperError::protocol("notification missing signature"))?
        .to_string();
    let slot = outer
        .get("slot")
        .or_else(|| container.get("slot"))
        .and_then(|s| s.as_u64())
        .unwrap_or(0);

    let meta = container
        .get("meta")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    let tx_value = container.get("transaction");
    let (account_keys, raw_tx_base64) = match tx_value {
        // base64 encoding delivers ["<blob>", "base64"] or a bare string
        Some(Value::Array(parts)) => {
            let blob = parts
                .first()
                .and_then(|p| p.as_str())
                .ok_or_else(|| SniperError::protocol("empty transaction tuple"))?;
            (account_keys_from_base64(blob)?, blob.to_string())
        }
        Some(Value::String(blob)) => (account_keys_from_base64(blob)?, blob.clone()),
        Some(Value::Object(tx)) => {
            let message = tx
                .get("message")
                .ok_or_else(|| SniperError::protocol("transaction missing message"))?;
            (account_keys_from_json(message), String::new())
        }
        _ => return Err(SniperError::protocol("notification missing transaction")),
    };

    if account_keys.is_empty() {
        return Err(SniperError::protocol("transaction with no account keys"));
    }

    Ok(Some(RawTxEvent {
        signature,
        slot,
        account_keys,
        log_messages: meta
            .get("logMessages")
            .and_then(|v| v.as_array())
            .map(|logs| {
                logs.iter()
                    .filter_map(|l| l.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        pre_balances: parse_lamport_balances(&meta, "preBalances"),
        post_balances: parse_lamport_balances(&meta, "postBalances"),
        pre_token_balances: parse_token_balances(&meta, "preTokenBalances"),
        post_token_balances: parse_token_balances(&meta, "postTokenBalances"),
        raw_tx_base64,
        received_at_ms: now_ms(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_notification(signature: &str, slot: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "transactionNotification",
            "params": {
                "subscription": 1,
                "result": {
                    "signature": signature,
                    "slot": slot,
                    "transaction": {
                        "message": {
                            "accountKeys": ["Buyer111", "Program111"],
                        }
                    },
                    "meta": {
                        "preBalances": [5_000_000_000u64, 0],
                        "postBalances": [4_500_000_000u64, 0],
                        "logMessages": ["Program log: ray_log", "Program log: initialize2"],
                        "preTokenBalances": [],
                        "postTokenBalances": [{
                            "accountIndex": 1,
                            "mint": "TokenMint111",
                            "owner": "Buyer111",
                            "uiTokenAmount": {"uiAmount": 1000.0}
                        }]
                    }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn parses_json_shaped_notification() {
        let event = parse_frame(&json_notification("Sig1", 100)).unwrap().unwrap();
        assert_eq!(event.signature, "Sig1");
        assert_eq!(event.slot, 100);
        assert_eq!(event.account_keys, vec!["Buyer111", "Program111"]);
        assert_eq!(event.pre_balances[0], 5_000_000_000);
        assert_eq!(event.post_token_balances.len(), 1);
        assert_eq!(event.post_token_balances[0].mint, "TokenMint111");
        assert!(event.log_messages.iter().any(|l| l.contains("initialize2")));
    }

    #[test]
    fn subscription_ack_yields_none() {
        let ack = r#"{"jsonrpc":"2.0","result":12345,"id":1}"#;
        assert!(parse_frame(ack).unwrap().is_none());
    }

    #[test]
    fn garbage_is_protocol_error() {
        assert!(parse_frame("not json at all").is_err());
        let missing_sig = serde_json::json!({
            "params": {"result": {"slot": 5, "transaction": {"message": {"accountKeys": ["A"]}}, "meta": {}}}
        })
        .to_string();
        assert!(parse_frame(&missing_sig).is_err());
    }

    #[test]
    fn inline_result_shape_parses() {
        // Provider B inlines the payload under result with meta alongside.
        let frame = serde_json::json!({
            "params": {
                "result": {
                    "signature": "SigB",
                    "slot": 7,
                    "transaction": {"message": {"staticAccountKeys": ["K1", "K2"]}},
                    "meta": {"preBalances": [1], "postBalances": [0]}
                }
            }
        })
        .to_string();
        let event = parse_frame(&frame).unwrap().unwrap();
        assert_eq!(event.signature, "SigB");
        assert_eq!(event.account_keys, vec!["K1", "K2"]);
    }

    #[test]
    fn nested_transaction_container_parses() {
        // Provider A nests {transaction, meta} under "transaction" while
        // keeping signature/slot at the outer level.
        let frame = serde_json::json!({
            "params": {
                "result": {
                    "signature": "SigNested",
                    "slot": 42,
                    "transaction": {
                        "transaction": {"message": {"accountKeys": ["K1"]}},
                        "meta": {"preBalances": [9], "postBalances": [3]}
                    }
                }
            }
        })
        .to_string();
        let event = parse_frame(&frame).unwrap().unwrap();
        assert_eq!(event.signature, "SigNested");
        assert_eq!(event.slot, 42);
        assert_eq!(event.account_keys, vec!["K1"]);
        assert_eq!(event.pre_balances, vec![9]);
    }

    #[test]
    fn subscribe_request_shape() {
        let req = subscribe_request(&["P1".to_string(), "W1".to_string()]);
        let value: Value = serde_json::from_str(&req).unwrap();
        assert_eq!(value["method"], "transactionSubscribe");
        assert_eq!(value["params"][0]["accountInclude"][0], "P1");
        assert_eq!(value["params"][0]["failed"], false);
        assert_eq!(value["params"][1]["commitment"], "processed");
        assert_eq!(value["params"][1]["transactionDetails"], "full");
        assert_eq!(value["params"][1]["maxSupportedTransactionVersion"], 0);
    }
}
