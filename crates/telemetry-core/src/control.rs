//! Inbound subscriber control message parsing (§6 "Subscriber contract",
//! §7 `MalformedControl`).
//!
//! The core recognizes exactly one inbound control message shape —
//! `{"type": "subscribe", "subscriptions": [{service, metric}]}` — and
//! ignores everything else silently: an unrecognized `type` and a parse
//! failure are both `MalformedControl`, and the spec's resolution for that
//! error kind is to drop the message without surfacing anything to the
//! caller, not to disconnect or log an error for what may just be a
//! forward-compatible message type.

use serde::Deserialize;

use crate::types::MetricKey;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundControl {
    Subscribe { subscriptions: Vec<SubscriptionEntry> },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct SubscriptionEntry {
    service: String,
    metric: String,
}

/// Parses one inbound control message into the filter it requests, or
/// `None` if the message is not a recognized `subscribe` message (unknown
/// `type`, or the payload failed to parse at all).
pub fn parse_subscribe(raw: &str) -> Option<Vec<MetricKey>> {
    match serde_json::from_str::<InboundControl>(raw) {
        Ok(InboundControl::Subscribe { subscriptions }) => Some(
            subscriptions
                .into_iter()
                .map(|entry| MetricKey::new(entry.service, entry.metric))
                .collect(),
        ),
        Ok(InboundControl::Unrecognized) | Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_subscribe_message_into_a_filter() {
        let raw = r#"{"type":"subscribe","subscriptions":[{"service":"s1","metric":"cpu"}]}"#;
        let filter = parse_subscribe(raw).unwrap();
        assert_eq!(filter, vec![MetricKey::new("s1", "cpu")]);
    }

    #[test]
    fn an_empty_subscriptions_list_yields_an_empty_filter_meaning_all() {
        let raw = r#"{"type":"subscribe","subscriptions":[]}"#;
        assert_eq!(parse_subscribe(raw), Some(Vec::new()));
    }

    #[test]
    fn an_unrecognized_type_is_ignored_silently() {
        let raw = r#"{"type":"ping"}"#;
        assert_eq!(parse_subscribe(raw), None);
    }

    #[test]
    fn malformed_json_is_ignored_silently() {
        assert_eq!(parse_subscribe("not json"), None);
    }
}
