//! Per-delivery duplicate removal.
//!
//! Scope is a single inbound HTTP call. A provider retry that arrives in a
//! separate call is not detected here; that needs a durable store.

use super::envelope::RawMessage;
use super::NormalizedMessage;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use std::collections::HashSet;
use std::sync::Arc;

/// Anything carrying a provider message id.
pub trait MessageId {
    fn message_id(&self) -> &str;
}

impl MessageId for NormalizedMessage {
    fn message_id(&self) -> &str {
        &self.id
    }
}

/// Keep the first occurrence of each id, in order. Blank ids are dropped.
/// Ids are compared exactly as delivered.
///
/// Returns the survivors and the number of repeats skipped.
pub fn dedup_by_id<T: MessageId>(messages: Vec<T>) -> (Vec<T>, usize) {
    let mut seen = HashSet::with_capacity(messages.len());
    let mut duplicates = 0;
    let mut unique = Vec::with_capacity(messages.len());

    for message in messages {
        let id = message.message_id();
        if id.trim().is_empty() {
            continue;
        }
        if seen.insert(id.to_string()) {
            unique.push(message);
        } else {
            duplicates += 1;
        }
    }

    (unique, duplicates)
}

impl NormalizedMessage {
    /// Normalize a raw message. `None` when the id is missing or blank.
    pub fn from_raw(raw: RawMessage) -> Option<Self> {
        let id = raw.id.filter(|id| !id.trim().is_empty())?;
        let kind = raw.kind.unwrap_or_default();
        let text = summary_text(&kind, &raw.rest);

        Some(Self {
            id,
            from: raw.from.unwrap_or_default(),
            timestamp: raw.timestamp.and_then(|ts| ts.trim().parse().ok()),
            text,
            kind,
            raw: raw.rest,
        })
    }
}

/// Human-meaningful text for routing: text body, reply id, or media caption.
fn summary_text(kind: &str, rest: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    let pointer = |path: &str| {
        let mut parts = path.split('/');
        let first = parts.next()?;
        parts
            .try_fold(rest.get(first)?, |value, key| value.get(key))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };

    let text = match kind {
        "text" => pointer("text/body"),
        "interactive" => pointer("interactive/button_reply/id")
            .or_else(|| pointer("interactive/list_reply/id")),
        "button" => pointer("button/payload").or_else(|| pointer("button/text")),
        "image" => pointer("image/caption"),
        "document" => pointer("document/caption"),
        "video" => pointer("video/caption"),
        _ => None,
    };
    text.filter(|t| !t.trim().is_empty())
}

/// Result of one deduplication pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub unique: Vec<NormalizedMessage>,
    pub duplicate_count: usize,
    /// Messages dropped for a missing or blank id.
    pub malformed_count: usize,
}

/// Normalizes a delivery's messages and removes repeated ids.
pub struct Deduplicator {
    sink: Arc<dyn TelemetrySink>,
}

impl Deduplicator {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    pub fn dedup(&self, messages: Vec<RawMessage>, correlation_id: &str) -> DedupOutcome {
        let total = messages.len();
        let normalized: Vec<NormalizedMessage> =
            messages.into_iter().filter_map(NormalizedMessage::from_raw).collect();
        let malformed_count = total - normalized.len();
        let (unique, duplicate_count) = dedup_by_id(normalized);

        if malformed_count > 0 {
            tracing::debug!(correlation_id, malformed_count, "Dropped messages without id");
            self.sink.record(TelemetryEvent::MalformedMessagesDropped {
                correlation_id: correlation_id.to_string(),
                dropped: malformed_count,
            });
        }
        if duplicate_count > 0 {
            self.sink.record(TelemetryEvent::DuplicateMessagesIgnored {
                correlation_id: correlation_id.to_string(),
                duplicates: duplicate_count,
                total,
            });
        }

        DedupOutcome {
            unique,
            duplicate_count,
            malformed_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawMessage {
        serde_json::from_value(value).unwrap()
    }

    fn text_message(id: &str) -> RawMessage {
        raw(json!({"id": id, "from": "250788000001", "type": "text", "text": {"body": "hello"}}))
    }

    fn ids(messages: &[NormalizedMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn keeps_first_occurrence_and_counts_repeats() {
        let sink = Arc::new(RecordingSink::new());
        let dedup = Deduplicator::new(sink.clone());

        let outcome = dedup.dedup(
            vec![text_message("m1"), text_message("m1"), text_message("m2")],
            "cid",
        );
        assert_eq!(ids(&outcome.unique), vec!["m1", "m2"]);
        assert_eq!(outcome.duplicate_count, 1);
        assert_eq!(
            sink.events(),
            vec![TelemetryEvent::DuplicateMessagesIgnored {
                correlation_id: "cid".into(),
                duplicates: 1,
                total: 3,
            }]
        );
    }

    #[test]
    fn no_event_without_duplicates() {
        let sink = Arc::new(RecordingSink::new());
        let outcome =
            Deduplicator::new(sink.clone()).dedup(vec![text_message("a"), text_message("b")], "cid");
        assert_eq!(outcome.duplicate_count, 0);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn drops_missing_and_blank_ids() {
        let sink = Arc::new(RecordingSink::new());
        let outcome = Deduplicator::new(sink.clone()).dedup(
            vec![
                raw(json!({"from": "1", "type": "text"})),
                raw(json!({"id": "  ", "from": "1", "type": "text"})),
                text_message("ok"),
            ],
            "cid",
        );
        assert_eq!(ids(&outcome.unique), vec!["ok"]);
        assert_eq!(outcome.malformed_count, 2);
        assert_eq!(outcome.duplicate_count, 0);
        assert_eq!(sink.count("malformed_messages_dropped"), 1);
        assert!(outcome.unique.iter().all(|m| !m.id.is_empty()));
    }

    #[test]
    fn ids_differing_only_in_whitespace_stay_distinct() {
        let outcome = Deduplicator::new(Arc::new(RecordingSink::new()))
            .dedup(vec![text_message("m1"), text_message(" m1")], "cid");
        assert_eq!(ids(&outcome.unique), vec!["m1", " m1"]);
        assert_eq!(outcome.duplicate_count, 0);
        assert_eq!(outcome.malformed_count, 0);
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            text_message("a"),
            text_message("b"),
            text_message("a"),
            text_message("c"),
            text_message("b"),
        ];
        let normalized: Vec<NormalizedMessage> =
            input.into_iter().filter_map(NormalizedMessage::from_raw).collect();

        let (once, first_dups) = dedup_by_id(normalized);
        let (twice, second_dups) = dedup_by_id(once.clone());
        assert_eq!(once, twice);
        assert_eq!(first_dups, 2);
        assert_eq!(second_dups, 0);
        assert_eq!(ids(&once), vec!["a", "b", "c"]);
    }

    #[test]
    fn summary_text_per_message_type() {
        let cases = [
            (json!({"id": "1", "type": "text", "text": {"body": "menu"}}), Some("menu")),
            (
                json!({"id": "2", "type": "interactive", "interactive": {"type": "button_reply", "button_reply": {"id": "btn_yes", "title": "Yes"}}}),
                Some("btn_yes"),
            ),
            (
                json!({"id": "3", "type": "interactive", "interactive": {"type": "list_reply", "list_reply": {"id": "row_2", "title": "Two"}}}),
                Some("row_2"),
            ),
            (json!({"id": "4", "type": "image", "image": {"id": "media", "caption": "receipt"}}), Some("receipt")),
            (json!({"id": "5", "type": "document", "document": {"id": "doc"}}), None),
            (json!({"id": "6", "type": "location", "location": {"latitude": 1.0}}), None),
        ];

        for (value, expected) in cases {
            let message = NormalizedMessage::from_raw(raw(value)).unwrap();
            assert_eq!(message.text.as_deref(), expected, "message {}", message.id);
        }
    }

    #[test]
    fn timestamp_parsed_from_string() {
        let message = NormalizedMessage::from_raw(raw(
            json!({"id": "1", "from": "2507", "type": "text", "timestamp": "1700000000"}),
        ))
        .unwrap();
        assert_eq!(message.timestamp, Some(1_700_000_000));

        let message =
            NormalizedMessage::from_raw(raw(json!({"id": "2", "timestamp": "soon"}))).unwrap();
        assert_eq!(message.timestamp, None);
        assert_eq!(message.kind, "");
    }
}
