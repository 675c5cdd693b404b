//! Line framing for the appliance event stream.

use std::collections::BTreeMap;

use serde_json::Value;
use strum::{Display, EnumString};
use tracing::warn;

/// Value of the `event:` field.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
pub enum EventKind {
    KeepAlive,
    Status,
    Event,
    Notify,
    Connected,
    Disconnected,
    Paired,
    Depaired,
    #[strum(default)]
    Other(String),
}

/// One blank-line-terminated block of fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    pub kind: Option<EventKind>,
    pub id: Option<String>,
    /// Parsed `data:` payload, when non-empty.
    pub data: Option<Value>,
    /// Every raw textual field except `data`.
    pub fields: BTreeMap<String, String>,
}

/// Incremental parser: feed lines, get a record at each block boundary.
#[derive(Debug, Default)]
pub struct EventParser {
    pending: Option<EventRecord>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line (without its `\n`). Returns the finished record
    /// when `line` is blank and at least one field was accumulated.
    pub fn push_line(&mut self, line: &str) -> Option<EventRecord> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return self.pending.take();
        }
        if line.starts_with(':') {
            return None;
        }

        let Some((key, value)) = line.split_once(':') else {
            warn!(line, "skipping unparsable event stream line");
            return None;
        };
        let key = key.trim();
        if key.is_empty() {
            warn!(line, "skipping event stream line without field name");
            return None;
        }
        let value = value.strip_prefix(' ').unwrap_or(value);

        if key == "data" {
            if value.trim().is_empty() {
                self.pending.get_or_insert_with(EventRecord::default);
                return None;
            }
            match serde_json::from_str::<Value>(value) {
                Ok(data) => self.pending.get_or_insert_with(EventRecord::default).data = Some(data),
                Err(err) => warn!(error = %err, line, "skipping unparsable event data"),
            }
            return None;
        }

        let record = self.pending.get_or_insert_with(EventRecord::default);
        match key {
            "event" => record.kind = value.parse().ok(),
            "id" => record.id = Some(value.to_string()),
            _ => {}
        }
        record.fields.insert(key.to_string(), value.to_string());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn feed(parser: &mut EventParser, text: &str) -> Vec<EventRecord> {
        text.split('\n').filter_map(|l| parser.push_line(l)).collect()
    }

    #[test]
    fn block_is_delivered_on_blank_line() {
        let mut parser = EventParser::new();
        let records = feed(
            &mut parser,
            "event: STATUS\ndata: {\"items\":[{\"key\":\"BSH.Common.Status.DoorState\"}]}\nid: SIEMENS-123\n\n",
        );
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.kind, Some(EventKind::Status));
        assert_eq!(record.id.as_deref(), Some("SIEMENS-123"));
        assert_eq!(
            record.data,
            Some(json!({"items":[{"key":"BSH.Common.Status.DoorState"}]}))
        );
        assert_eq!(record.fields.get("event").map(String::as_str), Some("STATUS"));
        assert!(!record.fields.contains_key("data"));
    }

    #[test]
    fn repeated_blank_lines_deliver_nothing_extra() {
        let mut parser = EventParser::new();
        let records = feed(&mut parser, "event: KEEP-ALIVE\n\n\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, Some(EventKind::KeepAlive));
        assert!(feed(&mut parser, "\n\n").is_empty());
    }

    #[test]
    fn unparsable_lines_are_skipped_without_aborting() {
        let mut parser = EventParser::new();
        let records = feed(
            &mut parser,
            "KEEP-ALIVE\nevent: NOTIFY\ndata: {broken\nid: x\n\n",
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, Some(EventKind::Notify));
        assert_eq!(records[0].data, None);
        assert_eq!(records[0].id.as_deref(), Some("x"));
    }

    #[test]
    fn empty_data_still_counts_as_a_field() {
        let mut parser = EventParser::new();
        let records = feed(&mut parser, "data:\n\n");
        assert_eq!(records, vec![EventRecord::default()]);
    }

    #[test]
    fn carriage_returns_and_comments_are_ignored() {
        let mut parser = EventParser::new();
        let records = feed(&mut parser, ": ping\r\nevent:CONNECTED\r\n\r\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, Some(EventKind::Connected));
    }

    #[test]
    fn unknown_event_names_are_preserved() {
        assert_eq!(
            "FIRMWARE-UPDATE".parse::<EventKind>().unwrap(),
            EventKind::Other("FIRMWARE-UPDATE".to_string())
        );
        assert_eq!("DEPAIRED".parse::<EventKind>().unwrap(), EventKind::Depaired);
        assert_eq!(EventKind::KeepAlive.to_string(), "KEEP-ALIVE");
    }
}
