//! Side-channel payloads attached to visible messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Kind of auxiliary UI payload. One slot exists per kind.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SideChannelKind {
    /// A structured card (workout summary, 1RM result, ...).
    Card,
    /// A set of suggestion chips.
    Suggestions,
}

/// A payload produced out-of-band from a handler's text output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SideChannelPayload {
    Card(serde_json::Value),
    Suggestions(Vec<String>),
}

impl SideChannelPayload {
    /// The slot this payload occupies.
    pub fn kind(&self) -> SideChannelKind {
        match self {
            Self::Card(_) => SideChannelKind::Card,
            Self::Suggestions(_) => SideChannelKind::Suggestions,
        }
    }
}

/// At most one payload per kind, as attached to a message.
pub type AttachedPayloads = BTreeMap<SideChannelKind, SideChannelPayload>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(SideChannelKind::from_str("card").unwrap(), SideChannelKind::Card);
        assert_eq!(SideChannelKind::Suggestions.to_string(), "suggestions");
        assert!(SideChannelKind::from_str("banner").is_err());
    }

    #[test]
    fn payload_reports_its_kind() {
        let chips = SideChannelPayload::Suggestions(vec!["Log a set".into()]);
        assert_eq!(chips.kind(), SideChannelKind::Suggestions);
        let json = serde_json::to_value(&chips).unwrap();
        assert_eq!(json["kind"], "suggestions");
        assert_eq!(json["value"][0], "Log a set");
    }
}
