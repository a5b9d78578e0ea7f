use serde::{Deserialize, Serialize};

/// An entry of the configured action list. `channel_id` is the channel's
/// human-facing name and still has to be resolved against the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAction {
    pub action: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub action: String,
    pub destination_id: String,
}

impl RoutingRule {
    pub fn new(action: impl Into<String>, destination_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            destination_id: destination_id.into(),
        }
    }
}

/// Immutable set of rules for one configuration generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<RoutingRule> for RoutingTable {
    fn from_iter<I: IntoIterator<Item = RoutingRule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
