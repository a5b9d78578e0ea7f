use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::models::{event::ActionEvent, routing::RoutingTable};

/// Destinations whose rule action equals the event action, in rule order.
///
/// Matching is exact and case-sensitive; no match is an empty result.
pub fn route<'a>(event: &ActionEvent, rules: &'a RoutingTable) -> Vec<&'a str> {
    rules
        .rules()
        .iter()
        .filter(|rule| rule.action == event.action)
        .map(|rule| rule.destination_id.as_str())
        .collect()
}

/// Holds the current routing snapshot. Readers take a cheap `Arc` clone and
/// route against it; reloads swap the whole table.
#[derive(Debug, Default)]
pub struct RuleStore {
    current: RwLock<Arc<RoutingTable>>,
}

impl RuleStore {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<RoutingTable> {
        // The lock only ever guards a pointer swap, a poisoned guard still holds a whole table.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, table: RoutingTable) {
        let rules = table.len();
        let table = Arc::new(table);

        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = table;

        info!(rules, "Routing rules replaced");
    }
}
