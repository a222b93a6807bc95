use crate::config::EventLimitConfig;
use crate::model::{EventId, EventKind};

use super::CapacityEngine;

/// Only group events listed in the configuration are limited.
pub fn in_scope(config: &EventLimitConfig, kind: &EventKind, event_id: EventId) -> bool {
    *kind == EventKind::Group && config.is_limited(event_id)
}

impl CapacityEngine {
    pub fn in_scope(&self, kind: &EventKind, event_id: EventId) -> bool {
        in_scope(&self.config, kind, event_id)
    }
}
