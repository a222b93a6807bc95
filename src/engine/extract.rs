use tracing::debug;

use crate::model::FieldMap;

use super::CapacityEngine;

/// Pull the sub-resource count out of a booking's custom fields.
///
/// The first key (in map order) whose lowercase form contains `token` wins.
/// Its value is coerced to an integer and clamped to `[0, u32::MAX]`. Keys are
/// matched, never labels: labels are editable by site admins and can't be trusted.
/// Never fails: no map, no match, or junk all give 0.
pub fn extract_count(fields: Option<&FieldMap>, token: &str) -> u32 {
    let Some(fields) = fields else {
        debug!("no custom field data");
        return 0;
    };
    for (key, value) in fields.iter() {
        if key.to_lowercase().contains(token) {
            debug!(key, raw = %value, "matched count field key");
            return value.to_int().clamp(0, i64::from(u32::MAX)) as u32;
        }
    }
    debug!(token, "no count field match found");
    0
}

impl CapacityEngine {
    pub fn extract(&self, fields: Option<&FieldMap>) -> u32 {
        extract_count(fields, self.config.field_token())
    }
}
