use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type BookingId = Ulid;
pub type EventId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Scheduled,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Only scheduled and confirmed bookings occupy capacity.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Scheduled | BookingStatus::Confirmed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Event kind as reported by the host. Only `group` events are ever limited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Group,
    Other(String),
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        if s == "group" {
            EventKind::Group
        } else {
            EventKind::Other(s)
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::from(s.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Group => "group".to_string(),
            EventKind::Other(s) => s,
        }
    }
}

/// A caller-supplied scalar. Externally tagged so it survives bincode in the WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Integer coercion: floats truncate, text takes its leading number
    /// (exponents included), anything non-numeric is 0.
    pub fn to_int(&self) -> i64 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(b) => i64::from(*b),
            FieldValue::Int(n) => *n,
            // `as` saturates and maps NaN to 0
            FieldValue::Float(f) => f.trunc() as i64,
            FieldValue::Text(s) => leading_int(s),
        }
    }

    /// Convert a JSON scalar. Arrays and objects are not scalars and become `Null`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => FieldValue::Null,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Numeric value of the longest leading numeric prefix, after leading whitespace.
/// A fraction or exponent makes the prefix a float, which is then truncated.
/// `"3 kids"` → 3, `" -2"` → -2, `"2.9"` → 2, `"1e3"` → 1000, `"abc"` → 0.
/// Saturates on overflow.
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };

    let int_start = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let mut end = digits_from(int_start);
    let has_int = end > int_start;
    let mut is_float = false;

    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        if has_int || frac_end > end + 1 {
            end = frac_end;
            is_float = true;
        }
    }
    if !has_int && !is_float {
        return 0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exp_start = end + 1 + sign;
        let exp_end = digits_from(exp_start);
        if exp_end > exp_start {
            end = exp_end;
            is_float = true;
        }
    }

    let numeric = &s[..end];
    if is_float {
        // `as` saturates
        return numeric.parse::<f64>().map_or(0, |f| f.trunc() as i64);
    }
    numeric.parse::<i64>().unwrap_or(if numeric.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Ordered key → scalar mapping of custom booking data. Iteration order is
/// insertion order, which is the order the host supplied the fields in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Replacing keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build from a JSON object, preserving key order. Non-objects yield an empty map.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut map = FieldMap::new();
        if let serde_json::Value::Object(obj) = value {
            for (k, v) in obj {
                map.insert(k.clone(), FieldValue::from_json(v));
            }
        }
        map
    }

    pub fn to_json(&self) -> serde_json::Value {
        let obj: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(obj)
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// The unit of aggregation and locking: one event at one start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotScope {
    pub event_id: EventId,
    pub slot_start: Ms,
}

impl SlotScope {
    pub fn new(event_id: EventId, slot_start: Ms) -> Self {
        Self { event_id, slot_start }
    }
}

impl fmt::Display for SlotScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {} @ {}", self.event_id, self.slot_start)
    }
}

/// A persisted booking as seen by the engine. Owned by the booking store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub event_id: EventId,
    pub event_kind: EventKind,
    pub slot_start: Ms,
    pub status: BookingStatus,
    pub fields: FieldMap,
}

impl Booking {
    pub fn scope(&self) -> SlotScope {
        SlotScope::new(self.event_id, self.slot_start)
    }
}

/// A not-yet-persisted booking as seen by the pre-create hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub event_kind: EventKind,
    pub event_id: EventId,
    pub slot_start: Option<Ms>,
}

/// Row returned by a scope query. Details are fetched separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRef {
    pub id: BookingId,
}

/// Derived on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateResult {
    pub scope: SlotScope,
    pub total: u32,
    /// Bookings whose details were loaded and summed.
    pub counted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit,
    Reject { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityReport {
    pub ceiling: u32,
    pub remaining: u32,
    pub attempted: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileDecision {
    Keep,
    Cancel(CapacityReport),
}

/// The WAL record format for the durable booking store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BookingUpserted { booking: Booking },
    StatusChanged { id: BookingId, status: BookingStatus },
    BookingRemoved { id: BookingId },
}
