use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::limits::*;
use crate::model::EventId;

pub const DEFAULT_CHILD_LIMIT: u32 = 10;
pub const DEFAULT_LIMITED_EVENT_IDS: &[EventId] = &[8];
pub const DEFAULT_FIELD_TOKEN: &str = "number_of_children";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    EmptyFieldToken,
    LimitExceeded(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::EmptyFieldToken => write!(f, "field matching token must not be empty"),
            ConfigError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which events are limited, the per-slot ceiling, and how the count field is found.
/// Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct EventLimitConfig {
    limited_events: HashSet<EventId>,
    ceiling: u32,
    /// Always lowercase.
    field_token: String,
    /// Upper bound on waiting for a slot lock. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl EventLimitConfig {
    pub fn new(
        limited_events: impl IntoIterator<Item = EventId>,
        ceiling: u32,
        field_token: &str,
    ) -> Result<Self, ConfigError> {
        let limited_events: HashSet<EventId> = limited_events.into_iter().collect();
        if limited_events.len() > MAX_LIMITED_EVENTS {
            return Err(ConfigError::LimitExceeded("too many limited events"));
        }
        let field_token = field_token.trim().to_lowercase();
        if field_token.is_empty() {
            return Err(ConfigError::EmptyFieldToken);
        }
        if field_token.len() > MAX_FIELD_TOKEN_LEN {
            return Err(ConfigError::LimitExceeded("field token too long"));
        }
        Ok(Self {
            limited_events,
            ceiling,
            field_token,
            lock_timeout: None,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn is_limited(&self, event_id: EventId) -> bool {
        self.limited_events.contains(&event_id)
    }

    /// One ceiling is shared by every limited event.
    pub fn ceiling_for(&self, _event_id: EventId) -> u32 {
        self.ceiling
    }

    pub fn field_token(&self) -> &str {
        &self.field_token
    }

    pub fn limited_events(&self) -> impl Iterator<Item = EventId> + '_ {
        self.limited_events.iter().copied()
    }

    /// Read `SLOTCAP_LIMITED_EVENT_IDS`, `SLOTCAP_CHILD_LIMIT`, `SLOTCAP_FIELD_TOKEN`
    /// and `SLOTCAP_LOCK_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let events = match lookup("SLOTCAP_LIMITED_EVENT_IDS") {
            Some(raw) => parse_event_ids(&raw)?,
            None => DEFAULT_LIMITED_EVENT_IDS.to_vec(),
        };
        let ceiling = match lookup("SLOTCAP_CHILD_LIMIT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "SLOTCAP_CHILD_LIMIT",
                value: raw.clone(),
            })?,
            None => DEFAULT_CHILD_LIMIT,
        };
        let token = lookup("SLOTCAP_FIELD_TOKEN").unwrap_or_else(|| DEFAULT_FIELD_TOKEN.into());
        let mut config = Self::new(events, ceiling, &token)?;
        if let Some(raw) = lookup("SLOTCAP_LOCK_TIMEOUT_MS") {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "SLOTCAP_LOCK_TIMEOUT_MS",
                value: raw.clone(),
            })?;
            config = config.with_lock_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

fn parse_event_ids(raw: &str) -> Result<Vec<EventId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::Invalid {
                var: "SLOTCAP_LIMITED_EVENT_IDS",
                value: s.to_string(),
            })
        })
        .collect()
}

/// Daemon settings. Not seen by the engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub token: Option<String>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: lookup("SLOTCAP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: lookup("SLOTCAP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(7433),
            data_dir: PathBuf::from(lookup("SLOTCAP_DATA_DIR").unwrap_or_else(|| "./data".into())),
            token: lookup("SLOTCAP_TOKEN").filter(|t| !t.is_empty()),
            max_connections: lookup("SLOTCAP_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            compact_threshold: lookup("SLOTCAP_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            metrics_port: lookup("SLOTCAP_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
