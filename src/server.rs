//! Hook daemon protocol: one JSON request per line, one JSON response per line.
//!
//! ```text
//! {"op":"pre_create","event_kind":"group","event_id":8,"slot_start":1767261600000}
//! {"status":200,"decision":"admit"}
//! ```

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::auth::TokenAuth;
use crate::engine::EngineError;
use crate::hooks::{HookOutcome, LifecycleHooks};
use crate::limits::*;
use crate::model::*;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    token: Option<String>,
    #[serde(flatten)]
    request: Request,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    PreCreate {
        event_kind: String,
        event_id: EventId,
        #[serde(default)]
        slot_start: Option<Ms>,
    },
    PostUpdate {
        booking: BookingPayload,
    },
    SyncStatus {
        id: BookingId,
        status: BookingStatus,
    },
    Remove {
        id: BookingId,
    },
    SlotTotal {
        event_id: EventId,
        slot_start: Ms,
    },
}

impl Request {
    fn label(&self) -> &'static str {
        match self {
            Request::PreCreate { .. } => "pre_create",
            Request::PostUpdate { .. } => "post_update",
            Request::SyncStatus { .. } => "sync_status",
            Request::Remove { .. } => "remove",
            Request::SlotTotal { .. } => "slot_total",
        }
    }
}

fn default_status() -> BookingStatus {
    BookingStatus::Scheduled
}

/// A booking as the host reports it after saving its custom fields.
#[derive(Debug, PartialEq, Deserialize)]
pub struct BookingPayload {
    /// Assigned by the daemon when absent.
    #[serde(default)]
    pub id: Option<BookingId>,
    pub event_id: EventId,
    pub event_kind: String,
    pub slot_start: Ms,
    #[serde(default = "default_status")]
    pub status: BookingStatus,
    #[serde(default)]
    pub fields: Value,
}

impl BookingPayload {
    fn into_booking(self) -> Result<Booking, &'static str> {
        validate_fields(&self.fields)?;
        Ok(Booking {
            id: self.id.unwrap_or_else(Ulid::new),
            event_id: self.event_id,
            event_kind: EventKind::from(self.event_kind),
            slot_start: self.slot_start,
            status: self.status,
            fields: FieldMap::from_json(&self.fields),
        })
    }
}

fn validate_fields(fields: &Value) -> Result<(), &'static str> {
    let obj = match fields {
        Value::Object(obj) => obj,
        Value::Null => return Ok(()),
        _ => return Err("fields must be an object"),
    };
    if obj.len() > MAX_FIELDS_PER_BOOKING {
        return Err("too many fields");
    }
    for (key, value) in obj {
        if key.len() > MAX_FIELD_KEY_LEN {
            return Err("field key too long");
        }
        if matches!(value, Value::String(s) if s.len() > MAX_FIELD_TEXT_LEN) {
            return Err("field value too long");
        }
    }
    Ok(())
}

fn error_response(status: u16, message: impl std::fmt::Display) -> Value {
    json!({ "status": status, "error": message.to_string() })
}

fn engine_err(e: EngineError) -> Value {
    warn!("hook failed: {e}");
    let status = match e {
        EngineError::StoreUnavailable(_) | EngineError::LockTimeout(_) => 503,
        EngineError::LimitExceeded(_) => 500,
    };
    error_response(status, e)
}

fn rejection_body(outcome: HookOutcome, decision: &str, id: Option<BookingId>) -> Value {
    let mut body = match outcome {
        HookOutcome::Proceed => json!({ "status": 200 }),
        HookOutcome::Reject(rejection) => match serde_json::to_value(&rejection) {
            Ok(v) => v,
            Err(e) => return error_response(500, e),
        },
    };
    body["decision"] = Value::from(decision);
    if let Some(id) = id {
        body["id"] = Value::from(id.to_string());
    }
    body
}

/// Execute one decoded request.
pub async fn execute(hooks: &LifecycleHooks, request: Request) -> Value {
    let store = hooks.engine().store();
    match request {
        Request::PreCreate {
            event_kind,
            event_id,
            slot_start,
        } => {
            let req = BookingRequest {
                event_kind: EventKind::from(event_kind),
                event_id,
                slot_start,
            };
            match hooks.before_create(&req).await {
                Ok(outcome @ HookOutcome::Proceed) => rejection_body(outcome, "admit", None),
                Ok(outcome) => rejection_body(outcome, "reject", None),
                Err(e) => engine_err(e),
            }
        }
        Request::PostUpdate { booking } => {
            let mut booking = match booking.into_booking() {
                Ok(b) => b,
                Err(msg) => return error_response(400, msg),
            };
            if let Err(e) = store.save(&booking).await {
                return engine_err(e.into());
            }
            let id = booking.id;
            match hooks.after_meta_update(&mut booking).await {
                Ok(outcome @ HookOutcome::Proceed) => rejection_body(outcome, "keep", Some(id)),
                Ok(outcome) => rejection_body(outcome, "cancel", Some(id)),
                Err(e) => engine_err(e),
            }
        }
        Request::SyncStatus { id, status } => {
            let mut booking = match store.get(id).await {
                Ok(Some(b)) => b,
                Ok(None) => return error_response(404, format!("unknown booking {id}")),
                Err(e) => return engine_err(e.into()),
            };
            booking.status = status;
            match store.save(&booking).await {
                Ok(()) => json!({ "status": 200, "id": id.to_string(), "booking_status": status }),
                Err(e) => engine_err(e.into()),
            }
        }
        Request::Remove { id } => match store.remove(id).await {
            Ok(true) => json!({ "status": 200, "id": id.to_string() }),
            Ok(false) => error_response(404, format!("unknown booking {id}")),
            Err(e) => engine_err(e.into()),
        },
        Request::SlotTotal {
            event_id,
            slot_start,
        } => {
            let engine = hooks.engine();
            match engine.aggregate(SlotScope::new(event_id, slot_start), None).await {
                Ok(agg) => json!({
                    "status": 200,
                    "total": agg.total,
                    "counted": agg.counted,
                    "ceiling": engine.config().ceiling_for(event_id),
                    "limited": engine.config().is_limited(event_id),
                }),
                Err(e) => engine_err(e),
            }
        }
    }
}

async fn handle_line(hooks: &LifecycleHooks, auth: &TokenAuth, line: &str) -> Value {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(env) => env,
        Err(e) => return error_response(400, format!("malformed request: {e}")),
    };
    if !auth.verify(envelope.token.as_deref()) {
        metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
        return error_response(401, "invalid token");
    }

    let op = envelope.request.label();
    let start = Instant::now();
    let response = execute(hooks, envelope.request).await;
    let status = response["status"].as_u64().unwrap_or(0).to_string();
    metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => op, "status" => status)
        .increment(1);
    debug!(op, %response, "hook handled");
    response
}

/// Serve one connection until the peer closes it.
pub async fn process_connection<S>(
    socket: S,
    hooks: Arc<LifecycleHooks>,
    auth: Arc<TokenAuth>,
) -> Result<(), std::io::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_LEN));
    // After a decode error the stream yields one `None` before it reads again.
    let mut resume = false;
    loop {
        let frame = match lines.next().await {
            Some(frame) => frame,
            None if resume => {
                resume = false;
                continue;
            }
            None => break,
        };
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&hooks, &auth, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                // The codec discards the rest of the line; later requests still get served.
                resume = true;
                error_response(400, "request line too long")
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        lines.send(response.to_string()).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            LinesCodecError::MaxLineLengthExceeded => std::io::Error::other("response line too long"),
        })?;
    }
    Ok(())
}
