use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_LINE_BYTES;
use crate::model::*;
use crate::tenant::{TenantManager, TenantService};

/// One request line: `{"tenant": "...", "op": "...", ...}`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub tenant: String,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    UpsertResource {
        resource: Resource,
    },
    ProposeBooking {
        booking: Booking,
    },
    ProposeReschedule {
        booking_id: Ulid,
        proposed_start: Ms,
        #[serde(default)]
        proposed_resource_id: Option<Ulid>,
    },
    PreviewReschedule {
        booking_id: Ulid,
        proposed_start: Ms,
        #[serde(default)]
        proposed_resource_id: Option<Ulid>,
    },
    RequestTransition {
        booking_id: Ulid,
        to: BookingStatus,
    },
    CapacitySnapshot {
        resource_id: Ulid,
        probe: Span,
    },
    CapacityOverWindow {
        resource_id: Ulid,
        window_start: Ms,
        window_end: Ms,
        slot_size: Ms,
    },
    SaturatedSpans {
        resource_id: Ulid,
        window: Span,
    },
}

fn error_value(kind: &str, message: impl std::fmt::Display, retryable: bool) -> Value {
    json!({ "error": { "kind": kind, "message": message.to_string(), "retryable": retryable } })
}

fn engine_error(e: EngineError) -> Value {
    error_value(e.kind(), &e, e.is_retryable())
}

fn respond<T: serde::Serialize>(result: Result<T, EngineError>) -> Value {
    match result {
        Ok(v) => match serde_json::to_value(v) {
            Ok(v) => json!({ "ok": v }),
            Err(e) => error_value("internal", e, false),
        },
        Err(e) => engine_error(e),
    }
}

async fn execute(service: &TenantService, request: Request) -> Value {
    match request {
        Request::UpsertResource { resource } => {
            if resource.max_concurrent_bookings == 0 {
                return error_value(
                    "bad_request",
                    "max_concurrent_bookings must be at least 1",
                    false,
                );
            }
            let id = resource.id;
            let result = service
                .store()
                .upsert_resource(resource)
                .await
                .map(|()| json!({ "resource_id": id }))
                .map_err(EngineError::from);
            respond(result)
        }
        Request::ProposeBooking { booking } => respond(service.propose_booking(booking).await),
        Request::ProposeReschedule {
            booking_id,
            proposed_start,
            proposed_resource_id,
        } => respond(
            service
                .propose_reschedule(booking_id, proposed_start, proposed_resource_id)
                .await,
        ),
        Request::PreviewReschedule {
            booking_id,
            proposed_start,
            proposed_resource_id,
        } => respond(
            service
                .preview_reschedule(booking_id, proposed_start, proposed_resource_id)
                .await,
        ),
        Request::RequestTransition { booking_id, to } => {
            respond(service.request_transition(booking_id, to).await)
        }
        Request::CapacitySnapshot { resource_id, probe } => {
            respond(service.capacity_snapshot(resource_id, probe).await)
        }
        Request::CapacityOverWindow {
            resource_id,
            window_start,
            window_end,
            slot_size,
        } => respond(
            service
                .capacity_over_window(resource_id, window_start, window_end, slot_size)
                .await,
        ),
        Request::SaturatedSpans {
            resource_id,
            window,
        } => respond(service.saturated_spans(resource_id, window).await),
    }
}

/// Answer one request line.
pub async fn handle_line(tenants: &TenantManager, line: &str) -> Value {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            debug!("unparseable request: {e}");
            return error_value("bad_request", e, false);
        }
    };
    let service = match tenants.get_or_create(&envelope.tenant) {
        Ok(s) => s,
        Err(e) => return error_value("tenant", e, false),
    };
    execute(&service, envelope.request).await
}

/// Serve newline-delimited JSON requests until the reader hits EOF.
///
/// Responses are written in request order. A line longer than
/// `MAX_LINE_BYTES` is answered with an error and ends the session.
pub async fn process_stream<R, W>(
    reader: R,
    writer: W,
    tenants: Arc<TenantManager>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut out = FramedWrite::new(writer, LinesCodec::new());
    let mut served = 0u64;

    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_LINE_BYTES} bytes, closing");
                let reply = error_value("bad_request", "request line too long", false);
                out.send(reply.to_string()).await.map_err(codec_io)?;
                break;
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&tenants, &line).await;
        out.send(reply.to_string()).await.map_err(codec_io)?;
        served += 1;
    }
    info!("stream closed after {served} requests");
    Ok(())
}

fn codec_io(e: LinesCodecError) -> std::io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => std::io::Error::other(other),
    }
}
