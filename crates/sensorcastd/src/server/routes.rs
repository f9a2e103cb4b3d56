//! HTTP routes of the streaming gateway.
//!
//! - `GET /` lists every sensor name as a JSON array
//! - `GET /{sensor}` streams that sensor's readings, one JSON record per line
//! - `OPTIONS` on any path answers a CORS preflight
//! - anything else is 404
//!
//! A stream response owns one [`Subscription`]. When the client goes away
//! hyper drops the response body, which drops the subscription and
//! removes it from the sensor's stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use sensorcast_protocol::headers::{
    ALLOWED_METHODS, ALLOW_ORIGIN_ANY, CONTENT_TYPE_NDJSON,
};
use sensorcast_protocol::{ReadingRecord, SensorList};

use crate::registry::StreamRegistry;
use crate::stream::Subscription;

/// Shared state of every route.
#[derive(Clone)]
pub struct GatewayState {
    registry: Arc<StreamRegistry>,
    shutdown: CancellationToken,
}

impl GatewayState {
    /// Creates route state. Open streams end when `shutdown` is cancelled.
    pub fn new(registry: Arc<StreamRegistry>, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }
}

/// Builds the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route(
            "/",
            get(list_sensors).options(preflight).fallback(not_found),
        )
        .route(
            "/:sensor",
            get(stream_sensor).options(preflight).fallback(not_found),
        )
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /`
async fn list_sensors(State(state): State<GatewayState>) -> Response {
    let list = SensorList(state.registry.sensor_names().to_vec());
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW_ORIGIN_ANY)],
        Json(list),
    )
        .into_response()
}

/// `GET /{sensor}`
async fn stream_sensor(
    State(state): State<GatewayState>,
    Path(sensor): Path<String>,
) -> Response {
    let stream = match state.registry.lookup(&sensor) {
        Ok(stream) => stream,
        Err(e) => {
            debug!(sensor = %sensor, error = %e, "Subscription to unknown sensor");
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };

    let subscription = stream.subscribe();
    info!(
        sensor = %sensor,
        subscription = %subscription.id(),
        "Subscriber connected"
    );

    let body = Body::from_stream(reading_lines(subscription, state.shutdown.clone()));

    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE_NDJSON),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW_ORIGIN_ANY),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// `OPTIONS` on any path.
async fn preflight(headers: HeaderMap) -> Response {
    preflight_response(&headers)
}

fn preflight_response(headers: &HeaderMap) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let out = response.headers_mut();

    out.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN_ANY),
    );
    out.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    if let Some(requested) = headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        out.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }

    response
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Paths with no route: preflight for `OPTIONS`, 404 otherwise.
async fn fallback(method: Method, headers: HeaderMap) -> Response {
    if method == Method::OPTIONS {
        preflight_response(&headers)
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// One open stream response.
struct Relay {
    subscription: Subscription,
    shutdown: CancellationToken,
    sent: u64,
}

impl Drop for Relay {
    fn drop(&mut self) {
        info!(
            sensor = %self.subscription.sensor(),
            subscription = %self.subscription.id(),
            sent = self.sent,
            "Subscriber disconnected"
        );
    }
}

/// Turns a subscription into newline-delimited JSON records.
///
/// Ends on shutdown so graceful shutdown is not held open by live streams.
fn reading_lines(
    subscription: Subscription,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
    let relay = Relay {
        subscription,
        shutdown,
        sent: 0,
    };

    futures::stream::unfold(relay, |mut relay| async move {
        loop {
            let reading = tokio::select! {
                biased;
                _ = relay.shutdown.cancelled() => None,
                reading = relay.subscription.recv() => reading,
            }?;

            match ReadingRecord::from(reading).to_line() {
                Ok(line) => {
                    relay.sent += 1;
                    return Some((Ok(line), relay));
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize reading");
                }
            }
        }
    })
}
