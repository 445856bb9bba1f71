use crate::{status_page, AppState};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use serde_json::json;
use tracing::{debug, warn};
use webhook_database::queries;
use webhook_outbox::{DispatchError, SECRET_HEADER};

pub async fn receive_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());

    match state.dispatcher.handle_notification(presented, &body).await {
        Ok(outcome) => {
            debug!(?outcome, "Notification handled");
            (StatusCode::OK, "OK").into_response()
        }
        Err(DispatchError::Unauthorized) => {
            warn!("Rejected notification with missing or wrong secret");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

pub async fn status_page(State(state): State<AppState>) -> Html<String> {
    let counts = match state.db.call(queries::count_events_by_status).await {
        Ok(counts) => Some(counts),
        Err(e) => {
            warn!(error = %e, "Failed to count outbox rows for status page");
            None
        }
    };
    let now_ms = chrono::Utc::now().timestamp_millis();
    Html(status_page::render_status_page(&state.config, counts.as_ref(), now_ms))
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.db.call(queries::count_events_by_status).await {
        Ok(counts) => Json(json!({
            "ok": true,
            "outbox": counts,
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Health check could not read the outbox");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
