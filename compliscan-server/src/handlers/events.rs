use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use compliscan_core::{notify::ClientMessage, types::JobId};
use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::infra::{app_state::AppState, errors::AppResult, tenant::Tenant};

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}

fn event_name(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Connected(_) => "connected",
        ClientMessage::Update(_) => "progress",
        ClientMessage::Complete(_) => "complete",
    }
}

/// Live progress for one scan as server-sent events. The stream closes after
/// the terminal event.
pub async fn scan_events_handler(
    Tenant(tenant_id): Tenant,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let feed = state.notifications.connect(tenant_id, job_id).await?;

    let stream = feed.filter_map(move |message| async move {
        match Event::default().event(event_name(&message)).json_data(&message) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "failed to encode progress event");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(default_keep_alive()))
}
