use std::convert::Infallible;

use axum::{
    extract::rejection::QueryRejection,
    extract::{Extension, Path, Query},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, patch},
    Router,
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{parse_id, query_params, ApiResponse};
use crate::auth::Actor;
use crate::error::{AppError, AppResult};
use crate::model::notification::Notification;
use crate::model::page::{Page, PageQuery, Paged};
use crate::state::AppState;

pub fn notification_router() -> Router {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/stream", get(notification_stream))
        .route("/api/notifications/:id/read", patch(mark_read))
}

async fn list_notifications(
    Extension(state): Extension<AppState>,
    actor: Actor,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Paged<Notification>>> {
    let page = Page::from(&query_params(query)?);
    let (items, total) = state.notifications.list_notifications(actor.id, page).await?;
    Ok(ApiResponse::ok(Paged::new(items, total, page)))
}

async fn mark_read(
    Extension(state): Extension<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Notification>> {
    let id = parse_id(&id, "notification")?;
    let notification = state
        .notifications
        .mark_notification_read(actor.id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Notification not found".into()))?;
    Ok(ApiResponse::ok(notification))
}

/// Live feed of the caller's push messages as server-sent events.
async fn notification_stream(
    Extension(state): Extension<AppState>,
    actor: Actor,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_id = actor.id;
    let receiver = state.hub.subscribe(user_id);
    debug!(%user_id, "push subscriber connected");

    let events = stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(message) => match Event::default().event(message.event).json_data(&message.payload) {
                    Ok(event) => return Some((Ok::<_, Infallible>(event), receiver)),
                    Err(err) => warn!(%user_id, error = %err, "unencodable push message dropped"),
                },
                Err(RecvError::Lagged(skipped)) => debug!(%user_id, skipped, "slow push subscriber skipped messages"),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
