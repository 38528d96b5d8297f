//! ActivityPub endpoints
//!
//! - Actor profile
//! - Inbox (activity receiving)
//! - Outbox
//! - Followers/Following collections

use axum::body::Bytes;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::AppError;
use crate::federation::dto::{ActivityEnvelope, InboundActivity};
use crate::federation::{InboxOutcome, SignatureCheck};
use crate::metrics::{ACTIVITYPUB_ACTIVITIES_RECEIVED, SIGNATURE_PROBLEMS_TOTAL};

const ACTIVITY_JSON: &str = "application/activity+json; charset=utf-8";

/// Create ActivityPub router
///
/// Routes:
/// - GET /u/:handle - Actor profile
/// - POST /u/:handle/inbox - Personal inbox
/// - POST /inbox - Shared inbox
/// - GET /u/:handle/outbox - Outbox
/// - GET /u/:handle/followers - Followers collection
/// - GET /u/:handle/following - Following collection
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/u/:handle", get(actor))
        .route("/u/:handle/inbox", post(inbox))
        .route("/inbox", post(shared_inbox))
        .route("/u/:handle/outbox", get(outbox))
        .route("/u/:handle/followers", get(followers))
        .route("/u/:handle/following", get(following))
}

fn activity_json<T: Serialize>(document: Option<T>) -> Result<Response, AppError> {
    let document = document.ok_or(AppError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, ACTIVITY_JSON)], Json(document)).into_response())
}

/// GET /u/:handle
///
/// Returns ActivityPub Actor document.
async fn actor(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Response, AppError> {
    activity_json(state.directory.get_user_info(&handle).await?)
}

#[derive(Debug, Deserialize)]
struct OutboxQuery {
    page: Option<String>,
}

/// GET /u/:handle/outbox
///
/// Summary by default, the most recent statuses with `?page=true`.
async fn outbox(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Query(query): Query<OutboxQuery>,
) -> Result<Response, AppError> {
    if query.page.is_some() {
        activity_json(state.directory.get_outbox_page(&handle).await?)
    } else {
        activity_json(state.directory.get_outbox_summary(&handle).await?)
    }
}

/// GET /u/:handle/followers
async fn followers(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Response, AppError> {
    activity_json(state.directory.get_followers_summary(&handle).await?)
}

/// GET /u/:handle/following
async fn following(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Response, AppError> {
    activity_json(state.directory.get_following_summary(&handle).await?)
}

/// POST /u/:handle/inbox
///
/// Receives incoming ActivityPub activities for one account.
async fn inbox(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let handle = handle.to_lowercase();
    if !state.repo.does_account_exist(&handle).await? {
        return Err(AppError::NotFound);
    }
    receive(&state, Some(&handle), &uri, &headers, &body).await
}

/// POST /inbox
///
/// Shared inbox for all accounts on this instance.
async fn shared_inbox(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    receive(&state, None, &uri, &headers, &body).await
}

/// Inbound gate shared by both inboxes
///
/// # Steps
/// 1. Read the envelope (type and actor)
/// 2. Verify the HTTP signature
/// 3. Require the signer to be the claimed actor
/// 4. Decode the full activity and dispatch it
async fn receive(
    state: &AppState,
    inbox_handle: Option<&str>,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, AppError> {
    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;
    let envelope: ActivityEnvelope = serde_json::from_value(payload.clone())
        .map_err(|e| AppError::Validation(format!("Invalid activity: {}", e)))?;

    let path_and_query = uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_else(|| uri.path());

    let signer = match state
        .signatures
        .check("POST", path_and_query, headers, body)
        .await?
    {
        SignatureCheck::Verified(signer) => signer,
        SignatureCheck::Problem(problem) => {
            // Deletes of accounts whose keys are already gone cannot verify
            if envelope.kind == "Delete" {
                tracing::debug!(actor = %envelope.actor, "Dropping unverifiable Delete");
                return Ok(StatusCode::OK);
            }
            SIGNATURE_PROBLEMS_TOTAL.inc();
            tracing::warn!(
                actor = %envelope.actor,
                activity_type = %envelope.kind,
                problem = %problem,
                "Rejected inbound signature"
            );
            return Err(AppError::InvalidSignature);
        }
    };

    if signer.actor_url != envelope.actor {
        tracing::warn!(
            signer = %signer.actor_url,
            actor = %envelope.actor,
            "Signer is not the activity actor"
        );
        return Err(AppError::Unauthorized);
    }

    ACTIVITYPUB_ACTIVITIES_RECEIVED
        .with_label_values(&[&envelope.kind])
        .inc();

    let activity = InboundActivity::decode(&envelope, payload).map_err(AppError::Validation)?;

    match state.inbox.process(inbox_handle, &signer, activity).await? {
        InboxOutcome::Handled | InboxOutcome::Ignored => Ok(StatusCode::OK),
        InboxOutcome::Problem(problem) => {
            tracing::info!(
                actor = %signer.actor_url,
                activity_type = %envelope.kind,
                problem = %problem,
                "Inbound activity refused"
            );
            Err(AppError::Validation(problem))
        }
    }
}
