use std::{future::Future, net::SocketAddr};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::{Extensions, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    access::{ensure_visible, require_admin, require_owner_or_admin},
    auth::{optional_viewer, require_viewer, Viewer},
    error::{AppError, AppResult},
    models::{InquiryType, Listing},
    repository::{
        listing_store::{
            bulk_approve, delete_listing, get_listing, insert_listing, list_listings,
            listing_stats, mutate_listing, set_moderation, ListingStats,
        },
        user_store::get_user,
    },
    schemas::{
        parse_json_body, parse_optional_body, parse_uuid, validate_input, CreateListingInput, InquiryInput,
        ListingDraft, ListingPath, ListingReadQuery, ListingsQuery, OwnerPath, RejectInput,
        TrackViewInput, UpdateListingInput,
    },
    services::{
        inquiries::record_inquiry,
        moderation::ModerationPatch,
        query_planner::{plan_listings, recent_plan, stats_filter, visibility_scope},
        reactions::{toggle_reaction, ReactionKind},
        views::{attribute_view, peek_view, ViewOutcome, Visitor},
    },
    state::AppState,
};

const SESSION_HEADER: &str = "x-session-id";

/// Detail collections only the owner and admins may read.
const PRIVATE_FIELDS: [&str; 5] = [
    "viewedBy",
    "anonymousViews",
    "likedBy",
    "savedBy",
    "inquiriesData",
];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/listing/get", axum::routing::get(list_listings_handler))
        .route("/listing/get/{id}", axum::routing::get(get_listing_handler))
        .route("/listing/create", axum::routing::post(create_listing))
        .route("/listing/delete/{id}", axum::routing::delete(remove_listing))
        .route("/listing/update/{id}", axum::routing::post(update_listing))
        .route("/listing/approve/{id}", axum::routing::post(approve_listing))
        .route("/listing/reject/{id}", axum::routing::post(reject_listing))
        .route(
            "/listing/bulk-approve",
            axum::routing::post(bulk_approve_listings),
        )
        .route("/listing/like/{id}", axum::routing::post(like_listing))
        .route("/listing/save/{id}", axum::routing::post(save_listing))
        .route("/listing/view/{id}", axum::routing::post(track_listing_view))
        .route("/listing/inquire/{id}", axum::routing::post(inquire_listing))
        .route("/listing/contact/{id}", axum::routing::get(listing_contact))
        .route("/listing/stats", axum::routing::get(listing_stats_handler))
        .route("/listing/recent", axum::routing::get(recent_listings))
        .route(
            "/listing/user/{user_id}",
            axum::routing::get(listings_by_owner),
        )
}

async fn list_listings_handler(
    State(state): State<AppState>,
    Query(query): Query<ListingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = optional_viewer(&state, &headers).await?;
    run_listing_query(&state, viewer.as_ref(), &query).await
}

async fn listings_by_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    Query(mut query): Query<ListingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = optional_viewer(&state, &headers).await?;
    query.user_ref = Some(path.user_id);
    run_listing_query(&state, viewer.as_ref(), &query).await
}

async fn run_listing_query(
    state: &AppState,
    viewer: Option<&Viewer>,
    query: &ListingsQuery,
) -> AppResult<Json<Value>> {
    let plan = plan_listings(viewer, query)?;
    let pool = db_pool(state)?;
    let (listings, total) = list_listings(pool, &plan).await?;

    let shaped = listings
        .iter()
        .map(|listing| shape_for(viewer, listing))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({
        "success": true,
        "listings": shaped,
        "total": total,
        "limit": plan.limit,
        "startIndex": plan.offset,
    })))
}

async fn get_listing_handler(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    Query(query): Query<ListingReadQuery>,
    headers: HeaderMap,
    extensions: Extensions,
) -> AppResult<Json<Value>> {
    let viewer = optional_viewer(&state, &headers).await?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(&state)?;

    let (listing, outcome) = if query.track_view == Some(false) {
        let listing = get_listing(pool, listing_id).await?;
        ensure_visible(viewer.as_ref(), &listing)?;
        (listing, ViewOutcome::Skipped)
    } else {
        let visitor = visitor_for(
            viewer.as_ref(),
            &headers,
            &extensions,
            query.session_id.as_deref(),
        );
        record_view(
            &state,
            pool,
            listing_id,
            viewer.as_ref(),
            &visitor,
            query.admin_panel.unwrap_or(false),
        )
        .await?
    };

    let mut body = json!({
        "success": true,
        "listing": shape_for(viewer.as_ref(), &listing)?,
        "viewTracked": outcome.recorded(),
    });
    if let (Some(viewer), Some(object)) = (viewer.as_ref(), body.as_object_mut()) {
        object.insert(
            "likedByViewer".to_string(),
            Value::Bool(listing.is_liked_by(&viewer.id)),
        );
        object.insert(
            "savedByViewer".to_string(),
            Value::Bool(listing.is_saved_by(&viewer.id)),
        );
    }
    Ok(Json(body))
}

async fn create_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let viewer = require_viewer(&state, &headers).await?;
    let payload: CreateListingInput = parse_json_body(&body)?;
    let owner = parse_uuid(&viewer.id, "user id")?;
    if let Some(user_ref) = payload.user_ref.as_deref().map(str::trim) {
        if !user_ref.is_empty() && Uuid::parse_str(user_ref).ok() != Some(owner) {
            return Err(AppError::Forbidden(
                "Forbidden: you can only create listings for your own account.".to_string(),
            ));
        }
    }
    let draft = payload.into_draft();
    validate_input(&draft)?;
    let pool = db_pool(&state)?;

    let moderation = ModerationPatch::on_create(&viewer, Utc::now());
    let created = insert_listing(pool, &draft, owner, &moderation).await?;
    state.public_reads_cache.clear();
    tracing::info!(
        listing_id = %created.id,
        user_id = %viewer.id,
        approved = created.approved,
        "Listing created"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "listing": created })),
    ))
}

async fn remove_listing(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(&state)?;

    let listing = get_listing(pool, listing_id).await?;
    ensure_visible(Some(&viewer), &listing)?;
    require_owner_or_admin(&viewer, &listing)?;
    delete_listing(pool, listing_id).await?;
    state.public_reads_cache.clear();
    tracing::info!(listing_id = %listing_id, user_id = %viewer.id, "Listing deleted");

    Ok(Json(json!({
        "success": true,
        "message": "Listing has been deleted.",
    })))
}

async fn update_listing(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    let payload: UpdateListingInput = parse_json_body(&body)?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(&state)?;
    let now = Utc::now();

    if payload.approved.is_some() && !viewer.is_admin {
        tracing::warn!(
            listing_id = %listing_id,
            user_id = %viewer.id,
            "Ignoring approval flag sent by non-admin"
        );
    }

    let (updated, ()) = mutate_listing(pool, listing_id, |listing| {
        ensure_visible(Some(&viewer), listing)?;
        require_owner_or_admin(&viewer, listing)?;
        if let Some(user_ref) = payload.user_ref.as_deref().map(str::trim) {
            if !user_ref.is_empty()
                && Uuid::parse_str(user_ref).ok() != Uuid::parse_str(&listing.user_ref).ok()
            {
                return Err(AppError::BadRequest(
                    "The listing owner cannot be changed.".to_string(),
                ));
            }
        }

        let draft = payload.merge_into(ListingDraft::from_listing(listing));
        validate_input(&draft)?;
        draft.write_into(listing);

        if let Some(patch) = ModerationPatch::for_update(&viewer, payload.approved, listing, now) {
            patch.apply(listing);
        }
        listing.updated_at = now;
        Ok(((), true))
    })
    .await?;

    state.public_reads_cache.clear();
    tracing::info!(listing_id = %listing_id, user_id = %viewer.id, "Listing updated");
    Ok(Json(json!({ "success": true, "listing": updated })))
}

async fn approve_listing(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    let now = Utc::now();
    let patch = ModerationPatch::approve(&viewer, now)?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(&state)?;

    let listing = set_moderation(pool, listing_id, &patch, now).await?;
    state.public_reads_cache.clear();
    tracing::info!(listing_id = %listing_id, admin_id = %viewer.id, "Listing approved");

    Ok(Json(json!({
        "success": true,
        "message": "Listing approved.",
        "listing": listing,
    })))
}

async fn reject_listing(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    require_admin(&viewer)?;
    let input: RejectInput = parse_optional_body(&body)?;
    validate_input(&input)?;
    let patch = ModerationPatch::reject(&viewer, input.reason.as_deref())?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(&state)?;

    let listing = set_moderation(pool, listing_id, &patch, Utc::now()).await?;
    state.public_reads_cache.clear();
    tracing::info!(
        listing_id = %listing_id,
        admin_id = %viewer.id,
        reason = patch.rejection_reason.as_deref().unwrap_or_default(),
        "Listing rejected"
    );

    Ok(Json(json!({
        "success": true,
        "message": "Listing rejected.",
        "listing": listing,
    })))
}

async fn bulk_approve_listings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    require_admin(&viewer)?;
    let admin_id = parse_uuid(&viewer.id, "user id")?;
    let pool = db_pool(&state)?;

    let modified = bulk_approve(pool, admin_id, Utc::now()).await?;
    state.public_reads_cache.clear();
    tracing::info!(admin_id = %viewer.id, modified, "Bulk approved pending listings");

    Ok(Json(json!({
        "success": true,
        "message": format!("Approved {modified} listings."),
        "modifiedCount": modified,
    })))
}

async fn like_listing(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    toggle(&state, &path, &headers, ReactionKind::Like).await
}

async fn save_listing(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    toggle(&state, &path, &headers, ReactionKind::Save).await
}

async fn toggle(
    state: &AppState,
    path: &ListingPath,
    headers: &HeaderMap,
    kind: ReactionKind,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(state, headers).await?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(state)?;
    let now = Utc::now();

    let (_, outcome) = mutate_listing(pool, listing_id, |listing| {
        ensure_visible(Some(&viewer), listing)?;
        Ok((toggle_reaction(listing, kind, &viewer.id, now), true))
    })
    .await?;
    tracing::debug!(
        listing_id = %listing_id,
        user_id = %viewer.id,
        reaction = kind.as_str(),
        active = outcome.active,
        "Reaction toggled"
    );

    Ok(Json(match kind {
        ReactionKind::Like => json!({
            "success": true,
            "liked": outcome.active,
            "likes": outcome.count,
        }),
        ReactionKind::Save => json!({
            "success": true,
            "saved": outcome.active,
            "saves": outcome.count,
        }),
    }))
}

async fn track_listing_view(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let viewer = optional_viewer(&state, &headers).await?;
    let input: TrackViewInput = parse_optional_body(&body)?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(&state)?;

    let visitor = visitor_for(
        viewer.as_ref(),
        &headers,
        &extensions,
        input.session_id.as_deref(),
    );
    let (listing, outcome) = record_view(
        &state,
        pool,
        listing_id,
        viewer.as_ref(),
        &visitor,
        input.admin_panel.unwrap_or(false),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "viewTracked": outcome.recorded(),
        "views": listing.views,
    })))
}

/// Shared by the single fetch and the explicit view endpoint so both apply
/// the same dedup key.
async fn record_view(
    state: &AppState,
    pool: &sqlx::PgPool,
    listing_id: Uuid,
    viewer: Option<&Viewer>,
    visitor: &Visitor,
    admin_panel: bool,
) -> AppResult<(Listing, ViewOutcome)> {
    let policy = state.view_policy;
    let now = Utc::now();

    // Skips and repeat views are answered from an unlocked read; only a view
    // that will be recorded takes the row lock.
    let current = get_listing(pool, listing_id).await?;
    ensure_visible(viewer, &current)?;
    let outcome = peek_view(&current, visitor, admin_panel, &policy, now);
    if !outcome.recorded() {
        return Ok((current, outcome));
    }

    let (listing, outcome) = mutate_listing(pool, listing_id, |listing| {
        ensure_visible(viewer, listing)?;
        let outcome = attribute_view(listing, visitor, admin_panel, &policy, now);
        Ok((outcome, outcome.recorded()))
    })
    .await?;
    if outcome.recorded() {
        tracing::debug!(listing_id = %listing_id, views = listing.views, "View recorded");
    }
    Ok((listing, outcome))
}

async fn inquire_listing(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    let input: InquiryInput = parse_optional_body(&body)?;
    validate_input(&input)?;
    let kind =
        InquiryType::parse_lenient(input.kind.as_deref()).map_err(AppError::UnprocessableEntity)?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(&state)?;
    let now = Utc::now();

    let (listing, inquiry) = mutate_listing(pool, listing_id, |listing| {
        ensure_visible(Some(&viewer), listing)?;
        let inquiry = record_inquiry(listing, &viewer.id, kind, input.message.as_deref(), now);
        Ok((inquiry, true))
    })
    .await?;
    tracing::info!(listing_id = %listing_id, user_id = %viewer.id, "Inquiry recorded");

    Ok(Json(json!({
        "success": true,
        "inquiry": inquiry,
        "inquiries": listing.inquiries,
    })))
}

async fn listing_contact(
    State(state): State<AppState>,
    Path(path): Path<ListingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = optional_viewer(&state, &headers).await?;
    let listing_id = parse_uuid(&path.id, "listing id")?;
    let pool = db_pool(&state)?;

    let listing = get_listing(pool, listing_id).await?;
    ensure_visible(viewer.as_ref(), &listing)?;
    let owner_id = parse_uuid(&listing.user_ref, "owner id")?;
    let owner = get_user(pool, owner_id).await.map_err(|error| match error {
        AppError::NotFound(_) => AppError::NotFound("Listing owner not found.".to_string()),
        other => other,
    })?;

    Ok(Json(json!({
        "success": true,
        "contact": {
            "username": owner.username,
            "email": owner.email,
            "avatar": owner.avatar,
        },
    })))
}

async fn listing_stats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = optional_viewer(&state, &headers).await?;
    let scope = visibility_scope(viewer.as_ref());
    let filter = stats_filter(viewer.as_ref());
    let pool = db_pool(&state)?;

    cached_read(&state, format!("stats:{scope}"), async {
        let stats = listing_stats(pool, &filter).await?;
        Ok(json!({ "success": true, "stats": stats_body(scope, &stats) }))
    })
    .await
}

/// Public stats only count approved listings, so `pending` is admin-only.
fn stats_body(scope: &str, stats: &ListingStats) -> Value {
    let mut body = json!({
        "total": stats.total,
        "approved": stats.approved,
        "byType": { "rent": stats.rent, "sale": stats.sale },
        "totalValue": stats.total_value,
    });
    if scope == "admin" {
        if let Some(object) = body.as_object_mut() {
            object.insert("pending".to_string(), json!(stats.pending));
        }
    }
    body
}

async fn recent_listings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = optional_viewer(&state, &headers).await?;
    let scope = visibility_scope(viewer.as_ref());
    let plan = recent_plan(viewer.as_ref());
    let pool = db_pool(&state)?;
    // Cached per scope, so shape for the scope rather than the caller.
    let scope_viewer = viewer.filter(|viewer| viewer.is_admin);

    cached_read(&state, format!("recent:{scope}"), async {
        let (listings, _) = list_listings(pool, &plan).await?;
        let shaped = listings
            .iter()
            .map(|listing| shape_for(scope_viewer.as_ref(), listing))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(json!({ "success": true, "listings": shaped }))
    })
    .await
}

async fn cached_read<F>(state: &AppState, cache_key: String, fill: F) -> AppResult<Json<Value>>
where
    F: Future<Output = AppResult<Value>>,
{
    let cache = &state.public_reads_cache;
    if let Some(cached) = cache.get(&cache_key).await {
        return Ok(Json(cached));
    }

    let key_lock = cache.key_lock(&cache_key).await;
    let _guard = key_lock.lock().await;

    if let Some(cached) = cache.get(&cache_key).await {
        return Ok(Json(cached));
    }

    let response = fill.await?;
    cache.put(cache_key, response.clone()).await;
    Ok(Json(response))
}

fn visitor_for(
    viewer: Option<&Viewer>,
    headers: &HeaderMap,
    extensions: &Extensions,
    session_fallback: Option<&str>,
) -> Visitor {
    let ip = client_ip(headers, extensions);
    let user_agent = header_value(headers, "user-agent");
    match viewer {
        Some(viewer) => Visitor::Authenticated {
            user_id: viewer.id.clone(),
            ip,
            user_agent,
        },
        None => Visitor::Anonymous {
            ip,
            user_agent,
            session_token: header_value(headers, SESSION_HEADER).or_else(|| {
                session_fallback
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(ToOwned::to_owned)
            }),
        },
    }
}

fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|value| {
            value
                .split(',')
                .next()
                .map(str::trim)
                .filter(|first| !first.is_empty())
                .map(ToOwned::to_owned)
        })
        .or_else(|| header_value(headers, "x-real-ip"))
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

/// Full record for the owner and admins; counters without the detail
/// collections for everyone else.
fn shape_for(viewer: Option<&Viewer>, listing: &Listing) -> AppResult<Value> {
    let mut value = serde_json::to_value(listing)
        .map_err(|error| AppError::Internal(format!("Could not encode listing: {error}")))?;
    let privileged =
        viewer.is_some_and(|viewer| viewer.is_admin || listing.is_owned_by(&viewer.id));
    if !privileged {
        if let Some(object) = value.as_object_mut() {
            for field in PRIVATE_FIELDS {
                object.remove(field);
            }
        }
    }
    Ok(value)
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}
