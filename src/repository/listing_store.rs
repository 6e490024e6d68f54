use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{postgres::PgRow, types::Json, PgConnection, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::{
    error::{map_db_error, AppError, AppResult},
    models::Listing,
    schemas::ListingDraft,
    services::{
        moderation::ModerationPatch,
        query_planner::{ListingFilter, ListingPlan},
    },
};

const SELECT_LISTING: &str = "SELECT row_to_json(t) AS row FROM listings t";

pub async fn insert_listing(
    pool: &PgPool,
    draft: &ListingDraft,
    owner: Uuid,
    moderation: &ModerationPatch,
) -> AppResult<Listing> {
    let approved_by = moderation
        .approved_by
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|_| AppError::BadRequest("Invalid approver id.".to_string()))?;

    let row = sqlx::query(
        "INSERT INTO listings (
             name, description, address, listing_type, regular_price, discount_price,
             currency, bedrooms, bathrooms, furnished, parking, offer, image_urls, user_ref,
             approved, rejection_reason, approved_at, approved_by
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
         RETURNING row_to_json(listings.*) AS row",
    )
    .bind(&draft.name)
    .bind(&draft.description)
    .bind(&draft.address)
    .bind(draft.listing_type.as_str())
    .bind(draft.regular_price)
    .bind(draft.discount_price)
    .bind(draft.currency.as_str())
    .bind(draft.bedrooms)
    .bind(draft.bathrooms)
    .bind(draft.furnished)
    .bind(draft.parking)
    .bind(draft.offer)
    .bind(&draft.image_urls)
    .bind(owner)
    .bind(moderation.approved)
    .bind(moderation.rejection_reason.as_deref())
    .bind(moderation.approved_at)
    .bind(approved_by)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;

    decode_row(row)
}

pub async fn get_listing(pool: &PgPool, listing_id: Uuid) -> AppResult<Listing> {
    let row = sqlx::query(&format!("{SELECT_LISTING} WHERE t.id = $1"))
        .bind(listing_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    row.map(decode_row)
        .transpose()?
        .ok_or_else(|| AppError::NotFound("Listing not found.".to_string()))
}

/// Lock the row, hand it to `apply`, and persist only when `apply` reports
/// a change. Counters and their detail collections are written in the same
/// statement, and concurrent writers to one listing queue on the row lock.
pub async fn mutate_listing<R, F>(pool: &PgPool, listing_id: Uuid, apply: F) -> AppResult<(Listing, R)>
where
    F: FnOnce(&mut Listing) -> AppResult<(R, bool)>,
{
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let row = sqlx::query(&format!("{SELECT_LISTING} WHERE t.id = $1 FOR UPDATE"))
        .bind(listing_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?;
    let mut listing = row
        .map(decode_row)
        .transpose()?
        .ok_or_else(|| AppError::NotFound("Listing not found.".to_string()))?;

    let (outcome, changed) = apply(&mut listing)?;
    if !changed {
        tx.rollback().await.map_err(map_db_error)?;
        return Ok((listing, outcome));
    }

    if !listing.counters_consistent() {
        tracing::error!(listing_id = %listing_id, "Engagement counters drifted from their collections");
        tx.rollback().await.map_err(map_db_error)?;
        return Err(AppError::Internal(
            "Engagement counters do not match their collections.".to_string(),
        ));
    }

    let saved = write_listing(&mut tx, listing_id, &listing).await?;
    tx.commit().await.map_err(map_db_error)?;
    Ok((saved, outcome))
}

async fn write_listing(
    conn: &mut PgConnection,
    listing_id: Uuid,
    listing: &Listing,
) -> AppResult<Listing> {
    let approved_by = listing
        .approved_by
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|_| AppError::Internal("Stored approver id is not a uuid.".to_string()))?;

    let row = sqlx::query(
        "UPDATE listings SET
             name = $2, description = $3, address = $4, listing_type = $5,
             regular_price = $6, discount_price = $7, currency = $8,
             bedrooms = $9, bathrooms = $10, furnished = $11, parking = $12, offer = $13,
             image_urls = $14,
             approved = $15, rejection_reason = $16, approved_at = $17, approved_by = $18,
             views = $19, likes = $20, saves = $21, inquiries = $22,
             viewed_by = $23, anonymous_views = $24, liked_by = $25, saved_by = $26,
             inquiries_data = $27,
             updated_at = $28
         WHERE id = $1
         RETURNING row_to_json(listings.*) AS row",
    )
    .bind(listing_id)
    .bind(&listing.name)
    .bind(&listing.description)
    .bind(&listing.address)
    .bind(listing.listing_type.as_str())
    .bind(listing.regular_price)
    .bind(listing.discount_price)
    .bind(listing.currency.as_str())
    .bind(listing.bedrooms)
    .bind(listing.bathrooms)
    .bind(listing.furnished)
    .bind(listing.parking)
    .bind(listing.offer)
    .bind(&listing.image_urls)
    .bind(listing.approved)
    .bind(listing.rejection_reason.as_deref())
    .bind(listing.approved_at)
    .bind(approved_by)
    .bind(listing.views)
    .bind(listing.likes)
    .bind(listing.saves)
    .bind(listing.inquiries)
    .bind(Json(&listing.viewed_by))
    .bind(Json(&listing.anonymous_views))
    .bind(Json(&listing.liked_by))
    .bind(Json(&listing.saved_by))
    .bind(Json(&listing.inquiries_data))
    .bind(listing.updated_at)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)?;

    row.map(decode_row)
        .transpose()?
        .ok_or_else(|| AppError::NotFound("Listing not found.".to_string()))
}

pub async fn delete_listing(pool: &PgPool, listing_id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM listings WHERE id = $1")
        .bind(listing_id)
        .execute(pool)
        .await
        .map_err(map_db_error)?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Listing not found.".to_string()));
    }
    Ok(())
}

/// Single-statement moderation write.
pub async fn set_moderation(
    pool: &PgPool,
    listing_id: Uuid,
    patch: &ModerationPatch,
    now: DateTime<Utc>,
) -> AppResult<Listing> {
    let approved_by = patch
        .approved_by
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|_| AppError::BadRequest("Invalid approver id.".to_string()))?;

    let row = sqlx::query(
        "UPDATE listings
         SET approved = $2, rejection_reason = $3, approved_at = $4, approved_by = $5,
             updated_at = $6
         WHERE id = $1
         RETURNING row_to_json(listings.*) AS row",
    )
    .bind(listing_id)
    .bind(patch.approved)
    .bind(patch.rejection_reason.as_deref())
    .bind(patch.approved_at)
    .bind(approved_by)
    .bind(now)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    row.map(decode_row)
        .transpose()?
        .ok_or_else(|| AppError::NotFound("Listing not found.".to_string()))
}

const BULK_APPROVE: &str = "UPDATE listings
     SET approved = true, rejection_reason = NULL, approved_at = $2, approved_by = $1,
         updated_at = $2
     WHERE approved IS DISTINCT FROM true";

/// Approve every listing not yet approved in one statement; returns how many
/// rows changed.
pub async fn bulk_approve(pool: &PgPool, admin_id: Uuid, now: DateTime<Utc>) -> AppResult<u64> {
    let result = sqlx::query(BULK_APPROVE)
        .bind(admin_id)
        .bind(now)
        .execute(pool)
        .await
        .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

pub async fn list_listings(pool: &PgPool, plan: &ListingPlan) -> AppResult<(Vec<Listing>, i64)> {
    let (total, rows) = tokio::try_join!(count_listings(pool, &plan.filter), async {
        page_query(plan)
            .build()
            .fetch_all(pool)
            .await
            .map_err(map_db_error)
    })?;

    let listings = rows
        .into_iter()
        .map(decode_row)
        .collect::<AppResult<Vec<_>>>()?;
    Ok((listings, total))
}

pub async fn count_listings(pool: &PgPool, filter: &ListingFilter) -> AppResult<i64> {
    let row = count_query(filter)
        .build()
        .fetch_one(pool)
        .await
        .map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

// The page and its total must share one filter, or `total` drifts from items.
fn page_query(plan: &ListingPlan) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(SELECT_LISTING);
    builder.push(" WHERE 1=1");
    plan.filter.push_conditions(&mut builder);
    plan.push_order_and_page(&mut builder);
    builder
}

fn count_query(filter: &ListingFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder =
        QueryBuilder::new("SELECT COUNT(*)::bigint AS total FROM listings t WHERE 1=1");
    filter.push_conditions(&mut builder);
    builder
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingStats {
    pub total: i64,
    pub approved: i64,
    pub pending: i64,
    pub rent: i64,
    pub sale: i64,
    pub total_value: f64,
}

pub async fn listing_stats(pool: &PgPool, filter: &ListingFilter) -> AppResult<ListingStats> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT
             COUNT(*)::bigint AS total,
             COUNT(*) FILTER (WHERE t.approved)::bigint AS approved,
             COUNT(*) FILTER (WHERE NOT t.approved)::bigint AS pending,
             COUNT(*) FILTER (WHERE t.listing_type = 'rent')::bigint AS rent,
             COUNT(*) FILTER (WHERE t.listing_type = 'sale')::bigint AS sale,
             COALESCE(SUM(t.regular_price) FILTER (WHERE t.approved), 0)::float8 AS total_value
         FROM listings t WHERE 1=1",
    );
    filter.push_conditions(&mut builder);
    let row = builder
        .build()
        .fetch_one(pool)
        .await
        .map_err(map_db_error)?;

    Ok(ListingStats {
        total: row.try_get("total").unwrap_or(0),
        approved: row.try_get("approved").unwrap_or(0),
        pending: row.try_get("pending").unwrap_or(0),
        rent: row.try_get("rent").unwrap_or(0),
        sale: row.try_get("sale").unwrap_or(0),
        total_value: row.try_get("total_value").unwrap_or(0.0),
    })
}

fn decode_row(row: PgRow) -> AppResult<Listing> {
    let value = row
        .try_get::<Option<Value>, _>("row")
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::Internal("Listing row came back empty.".to_string()))?;
    decode_listing(value)
}

fn decode_listing(value: Value) -> AppResult<Listing> {
    serde_json::from_value(value)
        .map_err(|error| AppError::Internal(format!("Could not decode listing row: {error}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use chrono::{DateTime, Utc};
    use sqlx::PgPool;
    use uuid::Uuid;

    use super::{
        bulk_approve, count_listings, count_query, decode_listing, get_listing, insert_listing,
        mutate_listing, page_query, set_moderation, ListingStats, BULK_APPROVE,
    };
    use crate::{
        auth::Viewer,
        error::AppResult,
        models::{
            fixtures::{at, listing},
            Listing,
        },
        schemas::{ListingDraft, ListingsQuery},
        services::{
            moderation::ModerationPatch,
            query_planner::{plan_listings, ListingFilter},
            views::{attribute_view, ViewOutcome, ViewPolicy, Visitor},
        },
    };

    #[test]
    fn decodes_row_to_json_output() {
        let listing = decode_listing(json!({
            "id": "7d5b3f3e-5a43-4d8a-9a52-1f2e8c7b6a10",
            "name": "Plot",
            "description": "Half acre",
            "address": "Entebbe Rd",
            "listing_type": "sale",
            "regular_price": 30000,
            "discount_price": 0,
            "currency": "USD",
            "bedrooms": 1,
            "bathrooms": 1,
            "furnished": false,
            "parking": false,
            "offer": false,
            "image_urls": ["https://img.test/plot.jpg"],
            "user_ref": "0b8c9f46-2f7e-4d38-9d1c-1f6f0f3c1a11",
            "approved": false,
            "rejection_reason": null,
            "approved_at": null,
            "approved_by": null,
            "views": 0,
            "likes": 0,
            "saves": 0,
            "inquiries": 1,
            "viewed_by": [],
            "anonymous_views": [],
            "liked_by": [],
            "saved_by": [],
            "inquiries_data": [{
                "userId": "u2",
                "type": "call",
                "message": "Still available?",
                "timestamp": "2026-03-04T08:00:00+00:00"
            }],
            "created_at": "2026-03-01T09:00:00.5+00:00",
            "updated_at": "2026-03-01T09:00:00.5+00:00"
        }))
        .expect("decodes");
        assert_eq!(listing.regular_price, 30000.0);
        assert_eq!(listing.inquiries_data[0].message, "Still available?");
        assert!(listing.counters_consistent());
    }

    #[test]
    fn malformed_rows_are_internal_errors() {
        assert!(decode_listing(json!({"id": 5})).is_err());
    }

    #[test]
    fn stats_serialize_for_clients() {
        let stats = ListingStats {
            total: 3,
            approved: 2,
            pending: 1,
            rent: 2,
            sale: 1,
            total_value: 1500.0,
        };
        let wire = serde_json::to_value(&stats).expect("encodes");
        assert_eq!(wire["totalValue"], 1500.0);
        assert_eq!(wire["pending"], 1);
    }

    #[test]
    fn bulk_approve_only_touches_unapproved_rows() {
        let sql = BULK_APPROVE.split_whitespace().collect::<Vec<_>>().join(" ");
        assert!(sql.starts_with("UPDATE listings SET approved = true, rejection_reason = NULL,"));
        assert!(sql.contains("approved_at = $2, approved_by = $1, updated_at = $2"));
        assert!(sql.ends_with("WHERE approved IS DISTINCT FROM true"));
    }

    #[test]
    fn page_and_total_share_one_filter() {
        let query = ListingsQuery {
            offer: Some(true),
            search_term: Some("loft".to_string()),
            sort: Some("regularPrice".to_string()),
            order: Some("asc".to_string()),
            ..ListingsQuery::default()
        };
        let plan = plan_listings(None, &query).expect("plan");

        let page = page_query(&plan);
        let page_sql = page.sql();
        let count = count_query(&plan.filter);
        let count_sql = count.sql();

        let page_where = page_sql
            .split_once(" WHERE 1=1")
            .and_then(|(_, rest)| rest.split_once(" ORDER BY"))
            .map(|(conditions, _)| conditions)
            .expect("page has conditions and ordering");
        let count_where = count_sql
            .split_once(" WHERE 1=1")
            .map(|(_, conditions)| conditions)
            .expect("count has conditions");
        assert_eq!(page_where, count_where);
        assert!(count_where.contains("AND t.approved = $1"));
        assert!(count_where.contains("AND t.offer = true"));
        assert!(count_where.contains("AND t.name ILIKE $2"));

        assert!(page_sql.starts_with("SELECT row_to_json(t) AS row FROM listings t"));
        assert!(page_sql.ends_with("ORDER BY t.regular_price ASC, t.id ASC LIMIT $3 OFFSET $4"));
        assert!(count_sql.starts_with("SELECT COUNT(*)::bigint AS total"));
        assert!(!count_sql.contains("LIMIT"));
    }

    // Store round trips below run with `cargo test -- --ignored` against the
    // Postgres named by DATABASE_URL; each gets a fresh migrated database.

    fn id_of(listing: &Listing) -> Uuid {
        Uuid::parse_str(&listing.id).expect("stored id is a uuid")
    }

    async fn seed(pool: &PgPool, owner: Uuid) -> Listing {
        let creator = Viewer {
            id: owner.to_string(),
            is_admin: false,
        };
        let draft = ListingDraft::from_listing(&listing(&creator.id));
        let pending = ModerationPatch::on_create(&creator, at(2026, 4, 1, 8, 0));
        insert_listing(pool, &draft, owner, &pending)
            .await
            .expect("insert")
    }

    fn track(
        visitor: &Visitor,
        now: DateTime<Utc>,
    ) -> impl FnOnce(&mut Listing) -> AppResult<(ViewOutcome, bool)> + '_ {
        move |listing| {
            let outcome = attribute_view(listing, visitor, false, &ViewPolicy::default(), now);
            Ok((outcome, outcome.recorded()))
        }
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn bulk_approve_publishes_every_pending_listing(pool: PgPool) {
        let owner = Uuid::new_v4();
        let admin_id = Uuid::new_v4();
        let admin = Viewer {
            id: admin_id.to_string(),
            is_admin: true,
        };
        let now = at(2026, 4, 5, 8, 0);

        let pending = seed(&pool, owner).await;
        let rejected = seed(&pool, owner).await;
        let published = seed(&pool, owner).await;
        let reject = ModerationPatch::reject(&admin, Some("blurry")).unwrap();
        set_moderation(&pool, id_of(&rejected), &reject, now).await.unwrap();
        let approve = ModerationPatch::approve(&admin, now).unwrap();
        set_moderation(&pool, id_of(&published), &approve, now).await.unwrap();

        assert_eq!(bulk_approve(&pool, admin_id, now).await.unwrap(), 2);
        let still_pending = ListingFilter {
            approved: Some(false),
            ..ListingFilter::default()
        };
        assert_eq!(count_listings(&pool, &still_pending).await.unwrap(), 0);

        for id in [id_of(&pending), id_of(&rejected)] {
            let stored = get_listing(&pool, id).await.unwrap();
            assert!(stored.approved);
            assert_eq!(stored.rejection_reason, None);
            assert_eq!(stored.approved_by, Some(admin_id.to_string()));
        }
        assert_eq!(bulk_approve(&pool, admin_id, now).await.unwrap(), 0);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn unchanged_mutation_is_rolled_back(pool: PgPool) {
        let seeded = seed(&pool, Uuid::new_v4()).await;
        let id = id_of(&seeded);
        mutate_listing(&pool, id, |listing| {
            listing.name = "Scratch".to_string();
            Ok(((), false))
        })
        .await
        .unwrap();
        assert_eq!(get_listing(&pool, id).await.unwrap().name, seeded.name);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn repeat_view_on_one_day_is_not_written(pool: PgPool) {
        let id = id_of(&seed(&pool, Uuid::new_v4()).await);
        let visitor = Visitor::Authenticated {
            user_id: Uuid::new_v4().to_string(),
            ip: None,
            user_agent: None,
        };
        let (saved, first) = mutate_listing(&pool, id, track(&visitor, at(2026, 4, 5, 8, 0)))
            .await
            .unwrap();
        assert_eq!(first, ViewOutcome::Recorded);
        assert_eq!(saved.views, 1);
        assert_eq!(saved.viewed_by.len(), 1);

        let (_, second) = mutate_listing(&pool, id, track(&visitor, at(2026, 4, 5, 20, 0)))
            .await
            .unwrap();
        assert_eq!(second, ViewOutcome::Duplicate);
        let stored = get_listing(&pool, id).await.unwrap();
        assert_eq!(stored.views, 1);
        assert!(stored.counters_consistent());
    }
}
