use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    auth::Viewer,
    error::{AppError, AppResult},
    models::ListingType,
    schemas::ListingsQuery,
};

pub const DEFAULT_PAGE_SIZE: i64 = 9;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const RECENT_LIMIT: i64 = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilter {
    pub approved: Option<bool>,
    pub user_ref: Option<Uuid>,
    pub offer: bool,
    pub furnished: bool,
    pub parking: bool,
    pub listing_type: Option<ListingType>,
    pub search_term: Option<String>,
}

impl ListingFilter {
    /// Role-derived part of the filter. First match wins: admins see
    /// everything (optionally narrowed by `approved`), owners see all of
    /// their own listings, everybody else only approved ones.
    pub fn for_viewer(
        viewer: Option<&Viewer>,
        user_ref: Option<Uuid>,
        approved_param: Option<bool>,
    ) -> Self {
        let approved = match viewer {
            Some(viewer) if viewer.is_admin => approved_param,
            Some(viewer) if user_ref.is_some_and(|owner| owner.to_string() == viewer.id) => None,
            _ => Some(true),
        };
        Self {
            approved,
            user_ref,
            ..Self::default()
        }
    }

    /// Appends ` AND …` clauses for a query already holding `WHERE 1=1`
    /// over a table aliased `t`.
    pub fn push_conditions(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        if let Some(approved) = self.approved {
            builder.push(" AND t.approved = ").push_bind(approved);
        }
        if let Some(user_ref) = self.user_ref {
            builder.push(" AND t.user_ref = ").push_bind(user_ref);
        }
        if self.offer {
            builder.push(" AND t.offer = true");
        }
        if self.furnished {
            builder.push(" AND t.furnished = true");
        }
        if self.parking {
            builder.push(" AND t.parking = true");
        }
        if let Some(listing_type) = self.listing_type {
            builder
                .push(" AND t.listing_type = ")
                .push_bind(listing_type.as_str());
        }
        if let Some(term) = &self.search_term {
            builder
                .push(" AND t.name ILIKE ")
                .push_bind(format!("%{}%", escape_like(term)))
                .push(" ESCAPE '\\'");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    CreatedAt,
    UpdatedAt,
    RegularPrice,
    DiscountPrice,
    Views,
    Likes,
    Name,
}

impl SortColumn {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).unwrap_or_default() {
            "updatedAt" | "updated_at" => Self::UpdatedAt,
            "regularPrice" | "regular_price" => Self::RegularPrice,
            "discountPrice" | "discount_price" => Self::DiscountPrice,
            "views" => Self::Views,
            "likes" => Self::Likes,
            "name" => Self::Name,
            _ => Self::CreatedAt,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::RegularPrice => "regular_price",
            Self::DiscountPrice => "discount_price",
            Self::Views => "views",
            Self::Likes => "likes",
            Self::Name => "name",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingPlan {
    pub filter: ListingFilter,
    pub sort: SortColumn,
    pub ascending: bool,
    pub limit: i64,
    pub offset: i64,
}

impl ListingPlan {
    pub fn push_order_and_page(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder
            .push(" ORDER BY t.")
            .push(self.sort.column())
            .push(if self.ascending { " ASC" } else { " DESC" })
            .push(", t.id ASC LIMIT ")
            .push_bind(self.limit)
            .push(" OFFSET ")
            .push_bind(self.offset);
    }
}

pub fn plan_listings(viewer: Option<&Viewer>, query: &ListingsQuery) -> AppResult<ListingPlan> {
    let user_ref = query
        .user_ref
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            Uuid::parse_str(value)
                .map_err(|_| AppError::BadRequest("Invalid userRef format.".to_string()))
        })
        .transpose()?;

    let approved_param = match query.approved.as_deref().map(str::trim) {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    };

    let listing_type = match query
        .listing_type
        .as_deref()
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        None | Some("") | Some("all") => None,
        Some("rent") => Some(ListingType::Rent),
        Some("sale") => Some(ListingType::Sale),
        Some(other) => {
            return Err(AppError::BadRequest(format!(
                "Unknown listing type '{other}'. Expected rent, sale or all."
            )))
        }
    };

    let mut filter = ListingFilter::for_viewer(viewer, user_ref, approved_param);
    filter.offer = query.offer == Some(true);
    filter.furnished = query.furnished == Some(true);
    filter.parking = query.parking == Some(true);
    filter.listing_type = listing_type;
    filter.search_term = query
        .search_term
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    Ok(ListingPlan {
        filter,
        sort: SortColumn::parse(query.sort.as_deref()),
        ascending: query
            .order
            .as_deref()
            .is_some_and(|order| order.trim().eq_ignore_ascii_case("asc")),
        limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset: query.start_index.unwrap_or(0).max(0),
    })
}

/// Newest five, admins unrestricted, everyone else approved only.
pub fn recent_plan(viewer: Option<&Viewer>) -> ListingPlan {
    ListingPlan {
        filter: stats_filter(viewer),
        sort: SortColumn::CreatedAt,
        ascending: false,
        limit: RECENT_LIMIT,
        offset: 0,
    }
}

pub fn stats_filter(viewer: Option<&Viewer>) -> ListingFilter {
    ListingFilter::for_viewer(viewer, None, None)
}

/// Scope label used to key cached aggregate responses.
pub fn visibility_scope(viewer: Option<&Viewer>) -> &'static str {
    match viewer {
        Some(viewer) if viewer.is_admin => "admin",
        _ => "public",
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for character in raw.chars() {
        if matches!(character, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

#[cfg(test)]
impl ListingFilter {
    pub fn matches(&self, listing: &crate::models::Listing) -> bool {
        self.approved.is_none_or(|approved| listing.approved == approved)
            && self
                .user_ref
                .is_none_or(|owner| listing.user_ref == owner.to_string())
            && (!self.offer || listing.offer)
            && (!self.furnished || listing.furnished)
            && (!self.parking || listing.parking)
            && self
                .listing_type
                .is_none_or(|listing_type| listing.listing_type == listing_type)
            && self.search_term.as_ref().is_none_or(|term| {
                listing
                    .name
                    .to_lowercase()
                    .contains(&term.to_lowercase())
            })
    }
}

#[cfg(test)]
mod tests {
    use sqlx::{Postgres, QueryBuilder};
    use uuid::Uuid;

    use super::{
        escape_like, plan_listings, recent_plan, visibility_scope, ListingFilter, SortColumn,
        DEFAULT_PAGE_SIZE, RECENT_LIMIT,
    };
    use crate::{
        auth::Viewer,
        models::{fixtures::listing, ListingType},
        schemas::ListingsQuery,
    };

    const OWNER: &str = "0b8c9f46-2f7e-4d38-9d1c-1f6f0f3c1a11";
    const OTHER: &str = "9a0f5d2e-8c3b-4b7a-a1e2-3c4d5e6f7a8b";

    fn viewer(id: &str, is_admin: bool) -> Viewer {
        Viewer {
            id: id.to_string(),
            is_admin,
        }
    }

    #[test]
    fn defaults_are_newest_first_nine_per_page() {
        let plan = plan_listings(None, &ListingsQuery::default()).expect("plan");
        assert_eq!(plan.sort, SortColumn::CreatedAt);
        assert!(!plan.ascending);
        assert_eq!(plan.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(plan.offset, 0);
        assert_eq!(plan.filter.approved, Some(true));
    }

    #[test]
    fn admin_is_unrestricted_unless_asking_for_approval_state() {
        let admin = viewer(OTHER, true);
        let plan = plan_listings(Some(&admin), &ListingsQuery::default()).expect("plan");
        assert_eq!(plan.filter.approved, None);

        let query = ListingsQuery {
            approved: Some("false".to_string()),
            ..ListingsQuery::default()
        };
        let plan = plan_listings(Some(&admin), &query).expect("plan");
        assert_eq!(plan.filter.approved, Some(false));
    }

    #[test]
    fn owner_sees_all_of_their_own_listings() {
        let owner = viewer(OWNER, false);
        let query = ListingsQuery {
            user_ref: Some(OWNER.to_string()),
            ..ListingsQuery::default()
        };
        let plan = plan_listings(Some(&owner), &query).expect("plan");
        assert_eq!(plan.filter.approved, None);
        assert_eq!(plan.filter.user_ref, Some(Uuid::parse_str(OWNER).unwrap()));
    }

    #[test]
    fn non_owner_never_sees_unapproved_listings() {
        let queries = [
            ListingsQuery::default(),
            ListingsQuery {
                approved: Some("false".to_string()),
                ..ListingsQuery::default()
            },
            ListingsQuery {
                user_ref: Some(OWNER.to_string()),
                approved: Some("false".to_string()),
                offer: Some(true),
                ..ListingsQuery::default()
            },
        ];
        let mut pending = listing(OWNER);
        pending.offer = true;
        let callers = [None, Some(viewer(OTHER, false))];

        for caller in &callers {
            for query in &queries {
                let plan = plan_listings(caller.as_ref(), query).expect("plan");
                assert_eq!(plan.filter.approved, Some(true));
                assert!(!plan.filter.matches(&pending));
            }
        }
    }

    #[test]
    fn optional_filters_combine() {
        let query = ListingsQuery {
            offer: Some(true),
            furnished: Some(false),
            parking: Some(true),
            listing_type: Some("Sale".to_string()),
            search_term: Some(" cottage ".to_string()),
            sort: Some("regularPrice".to_string()),
            order: Some("asc".to_string()),
            limit: Some(500),
            start_index: Some(-3),
            ..ListingsQuery::default()
        };
        let plan = plan_listings(None, &query).expect("plan");
        assert!(plan.filter.offer);
        assert!(!plan.filter.furnished);
        assert!(plan.filter.parking);
        assert_eq!(plan.filter.listing_type, Some(ListingType::Sale));
        assert_eq!(plan.filter.search_term.as_deref(), Some("cottage"));
        assert_eq!(plan.sort, SortColumn::RegularPrice);
        assert!(plan.ascending);
        assert_eq!(plan.limit, 100);
        assert_eq!(plan.offset, 0);
    }

    #[test]
    fn type_all_is_ignored_and_unknown_type_rejected() {
        let all = ListingsQuery {
            listing_type: Some("all".to_string()),
            ..ListingsQuery::default()
        };
        assert_eq!(plan_listings(None, &all).unwrap().filter.listing_type, None);

        let bogus = ListingsQuery {
            listing_type: Some("lease".to_string()),
            ..ListingsQuery::default()
        };
        assert!(plan_listings(None, &bogus).is_err());

        let bad_owner = ListingsQuery {
            user_ref: Some("not-a-uuid".to_string()),
            ..ListingsQuery::default()
        };
        assert!(plan_listings(None, &bad_owner).is_err());
    }

    #[test]
    fn unknown_sort_falls_back_to_creation_time() {
        let query = ListingsQuery {
            sort: Some("password".to_string()),
            ..ListingsQuery::default()
        };
        assert_eq!(plan_listings(None, &query).unwrap().sort, SortColumn::CreatedAt);
    }

    #[test]
    fn conditions_render_as_bound_sql() {
        let filter = ListingFilter {
            approved: Some(true),
            offer: true,
            listing_type: Some(ListingType::Rent),
            search_term: Some("50%_off".to_string()),
            ..ListingFilter::default()
        };
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM listings t WHERE 1=1");
        filter.push_conditions(&mut builder);
        let sql = builder.sql();
        assert!(sql.contains("AND t.approved = $1"));
        assert!(sql.contains("AND t.offer = true"));
        assert!(sql.contains("AND t.listing_type = $2"));
        assert!(sql.contains("AND t.name ILIKE $3 ESCAPE"));
        assert!(!sql.contains("furnished"));
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }

    #[test]
    fn recent_is_capped_and_scoped() {
        let public = recent_plan(None);
        assert_eq!(public.limit, RECENT_LIMIT);
        assert_eq!(public.filter.approved, Some(true));

        let admin = viewer(OTHER, true);
        assert_eq!(recent_plan(Some(&admin)).filter.approved, None);
        assert_eq!(visibility_scope(Some(&admin)), "admin");
        assert_eq!(visibility_scope(Some(&viewer(OWNER, false))), "public");
    }
}
