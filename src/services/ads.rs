//! Ad listing, search, and ownership rules.
//!
//! Searches without coordinates are paged in SQL. Proximity searches
//! prefilter with a bounding box in SQL, then compute exact haversine
//! distances and page in memory, since distance is not a stored column.

use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    AppState,
    error::{ApiError, ApiResult},
    geo::{self, Point},
    handlers::data::{AdSearch, CreateAdRequest, UpdateAdRequest},
    models::{AD_COLUMNS, Ad, AdOwnerRow, AdStatus, AdWithOwner, Category, TransactionKind},
    pagination::{Page, Paginated},
    services::PointsService,
};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 50;
pub const DEFAULT_RADIUS_KM: f64 = 20.0;
pub const MAX_RADIUS_KM: f64 = 500.0;

const SELECT_WITH_OWNER: &str = "u.name AS owner_name, u.picture AS owner_picture \
     FROM ads a JOIN users u ON u.id = a.owner_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Newest,
    Oldest,
    PriceAsc,
    PriceDesc,
    Distance,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "newest" => Some(Self::Newest),
            "oldest" => Some(Self::Oldest),
            "price_asc" => Some(Self::PriceAsc),
            "price_desc" => Some(Self::PriceDesc),
            "distance" => Some(Self::Distance),
            _ => None,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            Self::Oldest => " ORDER BY a.created_at ASC",
            Self::PriceAsc => " ORDER BY a.price_per_day ASC, a.created_at DESC",
            Self::PriceDesc => " ORDER BY a.price_per_day DESC, a.created_at DESC",
            Self::Newest | Self::Distance => " ORDER BY a.created_at DESC",
        }
    }
}

/// Proximity part of a search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Near {
    pub origin: Point,
    pub radius_km: f64,
}

/// A validated search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub category: Option<Category>,
    pub subcategory: Option<String>,
    pub city: Option<String>,
    pub search: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub near: Option<Near>,
    pub sort: SortOrder,
    pub page: Page,
}

impl SearchFilter {
    /// Parses and checks raw query parameters.
    pub fn from_query(q: AdSearch) -> ApiResult<Self> {
        let category = match non_empty(q.category) {
            Some(raw) => Some(
                Category::parse(&raw)
                    .ok_or_else(|| ApiError::bad_request(format!("Unknown category: {raw}")))?,
            ),
            None => None,
        };

        let subcategory = non_empty(q.subcategory);
        if let (Some(category), Some(sub)) = (category, subcategory.as_deref()) {
            if !category.allows_subcategory(sub) {
                return Err(ApiError::bad_request(format!(
                    "Subcategory {sub} is not valid for {category}"
                )));
            }
        }

        for price in [q.min_price, q.max_price].into_iter().flatten() {
            if !price.is_finite() || price < 0.0 {
                return Err(ApiError::bad_request("Prices must be non-negative numbers"));
            }
        }
        if let (Some(min), Some(max)) = (q.min_price, q.max_price) {
            if min > max {
                return Err(ApiError::bad_request("min_price cannot exceed max_price"));
            }
        }

        let near = match (q.lat, q.lng) {
            (None, None) => None,
            (Some(lat), Some(lng)) => {
                let origin = Point::new(lat, lng);
                if !origin.is_valid() {
                    return Err(ApiError::bad_request("Coordinates are out of range"));
                }
                let radius_km = q.max_distance.unwrap_or(DEFAULT_RADIUS_KM);
                if !radius_km.is_finite() || radius_km <= 0.0 {
                    return Err(ApiError::bad_request("max_distance must be positive"));
                }
                Some(Near { origin, radius_km: radius_km.min(MAX_RADIUS_KM) })
            }
            _ => return Err(ApiError::bad_request("lat and lng must be provided together")),
        };

        let sort = match non_empty(q.sort) {
            Some(raw) => SortOrder::parse(&raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown sort: {raw}")))?,
            None if near.is_some() => SortOrder::Distance,
            None => SortOrder::Newest,
        };
        if sort == SortOrder::Distance && near.is_none() {
            return Err(ApiError::bad_request("Sorting by distance requires lat and lng"));
        }

        Ok(Self {
            category,
            subcategory,
            city: non_empty(q.city),
            search: non_empty(q.search),
            min_price: q.min_price,
            max_price: q.max_price,
            near,
            sort,
            page: Page::new(q.page, q.limit, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE),
        })
    }

    /// Appends the WHERE conditions shared by the count and list queries.
    fn push_conditions(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE a.status = ").push_bind(AdStatus::Active.as_str());

        if let Some(category) = self.category {
            qb.push(" AND a.category = ").push_bind(category.as_str());
        }
        if let Some(sub) = &self.subcategory {
            qb.push(" AND a.subcategory = ").push_bind(sub.clone());
        }
        if let Some(city) = &self.city {
            qb.push(" AND LOWER(a.city) = LOWER(").push_bind(city.clone()).push(")");
        }
        if let Some(search) = &self.search {
            let pattern = like_pattern(search);
            qb.push(" AND (a.title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR a.description ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(min) = self.min_price {
            qb.push(" AND a.price_per_day >= ").push_bind(min);
        }
        if let Some(max) = self.max_price {
            qb.push(" AND a.price_per_day <= ").push_bind(max);
        }
        if let Some(near) = self.near {
            let bbox = geo::bounding_box(near.origin, near.radius_km);
            qb.push(" AND a.lat IS NOT NULL AND a.lng IS NOT NULL")
                .push(" AND a.lat BETWEEN ")
                .push_bind(bbox.min_lat)
                .push(" AND ")
                .push_bind(bbox.max_lat)
                .push(" AND a.lng BETWEEN ")
                .push_bind(bbox.min_lng)
                .push(" AND ")
                .push_bind(bbox.max_lng);
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `%term%` with LIKE metacharacters escaped.
pub fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Attaches distances, drops ads outside the radius, and orders the rest.
pub fn rank_by_distance(rows: Vec<AdWithOwner>, near: Near, sort: SortOrder) -> Vec<AdWithOwner> {
    let mut ranked: Vec<(f64, AdWithOwner)> = rows
        .into_iter()
        .filter_map(|mut ad| {
            let (lat, lng) = (ad.ad.location.lat?, ad.ad.location.lng?);
            let km = geo::haversine_km(near.origin, Point::new(lat, lng));
            (km <= near.radius_km).then(|| {
                ad.distance_km = Some(geo::round2(km));
                (km, ad)
            })
        })
        .collect();

    ranked.sort_by(|(da, a), (db, b)| match sort {
        SortOrder::Distance => da.total_cmp(db),
        SortOrder::Newest => b.ad.created_at.cmp(&a.ad.created_at),
        SortOrder::Oldest => a.ad.created_at.cmp(&b.ad.created_at),
        SortOrder::PriceAsc => a.ad.price_per_day.total_cmp(&b.ad.price_per_day),
        SortOrder::PriceDesc => b.ad.price_per_day.total_cmp(&a.ad.price_per_day),
    });

    ranked.into_iter().map(|(_, ad)| ad).collect()
}

pub struct AdService;

impl AdService {
    pub async fn search(pool: &PgPool, filter: &SearchFilter) -> ApiResult<Paginated<AdWithOwner>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {AD_COLUMNS}, {SELECT_WITH_OWNER}"));
        filter.push_conditions(&mut qb);

        if let Some(near) = filter.near {
            let rows = qb.build_query_as::<AdOwnerRow>().fetch_all(pool).await?;
            let ranked =
                rank_by_distance(rows.into_iter().map(Into::into).collect(), near, filter.sort);
            let total = ranked.len() as i64;
            let page: Vec<AdWithOwner> = ranked
                .into_iter()
                .skip(filter.page.offset() as usize)
                .take(filter.page.limit as usize)
                .collect();
            return Ok(Paginated::new(page, total, filter.page));
        }

        qb.push(filter.sort.order_by())
            .push(" LIMIT ")
            .push_bind(filter.page.limit)
            .push(" OFFSET ")
            .push_bind(filter.page.offset());
        let rows = qb.build_query_as::<AdOwnerRow>().fetch_all(pool).await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ads a");
        filter.push_conditions(&mut count);
        let total = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        Ok(Paginated::new(rows.into_iter().map(Into::into).collect(), total, filter.page))
    }

    /// Fetches an ad and counts the view in the same statement.
    pub async fn get_and_count_view(pool: &PgPool, ad_id: Uuid) -> ApiResult<AdWithOwner> {
        let sql = format!(
            "WITH a AS (UPDATE ads SET views = views + 1 WHERE id = $1 RETURNING *) \
             SELECT {AD_COLUMNS}, u.name AS owner_name, u.picture AS owner_picture \
             FROM a JOIN users u ON u.id = a.owner_id"
        );
        let row = sqlx::query_as::<_, AdOwnerRow>(&sql)
            .bind(ad_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Ad not found"))?;
        Ok(row.into())
    }

    /// Inserts an ad and charges the posting fee in one transaction.
    pub async fn create(state: &AppState, owner_id: Uuid, req: CreateAdRequest) -> ApiResult<Ad> {
        let cost = state.settings.ad_post_cost;
        let mut tx = state.db.begin().await?;

        if cost > 0 {
            let remaining = PointsService::debit(&mut tx, owner_id, cost).await?;
            if remaining.is_none() {
                tracing::info!(user_id = %owner_id, cost, "Ad rejected for insufficient points");
                return Err(ApiError::bad_request("Insufficient points to post an ad"));
            }
        }

        let location = req.location.into_location();
        let sql = format!(
            "INSERT INTO ads AS a (id, owner_id, category, subcategory, title, description, \
             price_per_day, images, city, state, pincode, lat, lng, contact_number) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {AD_COLUMNS}"
        );
        let ad = sqlx::query_as::<_, Ad>(&sql)
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(req.category.as_str())
            .bind(req.subcategory.as_deref())
            .bind(req.title.trim())
            .bind(req.description.trim())
            .bind(req.price_per_day)
            .bind(&req.images)
            .bind(location.city.trim())
            .bind(location.state.as_deref())
            .bind(location.pincode.as_deref())
            .bind(location.lat)
            .bind(location.lng)
            .bind(req.contact_number.trim())
            .fetch_one(&mut *tx)
            .await?;

        if cost > 0 {
            PointsService::record(
                &mut tx,
                Some(owner_id),
                None,
                cost,
                TransactionKind::AdPost,
                Some(&ad.title),
            )
            .await?;
        }

        tx.commit().await?;
        tracing::info!(ad_id = %ad.id, user_id = %owner_id, category = %ad.category, "Ad posted");
        Ok(ad)
    }

    /// Applies a partial update. Only the owner may edit, and a rejected
    /// ad keeps its status until an admin changes it.
    pub async fn update(
        pool: &PgPool,
        user_id: Uuid,
        ad_id: Uuid,
        req: UpdateAdRequest,
    ) -> ApiResult<Ad> {
        let current = Self::ensure_owner(pool, user_id, ad_id).await?;
        check_owner_status_change(current, req.status)?;

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE ads AS a SET updated_at = NOW()");
        let mut changed = false;

        if let Some(title) = req.title {
            qb.push(", title = ").push_bind(title.trim().to_string());
            changed = true;
        }
        if let Some(description) = req.description {
            qb.push(", description = ").push_bind(description.trim().to_string());
            changed = true;
        }
        if let Some(price) = req.price_per_day {
            qb.push(", price_per_day = ").push_bind(price);
            changed = true;
        }
        if let Some(images) = req.images {
            qb.push(", images = ").push_bind(images);
            changed = true;
        }
        if let Some(location) = req.location {
            let location = location.into_location();
            qb.push(", city = ")
                .push_bind(location.city.trim().to_string())
                .push(", state = ")
                .push_bind(location.state)
                .push(", pincode = ")
                .push_bind(location.pincode)
                .push(", lat = ")
                .push_bind(location.lat)
                .push(", lng = ")
                .push_bind(location.lng);
            changed = true;
        }
        if let Some(contact) = req.contact_number {
            qb.push(", contact_number = ").push_bind(contact.trim().to_string());
            changed = true;
        }
        if let Some(status) = req.status {
            qb.push(", status = ").push_bind(status.as_str());
            changed = true;
        }

        if !changed {
            return Err(ApiError::bad_request("No fields to update"));
        }

        qb.push(" WHERE a.id = ").push_bind(ad_id);
        qb.push(format!(" RETURNING {AD_COLUMNS}"));

        let ad = qb.build_query_as::<Ad>().fetch_one(pool).await?;
        tracing::info!(ad_id = %ad_id, user_id = %user_id, "Ad updated");
        Ok(ad)
    }

    pub async fn delete(pool: &PgPool, user_id: Uuid, ad_id: Uuid) -> ApiResult<()> {
        Self::ensure_owner(pool, user_id, ad_id).await?;
        sqlx::query("DELETE FROM ads WHERE id = $1")
            .bind(ad_id)
            .execute(pool)
            .await?;
        tracing::info!(ad_id = %ad_id, user_id = %user_id, "Ad deleted");
        Ok(())
    }

    /// Every ad of `user_id`, any status, newest first.
    pub async fn mine(pool: &PgPool, user_id: Uuid) -> ApiResult<Vec<Ad>> {
        let sql = format!(
            "SELECT {AD_COLUMNS} FROM ads a WHERE a.owner_id = $1 ORDER BY a.created_at DESC"
        );
        let ads = sqlx::query_as::<_, Ad>(&sql).bind(user_id).fetch_all(pool).await?;
        Ok(ads)
    }

    /// Bookmarks an ad. Returns false when it was already saved.
    pub async fn save(pool: &PgPool, user_id: Uuid, ad_id: Uuid) -> ApiResult<bool> {
        Self::owner_of(pool, ad_id).await?;
        let res = sqlx::query(
            "INSERT INTO saved_ads (user_id, ad_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(ad_id)
        .execute(pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn unsave(pool: &PgPool, user_id: Uuid, ad_id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM saved_ads WHERE user_id = $1 AND ad_id = $2")
            .bind(user_id)
            .bind(ad_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Saved ads, most recently saved first.
    pub async fn saved(pool: &PgPool, user_id: Uuid) -> ApiResult<Vec<AdWithOwner>> {
        let sql = format!(
            "SELECT {AD_COLUMNS}, {SELECT_WITH_OWNER} \
             JOIN saved_ads s ON s.ad_id = a.id \
             WHERE s.user_id = $1 ORDER BY s.saved_at DESC"
        );
        let rows = sqlx::query_as::<_, AdOwnerRow>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn owner_of(pool: &PgPool, ad_id: Uuid) -> ApiResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>("SELECT owner_id FROM ads WHERE id = $1")
            .bind(ad_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Ad not found"))
    }

    /// Checks ownership and returns the ad's current status.
    async fn ensure_owner(pool: &PgPool, user_id: Uuid, ad_id: Uuid) -> ApiResult<AdStatus> {
        let (owner_id, status) = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT owner_id, status FROM ads WHERE id = $1",
        )
        .bind(ad_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Ad not found"))?;

        if owner_id != user_id {
            tracing::warn!(ad_id = %ad_id, user_id = %user_id, "Rejected change to another user's ad");
            return Err(ApiError::forbidden("You can only modify your own ads"));
        }
        AdStatus::try_from(status).map_err(|e| ApiError::Internal(e.to_string()))
    }
}

/// Owners toggle between active and inactive; once an admin rejects an
/// ad its status is theirs alone to change.
pub fn check_owner_status_change(current: AdStatus, requested: Option<AdStatus>) -> ApiResult<()> {
    match (current, requested) {
        (AdStatus::Rejected, Some(_)) => Err(ApiError::forbidden(
            "Rejected ads can only be reinstated by an admin",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, PublicUser};
    use chrono::{Duration, Utc};

    fn query() -> AdSearch {
        AdSearch::default()
    }

    fn ad_at(lat: Option<f64>, lng: Option<f64>, price: f64, age_days: i64) -> AdWithOwner {
        let created = Utc::now() - Duration::days(age_days);
        let owner_id = Uuid::new_v4();
        AdWithOwner {
            ad: Ad {
                id: Uuid::new_v4(),
                owner_id,
                category: Category::Cars,
                subcategory: None,
                title: "Swift".into(),
                description: "Petrol hatchback".into(),
                price_per_day: price,
                images: vec![],
                location: Location { city: "Bengaluru".into(), state: None, pincode: None, lat, lng },
                contact_number: "9000000000".into(),
                status: AdStatus::Active,
                views: 0,
                created_at: created,
                updated_at: created,
            },
            owner: PublicUser { id: owner_id, name: "Ravi".into(), picture: None },
            distance_km: None,
        }
    }

    #[test]
    fn defaults_without_coordinates() {
        let filter = SearchFilter::from_query(query()).unwrap();
        assert_eq!(filter.sort, SortOrder::Newest);
        assert_eq!(filter.page, Page { page: 1, limit: DEFAULT_PAGE_SIZE });
        assert!(filter.near.is_none());
    }

    #[test]
    fn coordinates_switch_default_sort_and_clamp_radius() {
        let filter = SearchFilter::from_query(AdSearch {
            lat: Some(12.97),
            lng: Some(77.59),
            max_distance: Some(10_000.0),
            limit: Some(500),
            ..query()
        })
        .unwrap();
        assert_eq!(filter.sort, SortOrder::Distance);
        assert_eq!(filter.near.unwrap().radius_km, MAX_RADIUS_KM);
        assert_eq!(filter.page.limit, MAX_PAGE_SIZE);

        let filter = SearchFilter::from_query(AdSearch { lat: Some(1.0), lng: Some(2.0), ..query() }).unwrap();
        assert_eq!(filter.near.unwrap().radius_km, DEFAULT_RADIUS_KM);
    }

    #[test]
    fn rejects_inconsistent_queries() {
        let lone_lat = AdSearch { lat: Some(12.0), ..query() };
        assert!(SearchFilter::from_query(lone_lat).is_err());

        let out_of_range = AdSearch { lat: Some(91.0), lng: Some(0.0), ..query() };
        assert!(SearchFilter::from_query(out_of_range).is_err());

        let bad_sub = AdSearch {
            category: Some("cars".into()),
            subcategory: Some("plots".into()),
            ..query()
        };
        assert!(SearchFilter::from_query(bad_sub).is_err());

        let inverted = AdSearch { min_price: Some(10.0), max_price: Some(5.0), ..query() };
        assert!(SearchFilter::from_query(inverted).is_err());

        let distance_without_origin = AdSearch { sort: Some("distance".into()), ..query() };
        assert!(SearchFilter::from_query(distance_without_origin).is_err());

        let unknown = AdSearch { category: Some("boats".into()), ..query() };
        assert!(SearchFilter::from_query(unknown).is_err());
    }

    #[test]
    fn blank_params_are_ignored() {
        let filter = SearchFilter::from_query(AdSearch {
            category: Some("  ".into()),
            city: Some("".into()),
            search: Some(" flat ".into()),
            ..query()
        })
        .unwrap();
        assert_eq!(filter.category, None);
        assert_eq!(filter.city, None);
        assert_eq!(filter.search.as_deref(), Some("flat"));
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("2bhk"), "%2bhk%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn ranking_drops_far_and_unlocated_ads() {
        let near = Near { origin: Point::new(12.9716, 77.5946), radius_km: 20.0 };
        let rows = vec![
            ad_at(Some(12.99), Some(77.60), 500.0, 1),
            ad_at(Some(12.9716), Some(77.5946), 900.0, 2),
            ad_at(Some(12.2958), Some(76.6394), 100.0, 0),
            ad_at(None, None, 50.0, 0),
        ];

        let ranked = rank_by_distance(rows.clone(), near, SortOrder::Distance);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].distance_km, Some(0.0));
        assert!(ranked[1].distance_km.unwrap() > 0.0);

        let by_price = rank_by_distance(rows, near, SortOrder::PriceDesc);
        assert_eq!(by_price[0].ad.price_per_day, 900.0);
    }

    #[test]
    fn rejected_ads_keep_their_status() {
        let err = check_owner_status_change(AdStatus::Rejected, Some(AdStatus::Active)).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(check_owner_status_change(AdStatus::Rejected, Some(AdStatus::Inactive)).is_err());

        // Other edits to a rejected ad are still allowed.
        assert!(check_owner_status_change(AdStatus::Rejected, None).is_ok());
        assert!(check_owner_status_change(AdStatus::Inactive, Some(AdStatus::Active)).is_ok());
        assert!(check_owner_status_change(AdStatus::Active, Some(AdStatus::Inactive)).is_ok());
    }
}
