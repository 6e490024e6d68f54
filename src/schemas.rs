use axum::body::Bytes;
use serde::{de::DeserializeOwned, Deserialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    error::AppError,
    models::{Currency, Listing, ListingType},
};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn parse_uuid(raw: &str, label: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid {label} format.")))
}

/// Bodies that may be omitted entirely (`POST /listing/view/:id` with no
/// payload). An empty body yields `T::default()`.
pub fn parse_optional_body<T>(body: &Bytes) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json_body(body)
}

/// Handlers take raw `Bytes` and decode after authenticating, so an
/// anonymous caller sees 401 whatever the payload looks like.
pub fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|error| AppError::BadRequest(format!("Invalid JSON body: {error}")))
}

/// Descriptive fields of a listing, the part owners edit.
#[derive(Debug, Clone, PartialEq, Validate)]
#[validate(schema(function = "validate_pricing"))]
pub struct ListingDraft {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 5000))]
    pub description: String,
    #[validate(length(min = 1, max = 300))]
    pub address: String,
    pub listing_type: ListingType,
    #[validate(range(min = 0.0))]
    pub regular_price: f64,
    #[validate(range(min = 0.0))]
    pub discount_price: f64,
    pub currency: Currency,
    #[validate(range(min = 1, max = 100))]
    pub bedrooms: i32,
    #[validate(range(min = 1, max = 100))]
    pub bathrooms: i32,
    pub furnished: bool,
    pub parking: bool,
    pub offer: bool,
    #[validate(
        length(min = 1, max = 6),
        custom(function = "validate_image_urls")
    )]
    pub image_urls: Vec<String>,
}

impl ListingDraft {
    pub fn from_listing(listing: &Listing) -> Self {
        Self {
            name: listing.name.clone(),
            description: listing.description.clone(),
            address: listing.address.clone(),
            listing_type: listing.listing_type,
            regular_price: listing.regular_price,
            discount_price: listing.discount_price,
            currency: listing.currency,
            bedrooms: listing.bedrooms,
            bathrooms: listing.bathrooms,
            furnished: listing.furnished,
            parking: listing.parking,
            offer: listing.offer,
            image_urls: listing.image_urls.clone(),
        }
    }

    /// Trim text and drop the discount when there is no offer.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.description = self.description.trim().to_string();
        self.address = self.address.trim().to_string();
        self.image_urls = self
            .image_urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .collect();
        if !self.offer {
            self.discount_price = 0.0;
        }
        self
    }

    pub fn write_into(self, listing: &mut Listing) {
        listing.name = self.name;
        listing.description = self.description;
        listing.address = self.address;
        listing.listing_type = self.listing_type;
        listing.regular_price = self.regular_price;
        listing.discount_price = self.discount_price;
        listing.currency = self.currency;
        listing.bedrooms = self.bedrooms;
        listing.bathrooms = self.bathrooms;
        listing.furnished = self.furnished;
        listing.parking = self.parking;
        listing.offer = self.offer;
        listing.image_urls = self.image_urls;
    }
}

fn validate_pricing(draft: &ListingDraft) -> Result<(), ValidationError> {
    if draft.offer && draft.discount_price >= draft.regular_price {
        let mut error = ValidationError::new("discount_price");
        error.message = Some("Discount price must be lower than regular price.".into());
        return Err(error);
    }
    Ok(())
}

#[allow(clippy::ptr_arg)]
fn validate_image_urls(urls: &Vec<String>) -> Result<(), ValidationError> {
    for raw in urls {
        let parsed = url::Url::parse(raw.trim()).map_err(|_| {
            let mut error = ValidationError::new("image_urls");
            error.message = Some(format!("'{raw}' is not an absolute URL.").into());
            error
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            let mut error = ValidationError::new("image_urls");
            error.message = Some("Image URLs must use http or https.".into());
            return Err(error);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateListingInput {
    pub name: String,
    pub description: String,
    pub address: String,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    pub regular_price: f64,
    #[serde(default)]
    pub discount_price: f64,
    #[serde(default)]
    pub currency: Currency,
    pub bedrooms: i32,
    pub bathrooms: i32,
    #[serde(default)]
    pub furnished: bool,
    #[serde(default)]
    pub parking: bool,
    #[serde(default)]
    pub offer: bool,
    pub image_urls: Vec<String>,
    /// Accepted for client compatibility; must name the caller.
    #[serde(default)]
    pub user_ref: Option<String>,
}

impl CreateListingInput {
    pub fn into_draft(self) -> ListingDraft {
        ListingDraft {
            name: self.name,
            description: self.description,
            address: self.address,
            listing_type: self.listing_type,
            regular_price: self.regular_price,
            discount_price: self.discount_price,
            currency: self.currency,
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            furnished: self.furnished,
            parking: self.parking,
            offer: self.offer,
            image_urls: self.image_urls,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateListingInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub listing_type: Option<ListingType>,
    pub regular_price: Option<f64>,
    pub discount_price: Option<f64>,
    pub currency: Option<Currency>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub furnished: Option<bool>,
    pub parking: Option<bool>,
    pub offer: Option<bool>,
    pub image_urls: Option<Vec<String>>,
    pub approved: Option<bool>,
    pub user_ref: Option<String>,
}

impl UpdateListingInput {
    /// Merge the provided fields over the stored listing's draft.
    pub fn merge_into(&self, mut draft: ListingDraft) -> ListingDraft {
        if let Some(value) = &self.name {
            draft.name = value.clone();
        }
        if let Some(value) = &self.description {
            draft.description = value.clone();
        }
        if let Some(value) = &self.address {
            draft.address = value.clone();
        }
        if let Some(value) = self.listing_type {
            draft.listing_type = value;
        }
        if let Some(value) = self.regular_price {
            draft.regular_price = value;
        }
        if let Some(value) = self.discount_price {
            draft.discount_price = value;
        }
        if let Some(value) = self.currency {
            draft.currency = value;
        }
        if let Some(value) = self.bedrooms {
            draft.bedrooms = value;
        }
        if let Some(value) = self.bathrooms {
            draft.bathrooms = value;
        }
        if let Some(value) = self.furnished {
            draft.furnished = value;
        }
        if let Some(value) = self.parking {
            draft.parking = value;
        }
        if let Some(value) = self.offer {
            draft.offer = value;
        }
        if let Some(value) = &self.image_urls {
            draft.image_urls = value.clone();
        }
        draft.normalized()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingsQuery {
    pub offer: Option<bool>,
    pub furnished: Option<bool>,
    pub parking: Option<bool>,
    #[serde(rename = "type")]
    pub listing_type: Option<String>,
    pub search_term: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<i64>,
    pub start_index: Option<i64>,
    pub user_ref: Option<String>,
    pub approved: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingReadQuery {
    #[serde(default, alias = "adminView")]
    pub admin_panel: Option<bool>,
    pub track_view: Option<bool>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrackViewInput {
    pub session_id: Option<String>,
    #[serde(default, alias = "adminView")]
    pub admin_panel: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct InquiryInput {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[validate(length(max = 2000))]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RejectInput {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateRoleInput {
    pub is_admin: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersQuery {
    pub limit: Option<i64>,
    pub start_index: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingPath {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerPath {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPath {
    pub id: String,
}
