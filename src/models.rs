use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Rent,
    Sale,
}

impl ListingType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rent => "rent",
            Self::Sale => "sale",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "UGX")]
    Ugx,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Ugx => "UGX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InquiryType {
    Call,
    Email,
    Message,
    #[default]
    General,
}

impl InquiryType {
    /// Blank input means `General`; anything else must name a known type.
    pub fn parse_lenient(raw: Option<&str>) -> Result<Self, String> {
        let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::General);
        };
        match value.to_ascii_lowercase().as_str() {
            "call" => Ok(Self::Call),
            "email" => Ok(Self::Email),
            "message" => Ok(Self::Message),
            "general" => Ok(Self::General),
            _ => Err(format!(
                "Unknown inquiry type '{value}'. Expected one of call, email, message, general."
            )),
        }
    }
}

/// One counted view by a signed-in visitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousView {
    pub session_id: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Membership entry of the liked/saved sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inquiry {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: InquiryType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A property listing as stored in `listings`. Rows arrive through
/// `row_to_json` with snake_case column keys; clients receive camelCase.
/// Entries inside the jsonb collections are camelCase in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Listing {
    #[serde(rename(serialize = "_id"))]
    pub id: String,
    pub name: String,
    pub description: String,
    pub address: String,
    #[serde(rename = "type", alias = "listing_type")]
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
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub user_ref: String,

    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved_by: Option<String>,

    #[serde(default)]
    pub views: i32,
    #[serde(default)]
    pub likes: i32,
    #[serde(default)]
    pub saves: i32,
    #[serde(default)]
    pub inquiries: i32,
    #[serde(default)]
    pub viewed_by: Vec<UserView>,
    #[serde(default)]
    pub anonymous_views: Vec<AnonymousView>,
    #[serde(default)]
    pub liked_by: Vec<Reaction>,
    #[serde(default)]
    pub saved_by: Vec<Reaction>,
    #[serde(default)]
    pub inquiries_data: Vec<Inquiry>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_ref == user_id
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.liked_by.iter().any(|entry| entry.user_id == user_id)
    }

    pub fn is_saved_by(&self, user_id: &str) -> bool {
        self.saved_by.iter().any(|entry| entry.user_id == user_id)
    }

    /// Counters derived from collections must equal their lengths. `views`
    /// is excluded: the anonymous log is pruned, the counter is not.
    pub fn counters_consistent(&self) -> bool {
        self.likes as usize == self.liked_by.len()
            && self.saves as usize == self.saved_by.len()
            && self.inquiries as usize == self.inquiries_data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{Currency, Listing, ListingType};

    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .expect("valid instant")
    }

    pub fn listing(owner: &str) -> Listing {
        let created = at(2026, 3, 1, 9, 0);
        Listing {
            id: "7d5b3f3e-5a43-4d8a-9a52-1f2e8c7b6a10".to_string(),
            name: "Lakeside cottage".to_string(),
            description: "Two bedrooms near the water".to_string(),
            address: "12 Port Bell Rd, Kampala".to_string(),
            listing_type: ListingType::Rent,
            regular_price: 1200.0,
            discount_price: 0.0,
            currency: Currency::Usd,
            bedrooms: 2,
            bathrooms: 1,
            furnished: true,
            parking: false,
            offer: false,
            image_urls: vec!["https://img.test/cottage.jpg".to_string()],
            user_ref: owner.to_string(),
            approved: false,
            rejection_reason: None,
            approved_at: None,
            approved_by: None,
            views: 0,
            likes: 0,
            saves: 0,
            inquiries: 0,
            viewed_by: Vec::new(),
            anonymous_views: Vec::new(),
            liked_by: Vec::new(),
            saved_by: Vec::new(),
            inquiries_data: Vec::new(),
            created_at: created,
            updated_at: created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fixtures, InquiryType, Listing};
    use serde_json::json;

    #[test]
    fn inquiry_type_blank_defaults_to_general() {
        assert_eq!(InquiryType::parse_lenient(None), Ok(InquiryType::General));
        assert_eq!(InquiryType::parse_lenient(Some("  ")), Ok(InquiryType::General));
        assert_eq!(InquiryType::parse_lenient(Some("Call")), Ok(InquiryType::Call));
        assert!(InquiryType::parse_lenient(Some("carrier-pigeon")).is_err());
    }

    #[test]
    fn reads_row_json_and_writes_client_names() {
        let row = json!({
            "id": "7d5b3f3e-5a43-4d8a-9a52-1f2e8c7b6a10",
            "name": "Flat",
            "description": "Bright",
            "address": "1 Main St",
            "listing_type": "sale",
            "regular_price": 90000.0,
            "discount_price": 85000.0,
            "currency": "UGX",
            "bedrooms": 3,
            "bathrooms": 2,
            "furnished": false,
            "parking": true,
            "offer": true,
            "image_urls": ["https://img.test/a.jpg"],
            "user_ref": "u1",
            "approved": true,
            "rejection_reason": null,
            "approved_at": "2026-03-02T10:00:00+00:00",
            "approved_by": "admin",
            "views": 4,
            "likes": 1,
            "saves": 0,
            "inquiries": 0,
            "viewed_by": [],
            "anonymous_views": [],
            "liked_by": [{"userId": "u2", "timestamp": "2026-03-02T11:00:00+00:00"}],
            "saved_by": [],
            "inquiries_data": [],
            "created_at": "2026-03-01T09:00:00.123456+00:00",
            "updated_at": "2026-03-01T09:00:00.123456+00:00"
        });
        let listing: Listing = serde_json::from_value(row).expect("row decodes");
        assert!(listing.counters_consistent());
        assert!(listing.is_liked_by("u2"));

        let wire = serde_json::to_value(&listing).expect("encodes");
        assert_eq!(wire["_id"], "7d5b3f3e-5a43-4d8a-9a52-1f2e8c7b6a10");
        assert_eq!(wire["type"], "sale");
        assert_eq!(wire["userRef"], "u1");
        assert_eq!(wire["regularPrice"], 90000.0);
        assert_eq!(wire["likedBy"][0]["userId"], "u2");
        assert_eq!(wire["currency"], "UGX");
    }

    #[test]
    fn fresh_listing_has_consistent_counters() {
        let listing = fixtures::listing("u1");
        assert!(listing.counters_consistent());
        assert!(listing.is_owned_by("u1"));
        assert!(!listing.is_owned_by("u2"));
    }
}
