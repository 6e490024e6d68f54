use chrono::{DateTime, Utc};

use crate::models::{Inquiry, InquiryType, Listing};

pub const DEFAULT_INQUIRY_MESSAGE: &str = "General inquiry";

/// Append an inquiry event. Every call is a new event.
pub fn record_inquiry(
    listing: &mut Listing,
    user_id: &str,
    kind: InquiryType,
    message: Option<&str>,
    now: DateTime<Utc>,
) -> Inquiry {
    let message = message
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_INQUIRY_MESSAGE)
        .to_string();

    let inquiry = Inquiry {
        user_id: user_id.to_string(),
        kind,
        message,
        timestamp: now,
    };
    listing.inquiries_data.push(inquiry.clone());
    listing.inquiries = i32::try_from(listing.inquiries_data.len()).unwrap_or(i32::MAX);
    inquiry
}
