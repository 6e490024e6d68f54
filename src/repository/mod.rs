pub mod listing_store;
pub mod user_store;
