pub mod inquiries;
pub mod moderation;
pub mod query_planner;
pub mod reactions;
pub mod views;
