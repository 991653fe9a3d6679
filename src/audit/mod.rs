pub mod pricing;
pub mod tracker;

pub use pricing::PricingTable;
pub use tracker::{AttemptRecord, AuditSummary, AuditTracker};
