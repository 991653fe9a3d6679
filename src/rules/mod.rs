pub mod catalog;
pub mod engine;
pub mod types;

pub use engine::{RuleEngine, RuleRunSummary};
pub use types::{FlagCandidate, Rule, RuleContext, RuleInfo};
