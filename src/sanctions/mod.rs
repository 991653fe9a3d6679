pub mod list;
pub mod loader;

pub use list::SanctionsList;
