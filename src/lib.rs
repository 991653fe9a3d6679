pub mod analysis;
pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod review;
pub mod rules;
pub mod sanctions;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
