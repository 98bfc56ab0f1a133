pub mod codes;
pub mod config;
pub mod coverage;
pub mod fetch;
pub mod ranges;
pub mod reconcile;
pub mod report;
pub mod strategy;

#[cfg(test)]
pub(crate) mod fixtures;
