pub mod catalog;
pub mod evaluator;
pub mod extract;
pub mod manager;
pub mod report;
pub mod runner;
pub mod status;
pub mod store;
