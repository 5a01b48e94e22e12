pub mod batches;
pub mod catalog;
