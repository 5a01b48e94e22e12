pub mod batches;
pub mod catalog;
pub mod stream;
