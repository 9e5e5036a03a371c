pub mod cache_store;
pub mod generator;
pub mod media;
pub mod progress;
pub mod slides;
pub mod transcriber;
