// src/config/mod.rs
pub mod catalog;
pub mod settings;

pub use catalog::{Bucket, BucketSpec, Catalog, CategorySpec, PatternSpec};
pub use settings::Settings;
