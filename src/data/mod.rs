//! Market data types, dataset sources and feature engineering

mod features;
mod store;
mod types;

pub use features::{FeatureBuilder, FeatureMatrix, FeatureRow};
pub use store::{CsvDirectory, DatasetSource};
pub use types::{Bar, Dataset};
