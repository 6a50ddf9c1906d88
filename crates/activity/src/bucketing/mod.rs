//! Input-space partitioning and bucket claiming
//!
//! - [`BucketingSpecification`] cuts an [`InputSpace`] into ordered [`BucketRange`]s
//! - [`BucketManager`] hands buckets to workers through compare-and-swap work-state writes

mod bucket;
mod manager;

pub use bucket::{
    validate_partition, Bucket, BucketRange, BucketState, BucketingSpecification, InputSpace,
};
pub use manager::{BucketAcquisition, BucketError, BucketManager};
