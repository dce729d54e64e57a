//! Object storage for finished artifacts.
//!
//! [`store::ObjectStore`] is the "upload bytes, get back a URL" seam the
//! pipeline depends on; [`s3::S3ObjectStore`] implements it for
//! S3-compatible buckets.

pub mod s3;
pub mod store;
