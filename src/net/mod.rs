//! Network collaborators: file downloads and GitHub release lookups.

pub mod fetch;
pub mod release;

pub use fetch::{Fetcher, RetryPolicy, verify_sha256};
pub use release::{AssetSelector, GITHUB_API, ReleaseAsset, ReleaseClient, TieBreak};
