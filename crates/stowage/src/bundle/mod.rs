//! Physical archives: where they live and how their bytes are decoded.

mod crypto;
mod resolver;

pub use crypto::{BUNDLE_KEY, BundleReader, ReadMode, encode_bundle, read_bundle, selector_for};
pub use resolver::{BundleLocation, BundleResolver};
