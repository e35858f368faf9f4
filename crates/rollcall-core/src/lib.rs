//! rollcall-core: Face location, descriptor extraction and gallery matching.
//!
//! Everything here is pure computation over in-memory rasters: a multi-pass
//! cascade locator, a texture descriptor and a blended-similarity matcher.
//! [`annotate`] draws recognition results back onto a frame.

pub mod annotate;
mod cascade;
pub mod detector;
pub mod extractor;
mod fallback;
pub mod frame;
pub mod preprocess;
pub mod types;

pub use detector::{CascadeDetector, DetectorConfig};
pub use extractor::TextureExtractor;
pub use preprocess::PreprocessError;
pub use types::{
    BlendedMatcher, Descriptor, FaceBox, FaceLocator, FeatureExtractor, GalleryEntry, MatchResult, Matcher,
};
