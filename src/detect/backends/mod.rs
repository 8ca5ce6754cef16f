pub mod null;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use null::NullDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
