pub mod cli;
pub mod config;
pub mod descriptor;
pub mod detector;
pub mod error;
pub mod hamming;
pub mod keypoint;
pub mod matcher;
pub mod pipeline;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use descriptor::{DescriptorKind, DescriptorSet, Descriptors};
pub use detector::{Detector, DetectorFactory, Extractor, ImageFeatures};
pub use error::{Error, Result};
pub use keypoint::Keypoint;
pub use matcher::{Match, MatchList, MatcherKind, PairwiseMatcher};
pub use pipeline::{ImageSource, MatchingPipeline, PipelineConfig};
