//! Core processing modules for the raster-to-observation pipeline

pub mod align;
pub mod index;
pub mod matching;
pub mod observations;
pub mod zonal;

// Re-export main types
pub use align::{AlignmentParams, RasterAligner};
pub use index::VegetationIndexCalculator;
pub use matching::{DatastreamMatcher, MatchOutcome, MatchedStatistic, UnmatchedStatistic};
pub use observations::{commit_observations, ObservationBatchBuilder};
pub use zonal::{describe, Descriptive, ZonalStatisticsEngine, ZonalStatsOutcome};
