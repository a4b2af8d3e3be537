//! Overcollateralization and interest coverage tests with cross-period cure tracking.

pub mod cure;
pub mod engine;
pub mod ic;
pub mod oc;
pub mod trigger;

pub use cure::{CoverageHistory, CureMeasurement, CureSplitPolicy};
pub use engine::{evaluate_coverage, run_coverage, CoverageInput, CoverageRequest, CoverageResult};
pub use oc::{CollateralBreakdown, CoverageConventions, DefaultedCarrying};
pub use trigger::{CoverageKind, CoverageTrigger, CureTrack, CureTrackRow, TriggerState};
