//! # costfuse
//!
//! Hybrid repair-cost estimation for property inspection reports.
//!
//! Each inspection issue is priced by fusing up to three sources:
//! - A static cost catalog, fuzzy-matched by component name
//! - A rate-limited external reasoning call returning a JSON estimate
//! - A rule-based fallback keyed on coarse category and severity
//!
//! The fused estimate then gets a multi-dimensional confidence score and a
//! validation pass that can auto-correct implausible ranges. Related issues
//! are analyzed for causal chains and repair bundling opportunities.
//!
//! ## Pipeline
//! ```text
//! issues ──► realign ──► catalog lookup ──► reasoning? ──► fuse
//!                                                           │
//!            result ◄── bundle ◄── validate ◄── score  ◄────┘
//! ```
//!
//! ## Modules
//! - `pipeline`: the per-issue state machine and run orchestration
//! - `catalog`: static component cost catalog and fallback ranges
//! - `reasoning`: backend trait, Gemini client, retry policy, prompts
//! - `ratelimit`: spacing, rolling-window, and persisted daily limits
//! - `relations`: causal chains and bundling analysis
//! - `confidence`: multi-dimensional confidence scoring
//! - `validate`: post-fusion sanity checks and auto-correction

pub mod catalog;
pub mod classify;
pub mod confidence;
pub mod config;
pub mod diaglog;
pub mod pipeline;
pub mod ratelimit;
pub mod reasoning;
pub mod relations;
pub mod types;
pub mod validate;

pub use config::EstimatorConfig;
pub use pipeline::{Estimator, RunOutput};
pub use types::{FusedEstimate, InspectionReport, Issue};
