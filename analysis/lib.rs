//! Housing-sale analysis: data-quality correction, feature derivation, best-subset
//! linear regression with outlier refinement, and logistic classification of
//! "good quality" homes evaluated by confusion matrix, ROC and likelihood ratio.
//!
//! The stages run once, in order, over one in-memory table; see [`pipeline`].

pub mod classify;
pub mod cleaning;
pub mod config;
pub mod data;
pub mod design;
pub mod diagnostics;
pub mod evaluate;
pub mod features;
pub mod linalg;
pub mod logistic;
pub mod ols;
pub mod pipeline;
pub mod record;
pub mod refine;
pub mod report;
pub mod selection;
pub mod split;
pub mod synthetic;

pub use config::AnalysisConfig;
pub use pipeline::{AnalysisReport, PipelineError, run_analysis, run_from_path};
pub use record::HouseSale;
