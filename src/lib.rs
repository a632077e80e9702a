pub mod assemble;
pub mod confidence;
pub mod config;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod explain;
pub mod extraction;
pub mod ingest;
pub mod output;
pub mod parameter_table;
pub mod predictor_table;
pub mod preprocess;
pub mod reconcile;
pub mod records;
pub mod regression;

pub use config::{ConfigWorkbook, EngineSettings};
pub use engine::{EstimationEngine, EstimationReport};
pub use error::{EstimationError, Result};
