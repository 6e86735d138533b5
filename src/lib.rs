//! Grade averaging and class ranking engine for school gradebooks.
//!
//! Entries feed cached per-subject averages, subject averages feed a general
//! average, and general averages feed a competition-style class ranking.

pub mod average;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod ranking;
pub mod report;
pub mod store;

pub use config::EngineConfig;
pub use engine::Gradebook;
pub use error::{GradeError, Result};
