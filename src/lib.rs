//! Clinical report generation: form bullets and test selections are turned into
//! a bounded number of batched completion calls, the replies are parsed back
//! into named slots, and the slots are substituted into a document template.

pub mod cli;
pub mod config;
pub mod convert;
pub mod document;
pub mod errors;
pub mod form;
pub mod log;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod report;
pub mod session;
pub mod substitute;
pub mod ux;
pub mod wire;

pub use errors::{EntitlementError, ReportError, Result};
pub use form::{ReportForm, SectionSpec, TestSpec};
pub use report::{GeneratedReport, GeneratorSettings, OutputFormat, ReportGenerator};
