use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("template error: {0}")] Template(String),
    #[error("completion service error: {0}")] CompletionService(String),
    #[error("parse mismatch: requested {requested} paragraph(s), recovered {parsed}{}", missing_suffix(.missing))]
    ParseMismatch { requested: usize, parsed: usize, missing: Option<String> },
    #[error("completion reply is not valid JSON: {0}")] InvalidJson(String),
    #[error("portable-document conversion is not supported on this host: {0}")] UnsupportedConversion(String),
    #[error("conversion failed: {0}")] Conversion(String),
    #[error(transparent)] MissingEntitlement(#[from] EntitlementError),
    #[error("config error: {0}")] Config(String),
    #[error("session store error: {0}")] Store(String),
    #[error("io error: {0}")] Io(#[from] std::io::Error),
    #[error("serialization error: {0}")] Serde(#[from] serde_json::Error),
    #[error("document container error: {0}")] Zip(#[from] zip::result::ZipError),
}

/// Not an internal failure: the caller asked for a report that is not (yet) there.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    #[error("no session found for {0}")] NotFound(String),
    #[error("report for session {0} is not ready")] NotReady(String),
}

fn missing_suffix(missing: &Option<String>) -> String {
    match missing {
        Some(label) => format!(" (no paragraph for \"{label}\")"),
        None => String::new(),
    }
}

impl From<rusqlite::Error> for ReportError {
    fn from(e: rusqlite::Error) -> Self {
        ReportError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
