use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::errors::{ReportError, Result};

/// Native document -> portable document.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `source` into a PDF inside `out_dir` and return its path.
    async fn to_pdf(&self, source: &Path, out_dir: &Path) -> Result<PathBuf>;
}

/// Headless LibreOffice. Hosts without it get `UnsupportedConversion` up front.
#[derive(Debug, Clone, Default)]
pub struct LibreOfficeConverter {
    program: Option<PathBuf>,
}

impl LibreOfficeConverter {
    pub fn new(program: Option<PathBuf>) -> Self {
        Self { program }
    }

    fn locate(&self) -> Result<PathBuf> {
        if let Some(p) = &self.program {
            return which::which(p).map_err(|_| {
                ReportError::UnsupportedConversion(format!("configured converter {} not found", p.display()))
            });
        }
        ["soffice", "libreoffice"]
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| ReportError::UnsupportedConversion("neither soffice nor libreoffice is installed".into()))
    }
}

#[async_trait]
impl Converter for LibreOfficeConverter {
    async fn to_pdf(&self, source: &Path, out_dir: &Path) -> Result<PathBuf> {
        let program = self.locate()?;
        tracing::debug!(program = %program.display(), source = %source.display(), "converting to pdf");

        let out = Command::new(&program)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(source)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ReportError::Conversion(format!("failed to spawn {}: {e}", program.display())))?;

        if !out.status.success() {
            return Err(ReportError::Conversion(format!(
                "{} exited with {}:\nSTDOUT:\n{}\nSTDERR:\n{}",
                program.display(),
                out.status.code().unwrap_or_default(),
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            )));
        }

        let stem = source
            .file_stem()
            .ok_or_else(|| ReportError::Conversion(format!("{} has no file name", source.display())))?;
        let pdf = out_dir.join(stem).with_extension("pdf");
        if !pdf.exists() {
            return Err(ReportError::Conversion(format!("converter reported success but {} is missing", pdf.display())));
        }
        Ok(pdf)
    }
}

/// For hosts where conversion is known to be impossible.
#[derive(Debug, Clone, Default)]
pub struct NoConverter;

#[async_trait]
impl Converter for NoConverter {
    async fn to_pdf(&self, _source: &Path, _out_dir: &Path) -> Result<PathBuf> {
        Err(ReportError::UnsupportedConversion("no converter configured on this host".into()))
    }
}
