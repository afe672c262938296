//! Text extraction for `/file-context` uploads.
//!
//! Each file is analyzed on its own; any failure, including a panic inside a
//! parser, becomes a fallback note for that file only.

mod image;
mod office;
mod pdf;
mod text;

pub use image::analyze_image;

use bytes::Bytes;

use crate::error::GatewayError;
use crate::state::AppState;
use crate::util::truncate_text;

/// Character cap applied to every analysis.
pub const MAX_ANALYSIS_CHARS: usize = 12_000;
/// Row cap for CSV files and per spreadsheet sheet.
pub const MAX_TABLE_ROWS: usize = 120;
pub const MAX_SHEETS: usize = 5;
pub const MAX_PDF_PAGES: usize = 25;
pub const ROW_TRUNCATION_MARKER: &str = "...[truncated]";

pub const DEFAULT_FILE_NAME: &str = "uploaded-file";
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const TEXT_EXTENSIONS: &[&str] = &[
    ".md", ".txt", ".json", ".yaml", ".yml", ".xml", ".log", ".html", ".js", ".ts", ".tsx", ".py",
    ".sql",
];

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),
    #[error("{0}")]
    Pdf(#[from] lopdf::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Malformed(String),
    #[error("{0}")]
    Upstream(#[from] GatewayError),
}

/// One uploaded file, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    /// Apply the default name and MIME type for missing multipart metadata.
    #[must_use]
    pub fn new(name: Option<&str>, mime_type: Option<&str>, bytes: Bytes) -> Self {
        let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(DEFAULT_FILE_NAME);
        let mime_type = mime_type
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MIME_TYPE);
        Self {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Pdf,
    Docx,
    Spreadsheet,
    Csv,
    Text,
    Other,
}

/// Classify by MIME type first, then by extension. Order matters: a
/// `text/csv` upload is CSV, not plain text.
#[must_use]
pub fn classify(name: &str, mime_type: &str) -> FileKind {
    let name = name.to_ascii_lowercase();
    let mime_type = mime_type.to_ascii_lowercase();

    if mime_type.starts_with("image/") {
        FileKind::Image
    } else if mime_type == "application/pdf" || name.ends_with(".pdf") {
        FileKind::Pdf
    } else if name.ends_with(".docx") {
        FileKind::Docx
    } else if [".xlsx", ".xlsm", ".xltx"].iter().any(|ext| name.ends_with(ext)) {
        FileKind::Spreadsheet
    } else if mime_type == "text/csv" || mime_type == "application/csv" || name.ends_with(".csv") {
        FileKind::Csv
    } else if mime_type.starts_with("text/") || TEXT_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        FileKind::Text
    } else {
        FileKind::Other
    }
}

/// Run the blocking extractor for a non-image kind.
fn analyze_document(kind: FileKind, file: &UploadedFile) -> Result<String, AnalysisError> {
    let extracted = match kind {
        FileKind::Pdf => pdf::extract_pdf(&file.bytes)?,
        FileKind::Docx => office::extract_docx(&file.bytes)?,
        FileKind::Spreadsheet => office::extract_spreadsheet(&file.bytes)?,
        FileKind::Csv => text::extract_csv(&file.bytes),
        FileKind::Text => crate::util::utf8_dropping_invalid(&file.bytes),
        FileKind::Other => {
            return Ok(format!(
                "Attached file {} ({}). This file type is not fully parseable yet, but the assistant should still consider that it was provided.",
                file.name, file.mime_type
            ));
        }
        FileKind::Image => {
            return Err(AnalysisError::Malformed(
                "image uploads are analyzed upstream".to_string(),
            ));
        }
    };
    Ok(truncate_text(&extracted, MAX_ANALYSIS_CHARS))
}

/// Fallback note used whenever analysis fails.
#[must_use]
pub fn fallback_analysis(name: &str, error: &str) -> String {
    format!("Attached file {name} could not be fully analyzed. Error: {error}")
}

/// Analyze one upload. Never fails: errors become [`fallback_analysis`].
pub async fn analyze_upload(state: &AppState, file: &UploadedFile) -> String {
    let kind = classify(&file.name, &file.mime_type);
    let result = if kind == FileKind::Image {
        analyze_image(state, file).await
    } else {
        let owned = file.clone();
        match tokio::task::spawn_blocking(move || analyze_document(kind, &owned)).await {
            Ok(result) => result,
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "parser panicked".to_string()
                } else {
                    join_err.to_string()
                };
                Err(AnalysisError::Malformed(reason))
            }
        }
    };

    match result {
        Ok(analysis) => analysis,
        Err(err) => {
            tracing::warn!(file = %file.name, kind = ?kind, error = %err, "file analysis failed");
            fallback_analysis(&file.name, &err.to_string())
        }
    }
}
