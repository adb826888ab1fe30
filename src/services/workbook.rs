use sha2::{Digest, Sha256};

use crate::errors::AppError;

/// One sheet of a decoded workbook: all records as text cells, in source
/// order. Fund statements usually carry preamble rows (fund name, statement
/// date) above the holdings table, so header detection is the parser's job.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetBlock {
    pub index: usize,
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Capability seam for workbook decoding. The bundled implementation reads
/// delimited text workbooks; richer formats plug in behind the same trait.
pub trait WorkbookDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<SheetBlock>, AppError>;
}

/// Decoder for delimited text workbooks. A line of the form
/// `### <sheet name>` opens a new sheet; the CSV rows that follow belong to
/// it. A file without markers is a single sheet named `Sheet1`.
pub struct DelimitedWorkbookDecoder;

const SHEET_MARKER: &str = "### ";
const DEFAULT_SHEET_NAME: &str = "Sheet1";

impl WorkbookDecoder for DelimitedWorkbookDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<SheetBlock>, AppError> {
        let text = String::from_utf8_lossy(bytes);

        let mut sections: Vec<(String, String)> = Vec::new();
        let mut current_name: Option<String> = None;
        let mut current_body = String::new();

        for line in text.lines() {
            if let Some(name) = line.strip_prefix(SHEET_MARKER) {
                if current_name.is_some() || !current_body.trim().is_empty() {
                    sections.push((
                        current_name
                            .take()
                            .unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
                        std::mem::take(&mut current_body),
                    ));
                }
                current_name = Some(name.trim().to_string());
            } else {
                current_body.push_str(line);
                current_body.push('\n');
            }
        }
        if current_name.is_some() || !current_body.trim().is_empty() {
            sections.push((
                current_name.unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
                current_body,
            ));
        }

        let mut sheets = Vec::new();
        for (index, (name, body)) in sections.into_iter().enumerate() {
            let mut rows: Vec<Vec<String>> = Vec::new();
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(body.as_bytes());
            for record in reader.records() {
                let record = record.map_err(|e| {
                    AppError::Validation(format!("sheet '{}' is not parseable: {}", name, e))
                })?;
                let cells: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
                if cells.iter().all(|c| c.is_empty()) {
                    continue;
                }
                rows.push(cells);
            }

            if rows.is_empty() {
                continue;
            }
            sheets.push(SheetBlock { index, name, rows });
        }

        Ok(sheets)
    }
}

/// sha256 of the raw workbook bytes, the content address of an upload.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Deterministic identity of one sheet within a workbook; reused as the id
/// of the portfolio extracted from it.
pub fn sheet_identity(content_hash: &str, index: usize, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let digest = hex_encode(&hasher.finalize());
    digest[..32].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
