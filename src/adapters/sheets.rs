use crate::domain::dataset::Dataset;
use crate::domain::ports::SheetStore;
use crate::utils::error::Result;
use std::path::PathBuf;
use tracing::debug;

/// Spreadsheet ranges kept as CSV files under `{base}/{spreadsheet_id}/{range}.csv`.
#[derive(Debug, Clone)]
pub struct CsvSheetStore {
    base_path: PathBuf,
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

impl CsvSheetStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn range_path(&self, spreadsheet_id: &str, range: &str) -> PathBuf {
        self.base_path
            .join(sanitize(spreadsheet_id))
            .join(format!("{}.csv", sanitize(range)))
    }
}

impl SheetStore for CsvSheetStore {
    async fn fetch(&self, spreadsheet_id: &str, range: &str) -> Result<Dataset> {
        let path = self.range_path(spreadsheet_id, range);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Range {} has no data yet ({})", range, path.display());
                return Ok(Dataset::default());
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Dataset::default());
        }
        Dataset::from_csv_reader(bytes.as_slice())
    }

    async fn write(&self, spreadsheet_id: &str, range: &str, data: &Dataset) -> Result<()> {
        let path = self.range_path(spreadsheet_id, range);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data.to_csv_bytes()?).await?;
        debug!("Wrote {} rows to {}", data.len(), path.display());
        Ok(())
    }
}
