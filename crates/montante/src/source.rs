//! Tabular data providers.

use std::path::{Path, PathBuf};

use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use tracing::debug;

use crate::error::{MontanteError, Result};

/// Rows used to infer CSV column types.
const INFER_SCHEMA_ROWS: usize = 100;

/// Anything that can hand over a dataset.
pub trait DataSource {
    /// Materializes the dataset.
    fn to_dataframe(&self) -> Result<DataFrame>;
}

impl DataSource for DataFrame {
    fn to_dataframe(&self) -> Result<DataFrame> {
        Ok(self.clone())
    }
}

/// A CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    separator: u8,
}

impl CsvSource {
    /// A comma-separated file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            separator: b',',
        }
    }

    /// Uses `separator` instead of a comma.
    #[must_use]
    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// The file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for CsvSource {
    fn to_dataframe(&self) -> Result<DataFrame> {
        if !self.path.is_file() {
            return Err(MontanteError::InvalidData(format!(
                "CSV file not found: {}",
                self.path.display()
            )));
        }

        let df = CsvReadOptions::default()
            .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
            .with_has_header(true)
            .with_parse_options(
                CsvParseOptions::default()
                    .with_separator(self.separator)
                    .with_quote_char(Some(b'"')),
            )
            .try_into_reader_with_file_path(Some(self.path.clone()))?
            .finish()?;
        debug!("Loaded {} ({} x {})", self.path.display(), df.height(), df.width());
        Ok(df)
    }
}
