//! Jupyter notebook documents.
//!
//! Only the parts nbpub touches are typed; everything else (nbformat version,
//! cell contents, unknown metadata) round-trips as raw JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::{NbPubError, Result};

/// An `.ipynb` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    /// Cells in display order.
    #[serde(default)]
    pub cells: Vec<Value>,

    /// Notebook-level metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Remaining top-level fields (`nbformat`, `nbformat_minor`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kind of cell to insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Code,
    Markdown,
}

impl CellType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
        }
    }
}

/// A cell to be inserted with [`Notebook::insert_cell`].
#[derive(Debug, Clone)]
pub struct NewCell {
    pub cell_type: CellType,
    /// Source lines, without trailing newlines.
    pub source: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl NewCell {
    /// A code cell with empty metadata.
    pub fn code<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cell_type: CellType::Code,
            source: lines.into_iter().map(Into::into).collect(),
            metadata: Map::new(),
        }
    }

    /// Replace the cell metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        if let Value::Object(map) = metadata {
            self.metadata = map;
        }
        self
    }
}

impl Notebook {
    /// Parse a notebook from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| NbPubError::parse(format!("invalid notebook: {e}")))
    }

    /// Read and parse the notebook at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| NbPubError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| NbPubError::parse(format!("invalid notebook {}: {e}", path.display())))
    }

    /// Serialize to pretty JSON with a trailing newline, as Jupyter writes it.
    pub fn to_json(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(self)
            .map_err(|e| NbPubError::parse(format!("failed to serialize notebook: {e}")))?;
        text.push('\n');
        Ok(text)
    }

    /// Write the notebook to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NbPubError::io(parent, e))?;
        }
        std::fs::write(path, self.to_json()?).map_err(|e| NbPubError::io(path, e))
    }

    /// Insert `cell` at `position` (clamped to the cell count).
    ///
    /// Source lines are joined with newlines and stored as a list of lines
    /// that keep their line endings, which is how nbformat stores multi-line
    /// sources.
    pub fn insert_cell(&mut self, position: usize, cell: NewCell) {
        let source: Vec<Value> = split_keep_newlines(&cell.source.join("\n"))
            .into_iter()
            .map(Value::String)
            .collect();

        let mut obj = Map::new();
        obj.insert("cell_type".into(), json!(cell.cell_type.as_str()));
        obj.insert("id".into(), json!(Uuid::now_v7().simple().to_string()));
        obj.insert("metadata".into(), Value::Object(cell.metadata));
        obj.insert("source".into(), Value::Array(source));
        if cell.cell_type == CellType::Code {
            obj.insert("execution_count".into(), json!(0));
            obj.insert("outputs".into(), json!([]));
        }

        let position = position.min(self.cells.len());
        self.cells.insert(position, Value::Object(obj));
    }
}

fn split_keep_newlines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(String::from).collect()
}
