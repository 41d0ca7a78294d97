use serde::Serialize;
use std::ops::Range;

/// One keyword record. `index` is the row's position in the loaded table and
/// is the only key used to put results back in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub index: usize,
    pub keyword: String,
    pub brand: String,
    /// One tag list per category column, in column order.
    pub categories: Vec<Vec<String>>,
}

/// Column names of the uploaded table, in their original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub keyword: String,
    pub brand: String,
    pub categories: Vec<String>,
}

impl TableHeader {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        [self.keyword.as_str(), self.brand.as_str()]
            .into_iter()
            .chain(self.categories.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTable {
    pub header: TableHeader,
    pub rows: Vec<Row>,
}

/// What a category column tells the classifier: either the tags seen in the
/// upload, or free-text instructions when the column carried no tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    Tags { name: String, tags: Vec<String> },
    Instructions { name: String, instructions: String },
}

impl ColumnSpec {
    pub fn is_instruction_only(&self) -> bool {
        matches!(self, ColumnSpec::Instructions { .. })
    }
}

/// Table-wide context handed to the classifier alongside every batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableContext {
    pub columns: Vec<ColumnSpec>,
    pub brands: Vec<String>,
    pub system_prompt: Option<String>,
}

impl TableContext {
    /// Builds the context from a loaded table. Tags and brands keep the order
    /// in which they first appear.
    pub fn from_table(table: &InputTable) -> Self {
        let mut brands: Vec<String> = Vec::new();
        for row in &table.rows {
            if !row.brand.is_empty() && !brands.contains(&row.brand) {
                brands.push(row.brand.clone());
            }
        }

        let columns = table
            .header
            .categories
            .iter()
            .enumerate()
            .map(|(column, name)| {
                let mut tags: Vec<String> = Vec::new();
                for tag in table.rows.iter().filter_map(|row| row.categories.get(column)).flatten() {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
                if tags.is_empty() {
                    ColumnSpec::Instructions {
                        name: name.clone(),
                        instructions: String::new(),
                    }
                } else {
                    ColumnSpec::Tags {
                        name: name.clone(),
                        tags,
                    }
                }
            })
            .collect();

        Self {
            columns,
            brands,
            system_prompt: None,
        }
    }

    /// Sets the instructions of an instruction-only column. Columns that
    /// carry tags are left untouched; returns whether anything changed.
    pub fn set_instructions(&mut self, column: usize, text: &str) -> bool {
        match self.columns.get_mut(column) {
            Some(ColumnSpec::Instructions { instructions, .. }) if !text.trim().is_empty() => {
                *instructions = text.trim().to_string();
                true
            }
            _ => false,
        }
    }
}

/// A contiguous run of rows sent to the classifier in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a> {
    /// 0-based batch number.
    pub number: usize,
    /// Absolute index of the first row in the batch.
    pub start: usize,
    pub rows: &'a [Row],
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn row_range(&self) -> Range<usize> {
        self.start..self.start + self.rows.len()
    }
}

/// Labels assigned to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub labels: Vec<String>,
}

impl ClassificationResult {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Cell text for the `classification` column.
    pub fn render(&self) -> String {
        self.labels
            .iter()
            .map(|label| label.trim())
            .filter(|label| !label.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl From<&str> for ClassificationResult {
    fn from(label: &str) -> Self {
        Self::new(vec![label.to_string()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRow {
    pub row: Row,
    pub classification: ClassificationResult,
}

/// The input table plus a fully populated `classification` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTable {
    pub header: TableHeader,
    pub rows: Vec<ClassifiedRow>,
}

impl OutputTable {
    pub const CLASSIFICATION_COLUMN: &'static str = "classification";

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.header
            .names()
            .chain(std::iter::once(Self::CLASSIFICATION_COLUMN))
            .map(str::to_string)
            .collect()
    }
}

/// Summary returned by the preview endpoint.
#[derive(Debug, Serialize)]
pub struct TableSummary {
    pub keywords_count: usize,
    pub columns: Vec<ColumnSpec>,
    pub brands: Vec<String>,
}

impl From<&InputTable> for TableSummary {
    fn from(table: &InputTable) -> Self {
        let context = TableContext::from_table(table);
        Self {
            keywords_count: table.rows.len(),
            columns: context.columns,
            brands: context.brands,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<[usize; 2]>,
}
