//! Prompt Composer
//!
//! A report template is parsed once into literal text and typed slots.
//! Rendering walks the slots and pulls each value from `PromptParams`
//! through an exhaustive match, so a slot can't be left unfilled, and
//! substituted values are never scanned for placeholders again.
//!
//! Template syntax: `{name}` is a slot, `{{` and `}}` are literal braces.
//! Every known slot must appear at least once; unknown names are rejected.

use crate::dataset::{customers_frame, purchases_frame, CustomerRecord, PurchaseRecord};
use crate::error::{ReportError, Result};
use crate::selection::{FilterSelection, Language};
use itertools::Itertools;
use polars::prelude::{CsvWriter, DataFrame, SerWriter};
use std::fmt;
use std::path::Path;

/// Rows shown in each table preview unless configured otherwise.
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

pub const TEMPLATE_V1_VERSION: &str = "sales-report/v1";

const TEMPLATE_V1: &str = r#"
You are a data analyst specialized in e-commerce analysis.
Your task is to write a comprehensive sales report for the selected Brazilian state(s): {state}.

The report must include the following:
1. **Introduction**:
   - Provide a summary of the dataset and its scope.
   - Mention the key focus areas of the analysis.

2. **Data Overview**:
   - Present a table summarizing the main metrics for the purchases:
     - Total number of purchases.
     - Average purchase value (with and without shipping).
     - Total revenue generated.
   - Provide a table showing customer demographics:
     - Age distribution (minimum, maximum, mean).
     - Income distribution (minimum, maximum, mean).
     - States of birth distribution.

3. **Detailed Analyses**:
   {analyses}

4. **Visualizations (Text Description)**:
   - Suggest how the data could be visualized (e.g., bar charts, line graphs, pie charts) for each analysis performed.

5. **Insights and Conclusions**:
   - Highlight key trends and patterns observed in the data.
   - Include actionable insights for business decision-making.

### Notes:
- Use only the data provided in the following tables:
1. Purchases Table:
{purchases_table}

2. Customers Table:
{customers_table}

- Present all numerical summaries in tables when applicable.
- Ensure the report is written in {language}.

"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    State,
    Analyses,
    PurchasesTable,
    CustomersTable,
    Language,
}

impl Placeholder {
    pub const ALL: [Placeholder; 5] = [
        Placeholder::State,
        Placeholder::Analyses,
        Placeholder::PurchasesTable,
        Placeholder::CustomersTable,
        Placeholder::Language,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::State => "state",
            Placeholder::Analyses => "analyses",
            Placeholder::PurchasesTable => "purchases_table",
            Placeholder::CustomersTable => "customers_table",
            Placeholder::Language => "language",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Placeholder::ALL.into_iter().find(|p| p.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Slot(Placeholder),
}

/// A parsed, versioned instruction skeleton.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTemplate {
    version: String,
    segments: Vec<Segment>,
}

/// Values for every template slot.
#[derive(Debug, Clone, Copy)]
pub struct PromptParams<'a> {
    pub state: &'a str,
    pub analyses: &'a str,
    pub purchases_table: &'a str,
    pub customers_table: &'a str,
    pub language: Language,
}

impl<'a> PromptParams<'a> {
    fn value(&self, slot: Placeholder) -> &'a str {
        match slot {
            Placeholder::State => self.state,
            Placeholder::Analyses => self.analyses,
            Placeholder::PurchasesTable => self.purchases_table,
            Placeholder::CustomersTable => self.customers_table,
            Placeholder::Language => self.language.name(),
        }
    }
}

impl ReportTemplate {
    /// The built-in sales report template.
    pub fn v1() -> Result<Self> {
        Self::parse(TEMPLATE_V1_VERSION, TEMPLATE_V1)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReportError::Template(format!("Cannot read template {}: {}", path.display(), e))
        })?;
        let version = format!("custom:{}", path.display());
        Self::parse(&version, &text)
    }

    pub fn parse(version: &str, text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => {
                                return Err(ReportError::Template(format!(
                                    "Unclosed placeholder '{{{}' in template {}",
                                    name, version
                                )))
                            }
                        }
                    }
                    let slot = Placeholder::from_name(name.trim()).ok_or_else(|| {
                        ReportError::Template(format!(
                            "Unknown placeholder '{{{}}}' in template {}",
                            name, version
                        ))
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(slot));
                }
                '}' => {
                    return Err(ReportError::Template(format!(
                        "Unmatched '}}' in template {}",
                        version
                    )))
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }

        let template = Self {
            version: version.to_string(),
            segments,
        };
        let missing: Vec<&str> = Placeholder::ALL
            .iter()
            .filter(|p| !template.has_slot(**p))
            .map(|p| p.name())
            .collect();
        if !missing.is_empty() {
            return Err(ReportError::Template(format!(
                "Template {} is missing placeholders: {}",
                version,
                missing.join(", ")
            )));
        }
        Ok(template)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn has_slot(&self, slot: Placeholder) -> bool {
        self.segments.iter().any(|s| *s == Segment::Slot(slot))
    }

    pub fn render(&self, params: &PromptParams<'_>) -> Prompt {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(slot) => out.push_str(params.value(*slot)),
            }
        }
        Prompt(out)
    }
}

/// A fully substituted instruction string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First `rows` purchases as CSV text with a header line.
pub fn purchases_preview(purchases: &[&PurchaseRecord], rows: usize) -> Result<String> {
    let head: Vec<PurchaseRecord> = purchases.iter().take(rows).map(|p| (*p).clone()).collect();
    render_table(purchases_frame(&head)?)
}

/// First `rows` customers as CSV text with a header line.
pub fn customers_preview(customers: &[CustomerRecord], rows: usize) -> Result<String> {
    let head = &customers[..rows.min(customers.len())];
    render_table(customers_frame(head)?)
}

/// Every row and every full cell value, independent of the `POLARS_FMT_*`
/// settings and terminal width that `DataFrame`'s `Display` honours.
fn render_table(mut df: DataFrame) -> Result<String> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf).include_header(true).finish(&mut df)?;
    String::from_utf8(buf)
        .map(|text| text.trim_end().to_string())
        .map_err(|e| ReportError::Template(format!("Table preview is not valid UTF-8: {}", e)))
}

pub struct PromptComposer;

impl PromptComposer {
    /// Fill `template` from the selection and the two table previews.
    /// Refuses a selection without analysis topics.
    pub fn compose(
        template: &ReportTemplate,
        selection: &FilterSelection,
        purchases_preview: &str,
        customers_preview: &str,
    ) -> Result<Prompt> {
        if selection.topics.is_empty() {
            return Err(ReportError::Template(
                "At least one analysis topic must be selected".to_string(),
            ));
        }

        let state = selection.regions.iter().join(", ");
        let analyses = selection.topics.iter().map(|t| format!("- {}", t)).join("\n");

        Ok(template.render(&PromptParams {
            state: &state,
            analyses: &analyses,
            purchases_table: purchases_preview,
            customers_table: customers_preview,
            language: selection.language,
        }))
    }
}
