//! Typed purchase/customer tables and the backing store they are read from.
//!
//! A *source* is one workbook (a directory under the data root) and a
//! *table* is one of its sheets, exported as `<sheet>.parquet` or
//! `<sheet>.csv`. Raw frames are validated against the fixed column
//! contract below and converted to typed records once, at load time.

use crate::error::{ReportError, Result};
use async_trait::async_trait;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Customer-link key, present in both tables.
pub const COL_CUSTOMER_KEY: &str = "cliente_Log";
pub const COL_DEPARTMENT: &str = "Nome_Departamento";
pub const COL_REGION: &str = "estado";
pub const COL_AMOUNT: &str = "valor_compra";
pub const COL_SHIPPING: &str = "valor_frete";
pub const COL_AGE: &str = "idade";
pub const COL_INCOME: &str = "renda";
pub const COL_BIRTH_STATE: &str = "estado_nascimento";

/// Sheet file extensions, probed in this order.
const SHEET_EXTENSIONS: [&str; 2] = ["parquet", "csv"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub customer_key: String,
    pub department: String,
    pub region: String,
    pub amount: f64,
    pub shipping: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_key: String,
    pub age: i64,
    pub income: f64,
    pub birth_state: String,
}

/// Identifies one sheet of one workbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub source_id: String,
    pub table_id: String,
}

impl TableKey {
    pub fn new(source_id: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id, self.table_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Purchases,
    Customers,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Purchases => f.write_str("purchases"),
            TableKind::Customers => f.write_str("customers"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRows {
    Purchases(Vec<PurchaseRecord>),
    Customers(Vec<CustomerRecord>),
}

/// A validated, immutable sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    key: TableKey,
    rows: TableRows,
}

impl Table {
    pub fn new(key: TableKey, rows: TableRows) -> Self {
        Self { key, rows }
    }

    /// Validate a raw frame against the column contract for `kind`.
    pub fn from_frame(key: TableKey, kind: TableKind, df: &DataFrame) -> Result<Self> {
        let rows = match kind {
            TableKind::Purchases => TableRows::Purchases(decode_purchases(&key, df)?),
            TableKind::Customers => TableRows::Customers(decode_customers(&key, df)?),
        };
        debug!("Validated {} table {} ({} rows)", kind, key, df.height());
        Ok(Self { key, rows })
    }

    pub fn key(&self) -> &TableKey {
        &self.key
    }

    pub fn kind(&self) -> TableKind {
        match self.rows {
            TableRows::Purchases(_) => TableKind::Purchases,
            TableRows::Customers(_) => TableKind::Customers,
        }
    }

    pub fn len(&self) -> usize {
        match &self.rows {
            TableRows::Purchases(rows) => rows.len(),
            TableRows::Customers(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purchases(&self) -> Result<&[PurchaseRecord]> {
        match &self.rows {
            TableRows::Purchases(rows) => Ok(rows),
            TableRows::Customers(_) => Err(self.kind_mismatch(TableKind::Purchases)),
        }
    }

    pub fn customers(&self) -> Result<&[CustomerRecord]> {
        match &self.rows {
            TableRows::Customers(rows) => Ok(rows),
            TableRows::Purchases(_) => Err(self.kind_mismatch(TableKind::Customers)),
        }
    }

    fn kind_mismatch(&self, wanted: TableKind) -> ReportError {
        ReportError::Schema(format!(
            "Table {} holds {} records, not {}",
            self.key,
            self.kind(),
            wanted
        ))
    }
}

fn decode_purchases(key: &TableKey, df: &DataFrame) -> Result<Vec<PurchaseRecord>> {
    let keys = string_column(key, df, COL_CUSTOMER_KEY)?;
    let departments = string_column(key, df, COL_DEPARTMENT)?;
    let regions = string_column(key, df, COL_REGION)?;
    let amounts = f64_column(key, df, COL_AMOUNT)?;
    let shipping = f64_column(key, df, COL_SHIPPING)?;

    let rows = keys
        .into_iter()
        .zip(departments)
        .zip(regions)
        .zip(amounts.into_iter().zip(shipping))
        .map(|(((customer_key, department), region), (amount, shipping))| PurchaseRecord {
            customer_key,
            department,
            region,
            amount,
            shipping,
        })
        .collect();
    Ok(rows)
}

fn decode_customers(key: &TableKey, df: &DataFrame) -> Result<Vec<CustomerRecord>> {
    let keys = string_column(key, df, COL_CUSTOMER_KEY)?;
    let ages = i64_column(key, df, COL_AGE)?;
    let incomes = f64_column(key, df, COL_INCOME)?;
    let birth_states = string_column(key, df, COL_BIRTH_STATE)?;

    let rows = keys
        .into_iter()
        .zip(ages)
        .zip(incomes.into_iter().zip(birth_states))
        .map(|((customer_key, age), (income, birth_state))| CustomerRecord {
            customer_key,
            age,
            income,
            birth_state,
        })
        .collect();
    Ok(rows)
}

/// Fetch `name` and cast it to `dtype`, rejecting missing columns, empty
/// cells and values the cast cannot represent.
fn canonical_column(key: &TableKey, df: &DataFrame, name: &str, dtype: &DataType) -> Result<Series> {
    let series = df.column(name).map_err(|_| {
        ReportError::Schema(format!("Table {} is missing column '{}'", key, name))
    })?;

    let empty = series.null_count();
    if empty > 0 {
        return Err(ReportError::Schema(format!(
            "Column '{}' in table {} has {} empty values",
            name, key, empty
        )));
    }

    // Casting float to int truncates, so anything with a fractional part
    // must be refused before the cast hides it.
    if dtype.is_integer() && series.dtype().is_float() {
        let fractional = series
            .cast(&DataType::Float64)?
            .f64()?
            .into_no_null_iter()
            .filter(|v| v.fract() != 0.0 || !v.is_finite())
            .count();
        if fractional > 0 {
            return Err(ReportError::Schema(format!(
                "Column '{}' in table {} has {} non-integer values",
                name, key, fractional
            )));
        }
    }

    let cast = series.cast(dtype).map_err(|e| {
        ReportError::Schema(format!(
            "Column '{}' in table {} cannot be read as {}: {}",
            name, key, dtype, e
        ))
    })?;
    if cast.null_count() > 0 {
        return Err(ReportError::Schema(format!(
            "Column '{}' in table {} has {} values that are not {}",
            name,
            key,
            cast.null_count(),
            dtype
        )));
    }
    Ok(cast)
}

fn string_column(key: &TableKey, df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let series = canonical_column(key, df, name, &DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect();
    Ok(values)
}

fn i64_column(key: &TableKey, df: &DataFrame, name: &str) -> Result<Vec<i64>> {
    let series = canonical_column(key, df, name, &DataType::Int64)?;
    let values = series.i64()?.into_iter().map(|v| v.unwrap_or_default()).collect();
    Ok(values)
}

fn f64_column(key: &TableKey, df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = canonical_column(key, df, name, &DataType::Float64)?;
    let values = series.f64()?.into_iter().map(|v| v.unwrap_or_default()).collect();
    Ok(values)
}

/// Purchase rows back as a frame, using the sheet's column names.
pub fn purchases_frame(rows: &[PurchaseRecord]) -> Result<DataFrame> {
    let df = df!(
        COL_CUSTOMER_KEY => rows.iter().map(|r| r.customer_key.as_str()).collect::<Vec<_>>(),
        COL_DEPARTMENT => rows.iter().map(|r| r.department.as_str()).collect::<Vec<_>>(),
        COL_REGION => rows.iter().map(|r| r.region.as_str()).collect::<Vec<_>>(),
        COL_AMOUNT => rows.iter().map(|r| r.amount).collect::<Vec<_>>(),
        COL_SHIPPING => rows.iter().map(|r| r.shipping).collect::<Vec<_>>()
    )?;
    Ok(df)
}

pub fn customers_frame(rows: &[CustomerRecord]) -> Result<DataFrame> {
    let df = df!(
        COL_CUSTOMER_KEY => rows.iter().map(|r| r.customer_key.as_str()).collect::<Vec<_>>(),
        COL_AGE => rows.iter().map(|r| r.age).collect::<Vec<_>>(),
        COL_INCOME => rows.iter().map(|r| r.income).collect::<Vec<_>>(),
        COL_BIRTH_STATE => rows.iter().map(|r| r.birth_state.as_str()).collect::<Vec<_>>()
    )?;
    Ok(df)
}

/// Where raw sheets come from.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn read_table(&self, source_id: &str, table_id: &str) -> Result<DataFrame>;
}

/// Reads workbooks exported as one file per sheet under `root`.
pub struct FileTableSource {
    root: PathBuf,
}

impl FileTableSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_sheet(&self, source_id: &str, table_id: &str) -> Result<PathBuf> {
        let workbook = self.root.join(source_id);
        if !workbook.is_dir() {
            return Err(ReportError::DataLoad(format!(
                "Source '{}' is unreadable: {} is not a directory",
                source_id,
                workbook.display()
            )));
        }

        SHEET_EXTENSIONS
            .iter()
            .map(|ext| workbook.join(format!("{}.{}", table_id, ext)))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                ReportError::DataLoad(format!(
                    "Table '{}' not found in source '{}'",
                    table_id, source_id
                ))
            })
    }
}

#[async_trait]
impl TableSource for FileTableSource {
    async fn read_table(&self, source_id: &str, table_id: &str) -> Result<DataFrame> {
        let path = self.resolve_sheet(source_id, table_id)?;
        debug!("Reading sheet {}", path.display());

        tokio::task::spawn_blocking(move || read_sheet(&path))
            .await
            .map_err(|e| ReportError::DataLoad(format!("Sheet reader task failed: {}", e)))?
    }
}

fn read_sheet(path: &Path) -> Result<DataFrame> {
    let is_csv = path.extension().and_then(|e| e.to_str()) == Some("csv");
    let df = if is_csv {
        LazyCsvReader::new(path)
            .with_infer_schema_length(Some(1000))
            .finish()
            .and_then(|lf| lf.collect())
    } else {
        LazyFrame::scan_parquet(path, ScanArgsParquet::default()).and_then(|lf| lf.collect())
    };

    df.map_err(|e| ReportError::DataLoad(format!("Failed to read {}: {}", path.display(), e)))
}
