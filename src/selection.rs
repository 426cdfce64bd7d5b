//! Filter selection - the per-request value the presentation layer hands
//! to the pipeline.
//!
//! Departments, regions and topics keep the order the user picked them in
//! (the region list is echoed verbatim into the prompt). Duplicates are
//! dropped on construction.

use crate::error::{ReportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Output languages offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Portuguese,
    Spanish,
    French,
    German,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::English,
        Language::Portuguese,
        Language::Spanish,
        Language::French,
        Language::German,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Portuguese => "Portuguese",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Language::ALL
            .into_iter()
            .find(|lang| lang.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                ReportError::InvalidSelection(format!(
                    "Unsupported language '{}' (expected one of: {})",
                    wanted,
                    Language::ALL.map(|l| l.name()).join(", ")
                ))
            })
    }
}

/// The fixed catalog of analyses a report can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisTopic {
    SalesByDepartment,
    RevenueByState,
    CustomerDemographics,
    ProfitabilityByChannel,
    KeyInsights,
}

impl AnalysisTopic {
    pub const CATALOG: [AnalysisTopic; 5] = [
        AnalysisTopic::SalesByDepartment,
        AnalysisTopic::RevenueByState,
        AnalysisTopic::CustomerDemographics,
        AnalysisTopic::ProfitabilityByChannel,
        AnalysisTopic::KeyInsights,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisTopic::SalesByDepartment => "Sales performance by department",
            AnalysisTopic::RevenueByState => "Revenue analysis by state",
            AnalysisTopic::CustomerDemographics => "Customer demographic trends",
            AnalysisTopic::ProfitabilityByChannel => "Profitability by sales channel",
            AnalysisTopic::KeyInsights => "Key insights and recommendations",
        }
    }

    /// Pre-selected topics when the user has not chosen any yet.
    pub fn defaults() -> Vec<AnalysisTopic> {
        vec![AnalysisTopic::SalesByDepartment, AnalysisTopic::RevenueByState]
    }
}

impl fmt::Display for AnalysisTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AnalysisTopic {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        AnalysisTopic::CATALOG
            .into_iter()
            .find(|topic| topic.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ReportError::InvalidSelection(format!("Unknown analysis topic '{}'", wanted)))
    }
}

/// Inclusive age bounds. `min <= max` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(i64, i64)", into = "(i64, i64)")]
pub struct AgeRange {
    min: i64,
    max: i64,
}

impl AgeRange {
    pub const SLIDER_MIN: i64 = 18;
    pub const SLIDER_MAX: i64 = 100;

    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min > max {
            return Err(ReportError::InvalidSelection(format!(
                "Age range minimum {} is greater than maximum {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn contains(&self, age: i64) -> bool {
        self.min <= age && age <= self.max
    }
}

impl TryFrom<(i64, i64)> for AgeRange {
    type Error = ReportError;

    fn try_from((min, max): (i64, i64)) -> Result<Self> {
        Self::new(min, max)
    }
}

impl From<AgeRange> for (i64, i64) {
    fn from(range: AgeRange) -> Self {
        (range.min, range.max)
    }
}

impl Default for AgeRange {
    fn default() -> Self {
        Self {
            min: Self::SLIDER_MIN,
            max: Self::SLIDER_MAX,
        }
    }
}

/// Everything one report request filters and asks for.
///
/// An empty department or region list selects nothing; it is not a
/// wildcard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSelection {
    pub departments: Vec<String>,
    pub regions: Vec<String>,
    pub age_range: AgeRange,
    pub language: Language,
    pub topics: Vec<AnalysisTopic>,
}

impl FilterSelection {
    pub fn new<D, R>(
        departments: D,
        regions: R,
        age_range: AgeRange,
        language: Language,
        topics: Vec<AnalysisTopic>,
    ) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            departments: dedup_in_order(departments.into_iter().map(Into::into)),
            regions: dedup_in_order(regions.into_iter().map(Into::into)),
            age_range,
            language,
            topics: dedup_in_order(topics),
        }
    }

    pub fn department_set(&self) -> HashSet<&str> {
        self.departments.iter().map(String::as_str).collect()
    }

    pub fn region_set(&self) -> HashSet<&str> {
        self.regions.iter().map(String::as_str).collect()
    }
}

fn dedup_in_order<T, I>(items: I) -> Vec<T>
where
    T: Eq + std::hash::Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
