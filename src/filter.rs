//! Filter Engine
//!
//! Department/region membership on purchases, an inner join onto customers
//! by customer-link key, then the inclusive age bound. Output order follows
//! purchase order; a purchase matching several customer rows yields one
//! joined row per match, in customer-table order.

use crate::dataset::{CustomerRecord, PurchaseRecord};
use crate::error::Result;
use crate::selection::{AgeRange, FilterSelection};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One purchase joined to one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub customer_key: String,
    pub department: String,
    pub region: String,
    pub amount: f64,
    pub shipping: f64,
    pub age: i64,
    pub income: f64,
    pub birth_state: String,
}

impl JoinedRecord {
    fn join(purchase: &PurchaseRecord, customer: &CustomerRecord) -> Self {
        Self {
            customer_key: purchase.customer_key.clone(),
            department: purchase.department.clone(),
            region: purchase.region.clone(),
            amount: purchase.amount,
            shipping: purchase.shipping,
            age: customer.age,
            income: customer.income,
            birth_state: customer.birth_state.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedView {
    pub rows: Vec<JoinedRecord>,
}

impl JoinedView {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_revenue(&self) -> f64 {
        self.rows.iter().map(|r| r.amount).sum()
    }
}

/// Distinct department and region values, in first-appearance order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub departments: Vec<String>,
    pub regions: Vec<String>,
}

impl FilterOptions {
    pub fn from_purchases(purchases: &[PurchaseRecord]) -> Self {
        let mut seen_departments = HashSet::new();
        let mut seen_regions = HashSet::new();
        let mut options = Self::default();

        for purchase in purchases {
            if seen_departments.insert(purchase.department.as_str()) {
                options.departments.push(purchase.department.clone());
            }
            if seen_regions.insert(purchase.region.as_str()) {
                options.regions.push(purchase.region.clone());
            }
        }
        options
    }
}

pub struct FilterEngine;

impl FilterEngine {
    /// Step 1 only: purchases whose department and region are both selected.
    /// An empty department or region list matches no rows.
    pub fn filter_purchases<'a>(
        &self,
        purchases: &'a [PurchaseRecord],
        selection: &FilterSelection,
    ) -> Vec<&'a PurchaseRecord> {
        let departments = selection.department_set();
        let regions = selection.region_set();

        purchases
            .iter()
            .filter(|p| departments.contains(p.department.as_str()) && regions.contains(p.region.as_str()))
            .collect()
    }

    pub fn filter(
        &self,
        purchases: &[PurchaseRecord],
        customers: &[CustomerRecord],
        selection: &FilterSelection,
    ) -> Result<JoinedView> {
        let selected = self.filter_purchases(purchases, selection);
        debug!("Filter: {} purchases -> {} selected", purchases.len(), selected.len());
        self.join(&selected, customers, selection.age_range)
    }

    /// Steps 2 and 3 over purchases already narrowed by `filter_purchases`:
    /// inner join on the customer key, then keep customers within `age_range`.
    pub fn join(
        &self,
        selected: &[&PurchaseRecord],
        customers: &[CustomerRecord],
        age_range: AgeRange,
    ) -> Result<JoinedView> {
        let mut by_key: HashMap<&str, Vec<&CustomerRecord>> = HashMap::new();
        for customer in customers {
            by_key.entry(customer.customer_key.as_str()).or_default().push(customer);
        }

        let rows: Vec<JoinedRecord> = selected
            .iter()
            .flat_map(|purchase| {
                by_key
                    .get(purchase.customer_key.as_str())
                    .into_iter()
                    .flatten()
                    .filter(move |customer| age_range.contains(customer.age))
                    .map(move |customer| JoinedRecord::join(purchase, customer))
            })
            .collect();

        debug!(
            "Join: {} selected -> {} joined rows within ages {}..={}",
            selected.len(),
            rows.len(),
            age_range.min(),
            age_range.max()
        );

        Ok(JoinedView { rows })
    }
}
