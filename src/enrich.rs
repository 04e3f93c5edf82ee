//! Household enrichment with ordinal surrogates
//!
//! Income brackets and composition labels are free text in the extract. Two
//! constant lookups turn them into integers that sort the way the categories
//! do; a label with no entry maps to `-1` instead of null.

use crate::error::{Error, Result};
use crate::load::RowTransform;
use crate::schema::{Column, DatasetSchema, Row, SemanticType, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Substituted when a label has no lookup entry
pub const LOOKUP_MISS: i32 = -1;

/// Lower bound of each income bracket, in thousands
pub const INCOME_BRACKETS: [(&str, i32); 12] = [
    ("Under 15K", 0),
    ("15-24K", 15),
    ("25-34K", 25),
    ("35-49K", 35),
    ("50-74K", 50),
    ("75-99K", 75),
    ("100-124K", 100),
    ("125-149K", 125),
    ("150-174K", 150),
    ("175-199K", 175),
    ("200-249K", 200),
    ("250K+", 250),
];

pub const COMPOSITIONS: [(&str, i32); 6] = [
    ("Single Female", 0),
    ("Single Male", 1),
    ("1 Adult Kids", 2),
    ("2 Adults Kids", 3),
    ("2 Adults No Kids", 4),
    ("Unknown", 5),
];

/// Exact-match label to ordinal mapping
#[derive(Debug, Clone)]
pub struct OrdinalLookup {
    axis: &'static str,
    entries: HashMap<&'static str, i32>,
}

impl OrdinalLookup {
    pub fn new(axis: &'static str, entries: &[(&'static str, i32)]) -> Self {
        Self {
            axis,
            entries: entries.iter().copied().collect(),
        }
    }

    pub fn income() -> Self {
        Self::new("income_bracket", &INCOME_BRACKETS)
    }

    pub fn composition() -> Self {
        Self::new("composition", &COMPOSITIONS)
    }

    pub fn axis(&self) -> &'static str {
        self.axis
    }

    pub fn get(&self, label: Option<&str>) -> Option<i32> {
        label.and_then(|l| self.entries.get(l).copied())
    }

    /// Ordinal for `label`, or [`LOOKUP_MISS`]
    pub fn lookup(&self, label: Option<&str>) -> i32 {
        self.get(label).unwrap_or(LOOKUP_MISS)
    }
}

/// A households row as declared in the extract
#[derive(Debug, Clone, PartialEq)]
pub struct RawHousehold {
    pub age_bracket: Option<String>,
    pub marital_status: Option<String>,
    pub income_bracket: Option<String>,
    pub homeownership: Option<String>,
    pub composition: Option<String>,
    pub size_category: Option<String>,
    pub child_category: Option<String>,
    pub household_id: Option<i32>,
}

impl TryFrom<Row> for RawHousehold {
    type Error = Error;

    fn try_from(row: Row) -> Result<Self> {
        let [age, marital, income, home, composition, size, child, id]: [Value; 8] =
            row.try_into().map_err(|row: Row| {
                Error::Other(format!("households row has {} values, expected 8", row.len()))
            })?;

        Ok(Self {
            age_bracket: text(age)?,
            marital_status: text(marital)?,
            income_bracket: text(income)?,
            homeownership: text(home)?,
            composition: text(composition)?,
            size_category: text(size)?,
            child_category: text(child)?,
            household_id: match id {
                Value::Null => None,
                Value::Int32(v) => Some(v),
                other => return Err(Error::Other(format!("household_id {:?} is not int32", other))),
            },
        })
    }
}

fn text(value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Utf8(s) => Ok(Some(s)),
        other => Err(Error::Other(format!("expected text, found {:?}", other))),
    }
}

/// An enriched households row
#[derive(Debug, Clone, PartialEq)]
pub struct Household {
    pub household_id: Option<i32>,
    pub age_bracket: Option<String>,
    pub marital_status: Option<String>,
    pub income_bracket: Option<String>,
    pub income_bracket_alt: i32,
    pub homeownership: Option<String>,
    pub composition: Option<String>,
    pub composition_sort_order: i32,
    pub size_category: Option<String>,
    pub child_category: Option<String>,
}

impl Household {
    pub fn columns() -> Vec<Column> {
        use SemanticType::{Int32, Utf8};
        vec![
            Column::new("household_id", Int32),
            Column::new("age_bracket", Utf8),
            Column::new("marital_status", Utf8),
            Column::new("income_bracket", Utf8),
            Column::new("income_bracket_alt", Int32),
            Column::new("homeownership", Utf8),
            Column::new("composition", Utf8),
            Column::new("composition_sort_order", Int32),
            Column::new("size_category", Utf8),
            Column::new("child_category", Utf8),
        ]
    }

    pub fn into_row(self) -> Row {
        vec![
            Value::from(self.household_id),
            Value::from(self.age_bracket),
            Value::from(self.marital_status),
            Value::from(self.income_bracket),
            Value::Int32(self.income_bracket_alt),
            Value::from(self.homeownership),
            Value::from(self.composition),
            Value::Int32(self.composition_sort_order),
            Value::from(self.size_category),
            Value::from(self.child_category),
        ]
    }
}

/// Join households to both lookups independently; no row is dropped
pub fn enrich_households(
    raw_households: Vec<RawHousehold>,
    income_lookup: &OrdinalLookup,
    composition_lookup: &OrdinalLookup,
) -> Vec<Household> {
    raw_households
        .into_iter()
        .map(|raw| Household {
            income_bracket_alt: income_lookup.lookup(raw.income_bracket.as_deref()),
            composition_sort_order: composition_lookup.lookup(raw.composition.as_deref()),
            household_id: raw.household_id,
            age_bracket: raw.age_bracket,
            marital_status: raw.marital_status,
            income_bracket: raw.income_bracket,
            homeownership: raw.homeownership,
            composition: raw.composition,
            size_category: raw.size_category,
            child_category: raw.child_category,
        })
        .collect()
}

/// Enriches households batches during a load and tallies lookup misses
pub struct HouseholdEnricher {
    income: OrdinalLookup,
    composition: OrdinalLookup,
    misses: Mutex<BTreeMap<(&'static str, String), u64>>,
}

impl Default for HouseholdEnricher {
    fn default() -> Self {
        Self::new(OrdinalLookup::income(), OrdinalLookup::composition())
    }
}

impl HouseholdEnricher {
    pub fn new(income: OrdinalLookup, composition: OrdinalLookup) -> Self {
        Self {
            income,
            composition,
            misses: Mutex::new(BTreeMap::new()),
        }
    }

    /// Lookup misses seen so far, per axis and label
    pub fn misses(&self) -> BTreeMap<(&'static str, String), u64> {
        self.misses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_miss(&self, lookup: &OrdinalLookup, label: Option<&str>) {
        let label = label.unwrap_or("<null>").to_string();
        let mut misses = self
            .misses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = misses.entry((lookup.axis(), label.clone())).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!("No {} ordinal for {:?}, using {}", lookup.axis(), label, LOOKUP_MISS);
        }
    }
}

impl RowTransform for HouseholdEnricher {
    fn output_columns(&self, _input: &DatasetSchema) -> Vec<Column> {
        Household::columns()
    }

    fn apply(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        let raw = rows
            .into_iter()
            .map(RawHousehold::try_from)
            .collect::<Result<Vec<_>>>()?;

        for household in &raw {
            if self.income.get(household.income_bracket.as_deref()).is_none() {
                self.record_miss(&self.income, household.income_bracket.as_deref());
            }
            if self.composition.get(household.composition.as_deref()).is_none() {
                self.record_miss(&self.composition, household.composition.as_deref());
            }
        }

        Ok(enrich_households(raw, &self.income, &self.composition)
            .into_iter()
            .map(Household::into_row)
            .collect())
    }

    fn finish(&self) {
        let misses = self.misses();
        if misses.is_empty() {
            return;
        }
        let total: u64 = misses.values().sum();
        let labels = misses
            .keys()
            .map(|(axis, label)| format!("{}={:?}", axis, label))
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            "households: {} lookup misses set to {} ({})",
            total, LOOKUP_MISS, labels
        );
    }
}
