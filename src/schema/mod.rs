//! Declared schemas for every raw extract
//!
//! Each dataset has a fixed, ordered list of fields. Source files are bound to
//! these positionally; header names are never used for type binding.

mod value;

pub use value::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Int32,
    Int64,
    Float32,
    /// Only produced by derivations, never declared for a raw extract
    Float64,
    Utf8,
}

impl SemanticType {
    /// SQLite column type used when the table is created
    pub fn sql_type(&self) -> &'static str {
        match self {
            SemanticType::Int32 | SemanticType::Int64 => "INTEGER",
            SemanticType::Float32 | SemanticType::Float64 => "REAL",
            SemanticType::Utf8 => "TEXT",
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticType::Int32 => write!(f, "int32"),
            SemanticType::Int64 => write!(f, "int64"),
            SemanticType::Float32 => write!(f, "float32"),
            SemanticType::Float64 => write!(f, "float64"),
            SemanticType::Utf8 => write!(f, "utf8"),
        }
    }
}

/// A statically declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: SemanticType,
}

impl FieldDef {
    pub const fn new(name: &'static str, ty: SemanticType) -> Self {
        Self { name, ty }
    }
}

/// An owned column description, as persisted in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SemanticType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SemanticType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl From<&FieldDef> for Column {
    fn from(field: &FieldDef) -> Self {
        Column::new(field.name, field.ty)
    }
}

/// Ordered schema of one raw extract
#[derive(Debug, PartialEq, Eq)]
pub struct DatasetSchema {
    pub dataset: &'static str,
    pub fields: &'static [FieldDef],
}

impl DatasetSchema {
    pub fn columns(&self) -> Vec<Column> {
        self.fields.iter().map(Column::from).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

use SemanticType::{Float32, Int32, Int64, Utf8};

pub static TRANSACTIONS_SCHEMA: DatasetSchema = DatasetSchema {
    dataset: "transactions",
    fields: &[
        FieldDef::new("household_id", Int32),
        FieldDef::new("basket_id", Int64),
        FieldDef::new("day", Int32),
        FieldDef::new("product_id", Int32),
        FieldDef::new("quantity", Int32),
        FieldDef::new("sales_amount", Float32),
        FieldDef::new("store_id", Int32),
        FieldDef::new("discount_amount", Float32),
        FieldDef::new("transaction_time", Int32),
        FieldDef::new("week_no", Int32),
        FieldDef::new("coupon_discount", Float32),
        FieldDef::new("coupon_discount_match", Float32),
    ],
};

pub static PRODUCTS_SCHEMA: DatasetSchema = DatasetSchema {
    dataset: "products",
    fields: &[
        FieldDef::new("product_id", Int32),
        FieldDef::new("manufacturer", Utf8),
        FieldDef::new("department", Utf8),
        FieldDef::new("brand", Utf8),
        FieldDef::new("commodity", Utf8),
        FieldDef::new("subcommodity", Utf8),
        FieldDef::new("size", Utf8),
    ],
};

pub static HOUSEHOLDS_SCHEMA: DatasetSchema = DatasetSchema {
    dataset: "households",
    fields: &[
        FieldDef::new("age_bracket", Utf8),
        FieldDef::new("marital_status", Utf8),
        FieldDef::new("income_bracket", Utf8),
        FieldDef::new("homeownership", Utf8),
        FieldDef::new("composition", Utf8),
        FieldDef::new("size_category", Utf8),
        FieldDef::new("child_category", Utf8),
        FieldDef::new("household_id", Int32),
    ],
};

pub static COUPONS_SCHEMA: DatasetSchema = DatasetSchema {
    dataset: "coupons",
    fields: &[
        FieldDef::new("coupon_upc", Utf8),
        FieldDef::new("product_id", Int32),
        FieldDef::new("campaign_id", Int32),
    ],
};

pub static CAMPAIGNS_SCHEMA: DatasetSchema = DatasetSchema {
    dataset: "campaigns",
    fields: &[
        FieldDef::new("description", Utf8),
        FieldDef::new("campaign_id", Int32),
        FieldDef::new("start_day", Int32),
        FieldDef::new("end_day", Int32),
    ],
};

pub static COUPON_REDEMPTIONS_SCHEMA: DatasetSchema = DatasetSchema {
    dataset: "coupon_redemptions",
    fields: &[
        FieldDef::new("household_id", Int32),
        FieldDef::new("day", Int32),
        FieldDef::new("coupon_upc", Utf8),
        FieldDef::new("campaign_id", Int32),
    ],
};

pub static CAMPAIGNS_HOUSEHOLDS_SCHEMA: DatasetSchema = DatasetSchema {
    dataset: "campaigns_households",
    fields: &[
        FieldDef::new("description", Utf8),
        FieldDef::new("household_id", Int32),
        FieldDef::new("campaign_id", Int32),
    ],
};

pub static CAUSAL_DATA_SCHEMA: DatasetSchema = DatasetSchema {
    dataset: "causal_data",
    fields: &[
        FieldDef::new("product_id", Int32),
        FieldDef::new("store_id", Int32),
        FieldDef::new("week_no", Int32),
        FieldDef::new("display", Utf8),
        FieldDef::new("mailer", Utf8),
    ],
};

/// The raw extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Transactions,
    Products,
    Households,
    Coupons,
    Campaigns,
    CouponRedemptions,
    CampaignsHouseholds,
    CausalData,
}

impl Dataset {
    pub const ALL: [Dataset; 8] = [
        Dataset::Transactions,
        Dataset::Products,
        Dataset::Households,
        Dataset::Coupons,
        Dataset::Campaigns,
        Dataset::CouponRedemptions,
        Dataset::CampaignsHouseholds,
        Dataset::CausalData,
    ];

    /// Dataset name, which is also its silver table name
    pub fn name(&self) -> &'static str {
        self.schema().dataset
    }

    /// File name of the extract under the source root
    pub fn source_file(&self) -> &'static str {
        match self {
            Dataset::Transactions => "transaction_data.csv",
            Dataset::Products => "product.csv",
            Dataset::Households => "hh_demographic.csv",
            Dataset::Coupons => "coupon.csv",
            Dataset::Campaigns => "campaign_desc.csv",
            Dataset::CouponRedemptions => "coupon_redempt.csv",
            Dataset::CampaignsHouseholds => "campaign_table.csv",
            Dataset::CausalData => "causal_data.csv",
        }
    }

    pub fn schema(&self) -> &'static DatasetSchema {
        match self {
            Dataset::Transactions => &TRANSACTIONS_SCHEMA,
            Dataset::Products => &PRODUCTS_SCHEMA,
            Dataset::Households => &HOUSEHOLDS_SCHEMA,
            Dataset::Coupons => &COUPONS_SCHEMA,
            Dataset::Campaigns => &CAMPAIGNS_SCHEMA,
            Dataset::CouponRedemptions => &COUPON_REDEMPTIONS_SCHEMA,
            Dataset::CampaignsHouseholds => &CAMPAIGNS_HOUSEHOLDS_SCHEMA,
            Dataset::CausalData => &CAUSAL_DATA_SCHEMA,
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dataset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Dataset::ALL
            .into_iter()
            .find(|d| d.name() == wanted)
            .ok_or_else(|| Error::UnknownDataset(s.to_string()))
    }
}

/// Look up the declared schema for a dataset name
pub fn schema_for(dataset_name: &str) -> Result<&'static DatasetSchema> {
    dataset_name.parse::<Dataset>().map(|d| d.schema())
}
