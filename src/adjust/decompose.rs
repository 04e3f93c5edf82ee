//! Row-level discount decomposition
//!
//! A raw line carries one blended `coupon_discount` plus a
//! `coupon_discount_match`. A coupon is attributed to the manufacturer when
//! the match value is non-zero and to the retailer's campaign otherwise. The
//! extract cannot link a line to a redemption, so this is a policy, not a fact
//! recovered from the data.

use crate::schema::{Column, Row, SemanticType, Value};
use serde::Serialize;
use sqlx::FromRow;

/// A transactions row as committed in the table store
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct RawTransaction {
    pub household_id: Option<i32>,
    pub basket_id: Option<i64>,
    pub day: Option<i32>,
    pub product_id: Option<i32>,
    pub quantity: Option<i32>,
    pub sales_amount: Option<f32>,
    pub store_id: Option<i32>,
    pub discount_amount: Option<f32>,
    pub transaction_time: Option<i32>,
    pub week_no: Option<i32>,
    pub coupon_discount: Option<f32>,
    pub coupon_discount_match: Option<f32>,
}

/// The numeric inputs of one line, nulls already replaced by zero
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Amounts {
    pub sales: f64,
    pub discount: f64,
    pub coupon: f64,
    pub coupon_match: f64,
}

impl Amounts {
    /// The one place nulls become zero
    pub fn coalesce(raw: &RawTransaction) -> Self {
        let zero = |v: Option<f32>| v.map(f64::from).unwrap_or(0.0);
        Self {
            sales: zero(raw.sales_amount),
            discount: zero(raw.discount_amount),
            coupon: zero(raw.coupon_discount),
            coupon_match: zero(raw.coupon_discount_match),
        }
    }

    pub fn attribution(&self) -> CouponAttribution {
        if self.coupon == 0.0 {
            CouponAttribution::NoCoupon
        } else if self.coupon_match != 0.0 {
            CouponAttribution::Manufacturer
        } else {
            CouponAttribution::Campaign
        }
    }
}

/// Who funded a line's coupon discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponAttribution {
    NoCoupon,
    Campaign,
    Manufacturer,
}

/// The decomposed discount columns
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Discounts {
    pub amount_list: f64,
    pub campaign_coupon_discount: f64,
    pub manuf_coupon_discount: f64,
    pub manuf_coupon_match_discount: f64,
    pub total_coupon_discount: f64,
    pub instore_discount: f64,
    pub amount_paid: f64,
}

/// Negation that never produces `-0.0`
fn negate(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        -v
    }
}

pub fn decompose(amounts: Amounts) -> Discounts {
    let Amounts {
        sales,
        discount,
        coupon,
        coupon_match,
    } = amounts;
    let manufacturer = coupon_match != 0.0;

    Discounts {
        amount_list: sales - discount - coupon - coupon_match,
        campaign_coupon_discount: if manufacturer { 0.0 } else { negate(coupon) },
        manuf_coupon_discount: if manufacturer { negate(coupon) } else { 0.0 },
        manuf_coupon_match_discount: negate(coupon_match),
        total_coupon_discount: negate(coupon - coupon_match),
        instore_discount: negate(discount),
        amount_paid: sales,
    }
}

impl Discounts {
    /// How far the row is from `amount_list - discounts == amount_paid`
    pub fn reconciliation_error(&self) -> f64 {
        (self.amount_list
            - self.campaign_coupon_discount
            - self.manuf_coupon_discount
            - self.manuf_coupon_match_discount
            - self.instore_discount
            - self.amount_paid)
            .abs()
    }
}

/// One transactions_adj row
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedTransaction {
    pub household_id: Option<i32>,
    pub basket_id: Option<i64>,
    pub week_no: Option<i32>,
    pub day: Option<i32>,
    pub transaction_time: Option<i32>,
    pub store_id: Option<i32>,
    pub product_id: Option<i32>,
    pub discounts: Discounts,
    pub units: Option<i32>,
}

impl AdjustedTransaction {
    pub fn columns() -> Vec<Column> {
        use SemanticType::{Float64, Int32, Int64};
        vec![
            Column::new("household_id", Int32),
            Column::new("basket_id", Int64),
            Column::new("week_no", Int32),
            Column::new("day", Int32),
            Column::new("transaction_time", Int32),
            Column::new("store_id", Int32),
            Column::new("product_id", Int32),
            Column::new("amount_list", Float64),
            Column::new("campaign_coupon_discount", Float64),
            Column::new("manuf_coupon_discount", Float64),
            Column::new("manuf_coupon_match_discount", Float64),
            Column::new("total_coupon_discount", Float64),
            Column::new("instore_discount", Float64),
            Column::new("amount_paid", Float64),
            Column::new("units", Int32),
        ]
    }

    pub fn into_row(self) -> Row {
        let d = self.discounts;
        vec![
            Value::from(self.household_id),
            Value::from(self.basket_id),
            Value::from(self.week_no),
            Value::from(self.day),
            Value::from(self.transaction_time),
            Value::from(self.store_id),
            Value::from(self.product_id),
            Value::from(d.amount_list),
            Value::from(d.campaign_coupon_discount),
            Value::from(d.manuf_coupon_discount),
            Value::from(d.manuf_coupon_match_discount),
            Value::from(d.total_coupon_discount),
            Value::from(d.instore_discount),
            Value::from(d.amount_paid),
            Value::from(self.units),
        ]
    }
}

/// Adjust one raw line; keys and quantity pass through untouched
pub fn adjust(raw: &RawTransaction) -> AdjustedTransaction {
    AdjustedTransaction {
        household_id: raw.household_id,
        basket_id: raw.basket_id,
        week_no: raw.week_no,
        day: raw.day,
        transaction_time: raw.transaction_time,
        store_id: raw.store_id,
        product_id: raw.product_id,
        discounts: decompose(Amounts::coalesce(raw)),
        units: raw.quantity,
    }
}
