//! Dataframe builder: flattens the nested scoop JSON export into relational tables

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use polars::prelude::*;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::AnalyticsError;
use crate::features::derive_features;
use crate::period::days_since_epoch;

static MISSING: Value = Value::Null;

/// Format of every date field in the export
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Product fields stored as decimal-comma strings
pub const PRODUCT_FLOAT_COLUMNS: [&str; 6] = [
    "tax_rate",
    "net_price",
    "bundle_size",
    "supplier_code",
    "amount_ordered",
    "bundles_ordered",
];

/// Name tag of a table, used for export file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableName {
    Orders,
    Members,
    Products,
    RfmTable,
}

impl TableName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Orders => "orders",
            TableName::Members => "members",
            TableName::Products => "products",
            TableName::RfmTable => "rfm_table",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dataframe together with its name tag
#[derive(Debug, Clone)]
pub struct NamedFrame {
    pub name: TableName,
    pub frame: DataFrame,
}

impl NamedFrame {
    pub fn new(name: TableName, frame: DataFrame) -> Self {
        Self { name, frame }
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }
}

/// The three normalized tables of one pipeline run
#[derive(Debug, Clone)]
pub struct ScoopTables {
    pub orders: NamedFrame,
    pub members: NamedFrame,
    pub products: NamedFrame,
}

impl ScoopTables {
    pub fn all(&self) -> [&NamedFrame; 3] {
        [&self.orders, &self.members, &self.products]
    }
}

/// Tables as they come out of the explode step, before derived features.
///
/// `requests` holds one row per (order, member, requested product) and is
/// consumed by the feature deriver.
#[derive(Debug, Clone)]
pub struct RawTables {
    pub orders: DataFrame,
    pub members: DataFrame,
    pub products: DataFrame,
    pub requests: DataFrame,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    #[serde(default, alias = "id", alias = "order_ID")]
    order_id: Option<i64>,
    #[serde(default, alias = "supplier_ID")]
    supplier_id: Option<i64>,
    #[serde(default)]
    positions_hash: Option<RawPositions>,
    #[serde(default)]
    members: Option<BTreeMap<String, RawMember>>,
    #[serde(default)]
    products: Option<BTreeMap<String, RawProduct>>,
    delivery_date: String,
    created_at: String,
    updated_at: String,
    #[serde(default)]
    open_order: Option<bool>,
    #[serde(default)]
    scoop_margin: Value,
    #[serde(default)]
    supplier_margin: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawPositions {
    #[serde(default)]
    members: BTreeMap<String, RawMember>,
    #[serde(default)]
    products: BTreeMap<String, RawProduct>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    #[serde(default, rename = "collected?", alias = "collected")]
    collected: Value,
    #[serde(default)]
    order_requests: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    #[serde(default)]
    tax_rate: Value,
    #[serde(default)]
    net_price: Value,
    #[serde(default)]
    bundle_size: Value,
    #[serde(default)]
    supplier_code: Value,
    #[serde(default)]
    amount_ordered: Value,
    #[serde(default)]
    bundles_ordered: Value,
}

impl RawOrder {
    /// Members and products, wherever the export put them
    fn take_positions(
        &mut self,
    ) -> (BTreeMap<String, RawMember>, BTreeMap<String, RawProduct>) {
        let nested = self.positions_hash.take().unwrap_or_default();
        let members = self.members.take().unwrap_or(nested.members);
        let products = self.products.take().unwrap_or(nested.products);
        (members, products)
    }
}

/// Parse a decimal-comma number: `","` becomes `"."`, blank means missing
pub fn parse_decimal(field: &str, value: &Value) -> Result<Option<f64>, AnalyticsError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .replace(',', ".")
                .parse::<f64>()
                .map(Some)
                .map_err(|e| AnalyticsError::parse(field, s, e))
        }
        other => Err(AnalyticsError::parse(field, other, "expected a number")),
    }
}

/// Cast the member `collected?` flag to a boolean
pub fn parse_flag(field: &str, value: &Value) -> Result<bool, AnalyticsError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "" | "false" | "0" | "no" => Ok(false),
            _ => Err(AnalyticsError::parse(field, s, "expected a boolean")),
        },
        other => Err(AnalyticsError::parse(field, other, "expected a boolean")),
    }
}

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, AnalyticsError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| AnalyticsError::parse(field, value, e))
}

/// Split one order request into (filled_amount, ordered_amount).
///
/// The export stores either a `[filled, ordered]` pair or an object with
/// `filled_amount`/`ordered_amount` keys.
fn parse_request(product_id: &str, value: &Value) -> Result<(f64, Option<f64>), AnalyticsError> {
    let (filled, ordered) = match value {
        Value::Array(items) if !items.is_empty() => {
            (&items[0], items.get(1).unwrap_or(&MISSING))
        }
        Value::Object(fields) => (
            fields
                .get("filled_amount")
                .or_else(|| fields.get("filled"))
                .unwrap_or(&MISSING),
            fields
                .get("ordered_amount")
                .or_else(|| fields.get("ordered"))
                .unwrap_or(&MISSING),
        ),
        other => {
            return Err(AnalyticsError::parse(
                "order_requests",
                format!("{product_id}: {other}"),
                "expected [filled, ordered] or an object",
            ))
        }
    };

    // a blank filled amount means nothing was delivered
    let filled = parse_decimal("filled_amount", filled)?.unwrap_or(0.0);
    let ordered = parse_decimal("ordered_amount", ordered)?;
    Ok((filled, ordered))
}

fn parse_records(document: Value) -> Result<Vec<(i64, RawOrder)>, AnalyticsError> {
    let mut records = match document {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, record)| {
                let order_id = key
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| AnalyticsError::parse("order_ID", &key, e))?;
                let order: RawOrder = serde_json::from_value(record)
                    .map_err(|e| AnalyticsError::parse("order record", &key, e))?;
                Ok((order_id, order))
            })
            .collect::<Result<Vec<_>, AnalyticsError>>()?,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                let order: RawOrder = serde_json::from_value(record)
                    .map_err(|e| AnalyticsError::parse("order record", format!("#{i}"), e))?;
                let order_id = order.order_id.ok_or_else(|| {
                    AnalyticsError::parse("order_ID", format!("#{i}"), "record has no order id")
                })?;
                Ok((order_id, order))
            })
            .collect::<Result<Vec<_>, AnalyticsError>>()?,
        other => {
            return Err(AnalyticsError::parse(
                "json document",
                json_kind(&other),
                "expected an object keyed by order id or an array of orders",
            ))
        }
    };

    records.sort_by_key(|(order_id, _)| *order_id);
    Ok(records)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Explode a parsed export into flat order, member, product and request tables.
///
/// Every nested `members`/`products` entry becomes one row carrying the
/// parent order's id as a foreign column.
pub fn explode_export(document: Value) -> crate::Result<RawTables> {
    let records = parse_records(document)?;
    let today = Local::now().date_naive();

    let mut order_ids = Vec::with_capacity(records.len());
    let mut supplier_ids = Vec::with_capacity(records.len());
    let mut delivery_dates = Vec::with_capacity(records.len());
    let mut created_at = Vec::with_capacity(records.len());
    let mut updated_at = Vec::with_capacity(records.len());
    let mut open_orders = Vec::with_capacity(records.len());
    let mut scoop_margins = Vec::with_capacity(records.len());
    let mut supplier_margins = Vec::with_capacity(records.len());

    let mut member_ids: Vec<i64> = Vec::new();
    let mut member_order_ids: Vec<i64> = Vec::new();
    let mut collected: Vec<bool> = Vec::new();
    let mut order_requests: Vec<String> = Vec::new();

    let mut request_order_ids: Vec<i64> = Vec::new();
    let mut request_member_ids: Vec<i64> = Vec::new();
    let mut request_product_ids: Vec<String> = Vec::new();
    let mut filled_amounts: Vec<f64> = Vec::new();
    let mut ordered_amounts: Vec<Option<f64>> = Vec::new();

    let mut product_order_ids: Vec<i64> = Vec::new();
    let mut product_ids: Vec<String> = Vec::new();
    let mut product_values: [Vec<Option<f64>>; 6] = Default::default();

    for (order_id, mut order) in records {
        let delivery = parse_date("delivery_date", &order.delivery_date)?;
        if delivery > today {
            warn!(order_id, %delivery, "order is scheduled for a future delivery");
        }

        order_ids.push(order_id);
        supplier_ids.push(order.supplier_id);
        delivery_dates.push(days_since_epoch(delivery) as i32);
        created_at.push(days_since_epoch(parse_date("created_at", &order.created_at)?) as i32);
        updated_at.push(days_since_epoch(parse_date("updated_at", &order.updated_at)?) as i32);
        open_orders.push(order.open_order);
        scoop_margins.push(parse_decimal("scoop_margin", &order.scoop_margin)?);
        supplier_margins.push(parse_decimal("supplier_margin", &order.supplier_margin)?);

        let (members, products) = order.take_positions();

        let mut members = members
            .into_iter()
            .map(|(key, member)| {
                key.trim()
                    .parse::<i64>()
                    .map(|id| (id, member))
                    .map_err(|e| AnalyticsError::parse("member_ID", &key, e))
            })
            .collect::<Result<Vec<_>, AnalyticsError>>()?;
        members.sort_by_key(|(member_id, _)| *member_id);

        for (member_id, member) in members {
            let mut normalized = Map::new();
            for (product_id, request) in &member.order_requests {
                let (filled, ordered) = parse_request(product_id, request)?;
                request_order_ids.push(order_id);
                request_member_ids.push(member_id);
                request_product_ids.push(product_id.clone());
                filled_amounts.push(filled);
                ordered_amounts.push(ordered);
                normalized.insert(
                    product_id.clone(),
                    json!({ "filled_amount": filled, "ordered_amount": ordered }),
                );
            }

            member_ids.push(member_id);
            member_order_ids.push(order_id);
            collected.push(parse_flag("collected?", &member.collected)?);
            order_requests.push(Value::Object(normalized).to_string());
        }

        for (product_id, product) in products {
            product_order_ids.push(order_id);
            product_ids.push(product_id);
            let fields = [
                &product.tax_rate,
                &product.net_price,
                &product.bundle_size,
                &product.supplier_code,
                &product.amount_ordered,
                &product.bundles_ordered,
            ];
            for ((values, name), raw) in product_values
                .iter_mut()
                .zip(PRODUCT_FLOAT_COLUMNS)
                .zip(fields)
            {
                values.push(parse_decimal(name, raw)?);
            }
        }
    }

    let orders = df!(
        "order_ID" => order_ids,
        "supplier_ID" => supplier_ids,
        "delivery_date" => delivery_dates,
        "created_at" => created_at,
        "updated_at" => updated_at,
        "open_order" => open_orders,
        "scoop_margin" => scoop_margins,
        "supplier_margin" => supplier_margins,
    )?
    .lazy()
    .with_columns([
        col("delivery_date").cast(DataType::Date),
        col("created_at").cast(DataType::Date),
        col("updated_at").cast(DataType::Date),
    ])
    .collect()?;

    let members = df!(
        "member_ID" => member_ids,
        "order_ID" => member_order_ids,
        "collected" => collected,
        "order_requests" => order_requests,
    )?;

    let requests = df!(
        "order_ID" => request_order_ids,
        "member_ID" => request_member_ids,
        "product_ID" => request_product_ids,
        "filled_amount" => filled_amounts,
        "ordered_amount" => ordered_amounts,
    )?;

    let [tax_rate, net_price, bundle_size, supplier_code, amount_ordered, bundles_ordered] =
        product_values;
    let products = df!(
        "order_ID" => product_order_ids,
        "product_ID" => product_ids,
        "tax_rate" => tax_rate,
        "net_price" => net_price,
        "bundle_size" => bundle_size,
        "supplier_code" => supplier_code,
        "amount_ordered" => amount_ordered,
        "bundles_ordered" => bundles_ordered,
    )?;

    debug!(
        orders = orders.height(),
        members = members.height(),
        products = products.height(),
        requests = requests.height(),
        "exploded export"
    );

    Ok(RawTables {
        orders,
        members,
        products,
        requests,
    })
}

/// Read a JSON export and build the three normalized tables with derived features
pub fn build_tables(path: impl AsRef<Path>, settings: &Settings) -> crate::Result<ScoopTables> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open export {}", path.display()))?;
    let document: Value = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AnalyticsError::parse("json document", path.display(), e))?;

    let raw = explode_export(document)?;
    info!("initialize dataframes done");

    let tables = derive_features(raw, settings.strict_references)?;
    info!("create all features done");

    Ok(tables)
}

/// Build all tables from a JSON export and optionally snapshot them as CSV
pub fn make_dataframes(
    path: impl AsRef<Path>,
    settings: &Settings,
    export_csv: bool,
) -> crate::Result<ScoopTables> {
    let tables = build_tables(path, settings)?;

    if export_csv {
        crate::io::export_tables(&tables.all(), &settings.processed_dir)?;
        info!("export dataframes done");
    }

    Ok(tables)
}
