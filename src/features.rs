//! Feature deriver: cross-table columns for orders, members and products

use polars::prelude::*;
use tracing::warn;

use crate::data::{NamedFrame, RawTables, ScoopTables, TableName};
use crate::error::AnalyticsError;

/// Round to cents
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Replace a float column by its values rounded to 2 decimal places
fn round_column(df: &mut DataFrame, name: &str) -> crate::Result<()> {
    let rounded: Vec<Option<f64>> = df
        .column(name)?
        .f64()?
        .into_iter()
        .map(|value| value.map(round2))
        .collect();
    df.with_column(Series::new(name.into(), rounded))?;
    Ok(())
}

/// Add the derived columns to freshly exploded tables.
///
/// - products: `net_total_price`
/// - members: `delivery_date`, `order_request_value`
/// - orders: `total_order_value`, `num_participating_members`
///
/// An order request whose product is missing from its order leaves the
/// member's `order_request_value` null, or fails the run when
/// `strict_references` is set.
pub fn derive_features(raw: RawTables, strict_references: bool) -> crate::Result<ScoopTables> {
    let RawTables {
        orders,
        members,
        products,
        requests,
    } = raw;

    let products = products
        .lazy()
        .with_column((col("net_price") * col("amount_ordered")).alias("net_total_price"))
        .sort_by_exprs(
            [col("order_ID"), col("product_ID")],
            SortMultipleOptions::default(),
        )
        .collect()?;

    let members = members
        .lazy()
        .join(
            orders
                .clone()
                .lazy()
                .select([col("order_ID"), col("delivery_date")]),
            [col("order_ID")],
            [col("order_ID")],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let request_values = order_request_values(&requests, &products, strict_references)?;

    let mut members = members
        .lazy()
        .join(
            request_values.lazy(),
            [col("order_ID"), col("member_ID")],
            [col("order_ID"), col("member_ID")],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            // no request rows at all means nothing was ordered
            when(col("missing_refs").is_null())
                .then(lit(0.0))
                .otherwise(col("order_request_value"))
                .alias("order_request_value"),
        )
        .select([
            col("member_ID"),
            col("order_ID"),
            col("collected"),
            col("order_requests"),
            col("delivery_date"),
            col("order_request_value"),
        ])
        .sort_by_exprs(
            [col("order_ID"), col("member_ID")],
            SortMultipleOptions::default(),
        )
        .collect()?;
    round_column(&mut members, "order_request_value")?;

    let totals = products
        .clone()
        .lazy()
        .group_by([col("order_ID")])
        .agg([col("net_total_price").sum().alias("total_order_value")]);
    let participants = members
        .clone()
        .lazy()
        .group_by([col("order_ID")])
        .agg([col("member_ID")
            .count()
            .cast(DataType::Int64)
            .alias("num_participating_members")]);

    let mut orders = orders
        .lazy()
        .join(
            totals,
            [col("order_ID")],
            [col("order_ID")],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            participants,
            [col("order_ID")],
            [col("order_ID")],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(col("num_participating_members").fill_null(lit(0i64)))
        .sort_by_exprs([col("order_ID")], SortMultipleOptions::default())
        .collect()?;
    round_column(&mut orders, "total_order_value")?;

    Ok(ScoopTables {
        orders: NamedFrame::new(TableName::Orders, orders),
        members: NamedFrame::new(TableName::Members, members),
        products: NamedFrame::new(TableName::Products, products),
    })
}

/// Sum `filled_amount * net_price` per (order, member).
///
/// The result carries `missing_refs`, the number of requested products not
/// found in the order; groups with missing references get a null value.
/// A product that exists but has a blank `net_price` is not a missing
/// reference: its line value is null and the sum skips it, counting as 0.
fn order_request_values(
    requests: &DataFrame,
    products: &DataFrame,
    strict_references: bool,
) -> crate::Result<DataFrame> {
    let joined = requests
        .clone()
        .lazy()
        .join(
            products
                .clone()
                .lazy()
                .select([
                    col("order_ID"),
                    col("product_ID"),
                    col("net_price"),
                    lit(true).alias("product_found"),
                ]),
            [col("order_ID"), col("product_ID")],
            [col("order_ID"), col("product_ID")],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    if let Some((order_id, product_id)) = first_missing_reference(&joined)? {
        if strict_references {
            return Err(AnalyticsError::MissingReference {
                order_id,
                product_id,
            }
            .into());
        }
        let missing = joined.column("product_found")?.null_count();
        warn!(
            missing,
            first_order = order_id,
            first_product = %product_id,
            "order requests reference products missing from their order, values left empty"
        );
    }

    let values = joined
        .lazy()
        // null for blank prices; sum() skips those lines
        .with_column((col("filled_amount") * col("net_price")).alias("line_value"))
        .group_by([col("order_ID"), col("member_ID")])
        .agg([
            col("line_value").sum().alias("order_request_value"),
            col("product_found")
                .null_count()
                .cast(DataType::Int64)
                .alias("missing_refs"),
        ])
        .with_column(
            when(col("missing_refs").gt(lit(0i64)))
                .then(lit(NULL).cast(DataType::Float64))
                .otherwise(col("order_request_value"))
                .alias("order_request_value"),
        )
        .collect()?;

    Ok(values)
}

fn first_missing_reference(joined: &DataFrame) -> crate::Result<Option<(i64, String)>> {
    let found_flags = joined.column("product_found")?;
    if found_flags.null_count() == 0 {
        return Ok(None);
    }

    let order_ids = joined.column("order_ID")?.i64()?;
    let product_ids = joined.column("product_ID")?.str()?;
    let flags = found_flags.bool()?;

    let found = order_ids
        .into_iter()
        .zip(product_ids)
        .zip(flags)
        .find(|(_, flag)| flag.is_none())
        .and_then(|((order_id, product_id), _)| {
            Some((order_id?, product_id.unwrap_or_default().to_string()))
        });
    Ok(found)
}
