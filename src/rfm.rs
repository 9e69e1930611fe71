//! Recency-Frequency-Monetary segmentation of the members table

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::info;

use crate::data::{NamedFrame, TableName};
use crate::error::AnalyticsError;
use crate::members::activity;
use crate::period::Frequency;

/// Granularities an RFM analysis can run at
pub const RFM_FREQUENCIES: [Frequency; 2] = [Frequency::Week, Frequency::Month];

/// Recency boundaries as multiples of one year
pub const RECENCY_YEAR_MULTIPLES: [f64; 5] = [0.0, 0.25, 0.5, 1.0, f64::INFINITY];

/// Raw boundaries of the R, F and M bins, lowest first
#[derive(Debug, Clone, PartialEq)]
pub struct BinInfo {
    pub recency: [f64; 5],
    pub frequency: [f64; 5],
    pub monetary: [f64; 5],
}

/// Member count and mean monetary value of one (f_score, r_score) segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub members: usize,
    pub mean_monetary: f64,
}

/// Scored RFM table plus the boundaries used to score it
#[derive(Debug, Clone)]
pub struct RfmAnalysis {
    pub frequency: Frequency,
    /// One row per member: `member_ID`, `recency`, `frequency`,
    /// `monetary_value`, `r_score`, `f_score`, `m_score`, `rfm_score`
    pub table: NamedFrame,
    pub bins: BinInfo,
    pub delivery_range: Option<(NaiveDate, NaiveDate)>,
}

impl RfmAnalysis {
    pub fn len(&self) -> usize {
        self.table.height()
    }

    pub fn is_empty(&self) -> bool {
        self.table.height() == 0
    }

    /// Segments indexed `[f_score - 1][r_score - 1]`; empty segments are `None`
    pub fn segments(&self) -> crate::Result<[[Option<Segment>; 4]; 4]> {
        let frame = &self.table.frame;
        let f_scores = frame.column("f_score")?.i32()?;
        let r_scores = frame.column("r_score")?.i32()?;
        let monetary = frame.column("monetary_value")?.f64()?;

        let mut sums = [[(0usize, 0.0f64); 4]; 4];
        for ((f, r), m) in f_scores.into_iter().zip(r_scores).zip(monetary) {
            if let (Some(f), Some(r)) = (f, r) {
                let cell = &mut sums[(f - 1) as usize][(r - 1) as usize];
                cell.0 += 1;
                cell.1 += m.unwrap_or(0.0);
            }
        }

        Ok(sums.map(|row| {
            row.map(|(count, total)| {
                (count > 0).then(|| Segment {
                    members: count,
                    mean_monetary: total / count as f64,
                })
            })
        }))
    }
}

/// Recency bin boundaries for a granularity: 0, a quarter year, half a year,
/// a year and unbounded, counted in periods
pub fn recency_edges(frequency: Frequency) -> [f64; 5] {
    RECENCY_YEAR_MULTIPLES.map(|m| m * frequency.periods_per_year())
}

/// Score recency against right-closed bins, lowest boundary included.
/// The most recent bin scores 4.
pub fn recency_score(recency: f64, edges: &[f64; 5]) -> i32 {
    if recency <= edges[1] {
        4
    } else if recency <= edges[2] {
        3
    } else if recency <= edges[3] {
        2
    } else {
        1
    }
}

/// Score a value 1..=4 by the quartile interval of `edges` it falls in.
///
/// Intervals are right-closed with the lowest edge included. When ties make
/// neighbouring edges equal, the bins between them stay empty, so equal
/// values always share a score and fewer than four scores may occur.
pub fn quartile_score(value: f64, edges: &[f64; 5]) -> i32 {
    edges[1..4]
        .iter()
        .position(|&edge| value <= edge)
        .map_or(4, |bin| bin as i32 + 1)
}

/// Quartile edges of `values` and the score of every value against them
pub fn quartile_scores(values: &[f64]) -> ([f64; 5], Vec<i32>) {
    let edges = quantile_edges(values);
    let scores = values.iter().map(|&v| quartile_score(v, &edges)).collect();
    (edges, scores)
}

/// Minimum, quartiles and maximum with linear interpolation
pub fn quantile_edges(values: &[f64]) -> [f64; 5] {
    if values.is_empty() {
        return [f64::NAN; 5];
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    [0.0, 0.25, 0.5, 0.75, 1.0].map(|q| {
        let position = q * (sorted.len() - 1) as f64;
        let lo = position.floor() as usize;
        let hi = position.ceil() as usize;
        sorted[lo] + (sorted[hi] - sorted[lo]) * (position - lo as f64)
    })
}

/// Aggregate member activity into `member_ID`, `recency`, `frequency`,
/// `monetary_value`.
///
/// Orders of the same member in the same period are summed first; monetary
/// value is the mean of those per-period sums. Recency counts the periods
/// between the member's last active period and the period of the latest
/// delivery overall.
pub fn make_table(
    members: &DataFrame,
    frequency: Frequency,
) -> crate::Result<(DataFrame, Option<(NaiveDate, NaiveDate)>)> {
    let activity = activity(members, frequency, &["order_request_value"])?;
    let Some((_, last_delivery)) = activity.delivery_range else {
        return Err(AnalyticsError::DegenerateBinning {
            column: "rfm_table".to_string(),
            reason: "no customer deliveries to analyse".to_string(),
        }
        .into());
    };
    let period_end = frequency.index_of(last_delivery);

    let table = activity
        .frame
        .lazy()
        .group_by([col("period"), col("member_ID")])
        .agg([col("order_request_value").cast(DataType::Float64).sum()])
        .group_by([col("member_ID")])
        .agg([
            col("period").max().alias("last_period"),
            col("period").count().cast(DataType::Int64).alias("frequency"),
            col("order_request_value").mean().alias("monetary_value"),
        ])
        .with_column((lit(period_end) - col("last_period")).alias("recency"))
        .select([
            col("member_ID"),
            col("recency"),
            col("frequency"),
            col("monetary_value"),
        ])
        .sort_by_exprs([col("member_ID")], SortMultipleOptions::default())
        .collect()?;

    Ok((table, activity.delivery_range))
}

/// Add `r_score`, `f_score`, `m_score` and the combined `rfm_score`
pub fn add_score(mut table: DataFrame, frequency: Frequency) -> crate::Result<(DataFrame, BinInfo)> {
    if table.height() == 0 {
        return Err(AnalyticsError::DegenerateBinning {
            column: "frequency".to_string(),
            reason: "the table has no members".to_string(),
        }
        .into());
    }

    let recency: Vec<f64> = table
        .column("recency")?
        .i64()?
        .into_no_null_iter()
        .map(|r| r as f64)
        .collect();
    let frequencies: Vec<f64> = table
        .column("frequency")?
        .i64()?
        .into_no_null_iter()
        .map(|f| f as f64)
        .collect();
    let monetary: Vec<f64> = table
        .column("monetary_value")?
        .f64()?
        .into_iter()
        .map(|m| m.unwrap_or(0.0))
        .collect();

    let recency_bins = recency_edges(frequency);
    let r_scores: Vec<i32> = recency
        .iter()
        .map(|&r| recency_score(r, &recency_bins))
        .collect();
    let (frequency_bins, f_scores) = quartile_scores(&frequencies);
    let (monetary_bins, m_scores) = quartile_scores(&monetary);

    let bins = BinInfo {
        recency: recency_bins,
        frequency: frequency_bins,
        monetary: monetary_bins,
    };
    let rfm_scores: Vec<String> = r_scores
        .iter()
        .zip(&f_scores)
        .zip(&m_scores)
        .map(|((r, f), m)| format!("{r}{f}{m}"))
        .collect();

    table.with_column(Series::new("r_score".into(), r_scores))?;
    table.with_column(Series::new("f_score".into(), f_scores))?;
    table.with_column(Series::new("m_score".into(), m_scores))?;
    table.with_column(Series::new("rfm_score".into(), rfm_scores))?;

    Ok((table, bins))
}

/// Build and score the RFM table of a members table.
///
/// Only weekly and monthly periods are supported; the company account is
/// excluded before aggregation.
pub fn analyze_rfm(members: &DataFrame, frequency: Frequency) -> crate::Result<RfmAnalysis> {
    let frequency = frequency.ensure_one_of(&RFM_FREQUENCIES)?;

    let (table, delivery_range) = make_table(members, frequency)?;
    let (table, bins) = add_score(table, frequency)?;

    info!(
        members = table.height(),
        frequency = %frequency,
        "rfm table built"
    );

    Ok(RfmAnalysis {
        frequency,
        table: NamedFrame::new(TableName::RfmTable, table),
        bins,
        delivery_range,
    })
}
