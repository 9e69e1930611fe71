//! Cohort retention analysis of the members table

use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;
use tracing::info;

use crate::members::activity;
use crate::period::Frequency;

/// Granularities a cohort analysis can run at
pub const COHORT_FREQUENCIES: [Frequency; 2] = [Frequency::Month, Frequency::Quarter];

/// Cohort pivot and retention matrix.
///
/// Rows are cohorts (period of a member's first delivery) in ascending order,
/// columns are period offsets `0..=max`. Cells without observations are NaN.
#[derive(Debug, Clone)]
pub struct CohortAnalysis {
    pub frequency: Frequency,
    /// Period index of each cohort row
    pub cohorts: Vec<i64>,
    /// Distinct active members per cohort and offset
    pub pivot: Array2<f64>,
    /// `pivot` divided by the cohort's initial size
    pub retention: Array2<f64>,
    /// First and last delivery date seen
    pub delivery_range: Option<(NaiveDate, NaiveDate)>,
}

impl CohortAnalysis {
    pub fn cohort_labels(&self) -> Vec<String> {
        self.cohorts
            .iter()
            .map(|&cohort| self.frequency.label(cohort))
            .collect()
    }

    /// Initial member count of each cohort (offset 0)
    pub fn cohort_sizes(&self) -> Vec<f64> {
        if self.pivot.ncols() == 0 {
            return Vec::new();
        }
        self.pivot.column(0).to_vec()
    }

    /// Number of distinct members over all cohorts
    pub fn total_members(&self) -> f64 {
        self.cohort_sizes().iter().sum()
    }

    pub fn pivot_frame(&self) -> crate::Result<DataFrame> {
        self.matrix_frame(&self.pivot)
    }

    pub fn retention_frame(&self) -> crate::Result<DataFrame> {
        self.matrix_frame(&self.retention)
    }

    /// `cohort` label column followed by one column per period offset
    fn matrix_frame(&self, matrix: &Array2<f64>) -> crate::Result<DataFrame> {
        let mut frame = df!("cohort" => self.cohort_labels())?;
        for (offset, values) in matrix.columns().into_iter().enumerate() {
            let cells: Vec<Option<f64>> = values
                .iter()
                .map(|&v| if v.is_nan() { None } else { Some(v) })
                .collect();
            frame.with_column(Series::new(offset.to_string().into(), cells))?;
        }
        Ok(frame)
    }
}

/// Build the cohort pivot and retention matrix of a members table.
///
/// The company account is excluded first. A member's cohort is the period of
/// their first delivery; each cell counts the distinct members of a cohort
/// active `period_number` periods later.
pub fn analyze_cohorts(members: &DataFrame, frequency: Frequency) -> crate::Result<CohortAnalysis> {
    let frequency = frequency.ensure_one_of(&COHORT_FREQUENCIES)?;
    let activity = activity(members, frequency, &[])?;

    let first_seen = activity
        .frame
        .clone()
        .lazy()
        .group_by([col("member_ID")])
        .agg([col("period").min().alias("cohort")]);

    let counts = activity
        .frame
        .lazy()
        .with_column(col("period").alias("delivery_freq"))
        .join(
            first_seen,
            [col("member_ID")],
            [col("member_ID")],
            JoinArgs::new(JoinType::Inner),
        )
        .group_by([col("cohort"), col("delivery_freq")])
        .agg([col("member_ID")
            .n_unique()
            .cast(DataType::Int64)
            .alias("n_members")])
        .with_column((col("delivery_freq") - col("cohort")).alias("period_number"))
        .sort_by_exprs(
            [col("cohort"), col("period_number")],
            SortMultipleOptions::default(),
        )
        .collect()?;

    let cohort_column: Vec<i64> = counts.column("cohort")?.i64()?.into_no_null_iter().collect();
    let offsets: Vec<i64> = counts
        .column("period_number")?
        .i64()?
        .into_no_null_iter()
        .collect();
    let n_members: Vec<i64> = counts.column("n_members")?.i64()?.into_no_null_iter().collect();

    let mut cohorts = cohort_column.clone();
    cohorts.dedup();
    let width = offsets.iter().max().map_or(0, |&max| max as usize + 1);

    let mut pivot = Array2::from_elem((cohorts.len(), width), f64::NAN);
    for ((cohort, offset), count) in cohort_column.iter().zip(&offsets).zip(&n_members) {
        if let Ok(row) = cohorts.binary_search(cohort) {
            pivot[[row, *offset as usize]] = *count as f64;
        }
    }

    let mut retention = pivot.clone();
    for mut row in retention.rows_mut() {
        let size = row[0];
        row.mapv_inplace(|v| v / size);
    }

    info!(
        cohorts = cohorts.len(),
        periods = width,
        frequency = %frequency,
        "retention matrix built"
    );

    Ok(CohortAnalysis {
        frequency,
        cohorts,
        pivot,
        retention,
        delivery_range: activity.delivery_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;
    use crate::members::COMPANY_ACCOUNT_ID;

    fn members(rows: &[(i64, &str)]) -> DataFrame {
        let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
        let dates: Vec<&str> = rows.iter().map(|(_, d)| *d).collect();
        df!("member_ID" => ids, "delivery_date" => dates).unwrap()
    }

    fn sample() -> DataFrame {
        members(&[
            // January cohort: 1, 2, 3
            (1, "2021-01-05"),
            (2, "2021-01-12"),
            (3, "2021-01-20"),
            (1, "2021-02-02"),
            (2, "2021-02-09"),
            (1, "2021-02-16"),
            (3, "2021-04-06"),
            // February cohort: 4, 5
            (4, "2021-02-09"),
            (5, "2021-02-23"),
            (4, "2021-03-02"),
            // company account everywhere
            (COMPANY_ACCOUNT_ID, "2020-12-01"),
            (COMPANY_ACCOUNT_ID, "2021-01-05"),
            (COMPANY_ACCOUNT_ID, "2021-02-02"),
        ])
    }

    #[test]
    fn test_monthly_pivot() {
        let analysis = analyze_cohorts(&sample(), Frequency::Month).unwrap();

        assert_eq!(analysis.cohort_labels(), vec!["2021-01", "2021-02"]);
        assert_eq!(analysis.pivot.shape(), &[2, 4]);
        assert_eq!(analysis.cohort_sizes(), vec![3.0, 2.0]);
        assert_eq!(analysis.total_members(), 5.0);

        // January cohort: 3 in Jan, 2 in Feb, none in Mar, 1 in Apr
        assert_eq!(analysis.pivot[[0, 1]], 2.0);
        assert!(analysis.pivot[[0, 2]].is_nan());
        assert_eq!(analysis.pivot[[0, 3]], 1.0);
        // February cohort: 2 in Feb, 1 in Mar, nothing observed later
        assert_eq!(analysis.pivot[[1, 1]], 1.0);
        assert!(analysis.pivot[[1, 2]].is_nan());
    }

    #[test]
    fn test_retention_properties() {
        let analysis = analyze_cohorts(&sample(), Frequency::Month).unwrap();

        for row in analysis.retention.rows() {
            assert_eq!(row[0], 1.0);
            for &cell in row.iter() {
                assert!(cell.is_nan() || (0.0..=1.0).contains(&cell));
            }
        }
        assert!((analysis.retention[[0, 1]] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(analysis.retention[[1, 1]], 0.5);
    }

    #[test]
    fn test_company_account_excluded() {
        let analysis = analyze_cohorts(&sample(), Frequency::Month).unwrap();
        // the company account would otherwise open a December cohort
        assert!(!analysis.cohort_labels().contains(&"2020-12".to_string()));
        assert_eq!(analysis.total_members(), 5.0);
    }

    #[test]
    fn test_quarterly_cohorts() {
        let analysis = analyze_cohorts(&sample(), Frequency::Quarter).unwrap();
        assert_eq!(analysis.cohort_labels(), vec!["2021Q1"]);
        assert_eq!(analysis.cohort_sizes(), vec![5.0]);
        // only member 3 is seen again in Q2
        assert_eq!(analysis.pivot[[0, 1]], 1.0);
        assert_eq!(analysis.retention[[0, 1]], 0.2);
    }

    #[test]
    fn test_invalid_frequency() {
        let err = analyze_cohorts(&sample(), Frequency::Week).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalyticsError>(),
            Some(AnalyticsError::Configuration { .. })
        ));
    }

    #[test]
    fn test_frames() {
        let analysis = analyze_cohorts(&sample(), Frequency::Month).unwrap();
        let retention = analysis.retention_frame().unwrap();
        assert_eq!(retention.height(), 2);
        assert_eq!(retention.width(), 5);
        assert_eq!(retention.column("2").unwrap().null_count(), 2);

        let pivot = analysis.pivot_frame().unwrap();
        let sizes: Vec<Option<f64>> = pivot.column("0").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(sizes, vec![Some(3.0), Some(2.0)]);
    }

    #[test]
    fn test_empty_members() {
        let analysis = analyze_cohorts(&members(&[(COMPANY_ACCOUNT_ID, "2021-01-05")]), Frequency::Month)
            .unwrap();
        assert!(analysis.cohorts.is_empty());
        assert_eq!(analysis.total_members(), 0.0);
    }
}
