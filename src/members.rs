//! Shared preparation of the members table for cohort and RFM analysis

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::debug;

use crate::data::parse_date;
use crate::period::{date_from_epoch_days, Frequency};

/// Member id of the company's own account, which is not a customer
pub const COMPANY_ACCOUNT_ID: i64 = 46;

/// Drop the company account's rows from a members table
pub fn exclude_company_account(members: &DataFrame) -> crate::Result<DataFrame> {
    let frame = members
        .clone()
        .lazy()
        .filter(col("member_ID").neq(lit(COMPANY_ACCOUNT_ID)))
        .collect()?;
    Ok(frame)
}

/// Delivery dates of a members table, accepting date or ISO string columns
pub fn delivery_dates(members: &DataFrame) -> crate::Result<Vec<Option<NaiveDate>>> {
    let column = members.column("delivery_date")?;
    if column.dtype() == &DataType::String {
        let dates = column
            .str()?
            .into_iter()
            .map(|value| value.map(|s| parse_date("delivery_date", s)).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(dates);
    }

    let days = column
        .cast(&DataType::Date)?
        .cast(&DataType::Int32)?;
    let dates = days
        .i32()?
        .into_iter()
        .map(|day| day.map(|d| date_from_epoch_days(d as i64)))
        .collect();
    Ok(dates)
}

/// Customer activity bucketed into periods
#[derive(Debug, Clone)]
pub struct Activity {
    /// `member_ID`, `period` and the requested value columns; one row per
    /// member row with a delivery date
    pub frame: DataFrame,
    /// First and last delivery among the kept rows
    pub delivery_range: Option<(NaiveDate, NaiveDate)>,
}

/// Exclude the company account and tag every member row with the index of
/// the period containing its delivery date.
pub fn activity(
    members: &DataFrame,
    frequency: Frequency,
    value_columns: &[&str],
) -> crate::Result<Activity> {
    let customers = exclude_company_account(members)?;
    let dates = delivery_dates(&customers)?;

    let periods: Vec<Option<i64>> = dates
        .iter()
        .map(|date| date.map(|d| frequency.index_of(d)))
        .collect();
    let delivery_range = dates
        .iter()
        .flatten()
        .fold(None, |range: Option<(NaiveDate, NaiveDate)>, &d| match range {
            None => Some((d, d)),
            Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
        });

    let mut selection = vec!["member_ID"];
    selection.extend_from_slice(value_columns);
    let mut frame = customers.select(selection)?;
    frame.with_column(Series::new("period".into(), periods))?;
    let frame = frame
        .lazy()
        .filter(col("period").is_not_null())
        .collect()?;

    debug!(
        rows = frame.height(),
        frequency = %frequency,
        "prepared member activity"
    );

    Ok(Activity {
        frame,
        delivery_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> DataFrame {
        df!(
            "member_ID" => [1i64, 46, 2, 46],
            "order_ID" => [1i64, 1, 2, 2],
            "delivery_date" => ["2021-03-01", "2021-03-01", "2021-04-12", "2021-04-12"],
            "order_request_value" => [10.0, 99.0, 5.0, 99.0],
        )
        .unwrap()
    }

    #[test]
    fn test_exclude_company_account() {
        let customers = exclude_company_account(&members()).unwrap();
        assert_eq!(customers.height(), 2);
        let ids: Vec<i64> = customers.column("member_ID").unwrap().i64().unwrap()
            .into_no_null_iter().collect();
        assert!(!ids.contains(&COMPANY_ACCOUNT_ID));
    }

    #[test]
    fn test_delivery_dates_from_strings() {
        let dates = delivery_dates(&members()).unwrap();
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2021, 3, 1));
        assert_eq!(dates[2], NaiveDate::from_ymd_opt(2021, 4, 12));
    }

    #[test]
    fn test_activity() {
        let activity = activity(&members(), Frequency::Month, &["order_request_value"]).unwrap();
        assert_eq!(activity.frame.height(), 2);
        assert_eq!(activity.frame.width(), 3);

        let periods: Vec<i64> = activity.frame.column("period").unwrap().i64().unwrap()
            .into_no_null_iter().collect();
        assert_eq!(periods[1] - periods[0], 1);
        assert_eq!(
            activity.delivery_range,
            Some((
                NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2021, 4, 12).unwrap()
            ))
        );
    }
}
