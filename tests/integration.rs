//! Integration tests for the scoop analytics pipeline

use polars::prelude::*;
use scoop_analytics::{
    analyze_cohorts, analyze_rfm, build_tables, export_tables, load_tables, make_dataframes,
    AnalyticsError, Frequency, Settings, TableName, COMPANY_ACCOUNT_ID,
};
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

/// Two orders delivered in consecutive weeks: members 1 and 2 join the first,
/// only member 1 the second. The company account takes part in both.
fn create_test_export() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
  "101": {{
    "supplier_id": 3,
    "delivery_date": "2021-03-01",
    "created_at": "2021-02-22",
    "updated_at": "2021-02-28",
    "open_order": false,
    "scoop_margin": "3,0",
    "supplier_margin": "10,0",
    "positions_hash": {{
      "members": {{
        "1": {{ "collected?": true, "order_requests": {{ "11": ["2", "2"], "12": ["1", "1"] }} }},
        "2": {{ "collected?": true, "order_requests": {{ "11": ["1,5", "2"] }} }},
        "46": {{ "collected?": false, "order_requests": {{ "12": ["", "1"] }} }}
      }},
      "products": {{
        "11": {{ "tax_rate": "7,0", "net_price": "2,40", "bundle_size": "1",
                 "supplier_code": "501", "amount_ordered": "4", "bundles_ordered": "4" }},
        "12": {{ "tax_rate": "19,0", "net_price": "5,00", "bundle_size": "",
                 "supplier_code": "502", "amount_ordered": "2", "bundles_ordered": "" }}
      }}
    }}
  }},
  "102": {{
    "supplier_id": 3,
    "delivery_date": "2021-03-08",
    "created_at": "2021-03-01",
    "updated_at": "2021-03-07",
    "open_order": false,
    "scoop_margin": "3,0",
    "supplier_margin": "10,0",
    "positions_hash": {{
      "members": {{
        "1": {{ "collected?": "true", "order_requests": {{ "11": ["3", "3"] }} }},
        "46": {{ "collected?": "", "order_requests": {{}} }}
      }},
      "products": {{
        "11": {{ "tax_rate": "7,0", "net_price": "2,40", "bundle_size": "1",
                 "supplier_code": "501", "amount_ordered": "3", "bundles_ordered": "3" }}
      }}
    }}
  }}
}}"#
    )
    .unwrap();
    file
}

fn i64_column(frame: &DataFrame, name: &str) -> Vec<i64> {
    frame.column(name).unwrap().i64().unwrap().into_no_null_iter().collect()
}

#[test]
fn test_build_tables() {
    let export = create_test_export();
    let tables = build_tables(export.path(), &Settings::default()).unwrap();

    assert_eq!(tables.orders.height(), 2);
    assert_eq!(tables.members.height(), 5);
    assert_eq!(tables.products.height(), 3);

    // the company account stays in the raw table
    assert!(i64_column(&tables.members.frame, "member_ID").contains(&COMPANY_ACCOUNT_ID));

    let totals: Vec<f64> = tables.orders.frame.column("total_order_value").unwrap()
        .f64().unwrap().into_no_null_iter().collect();
    assert_eq!(totals, vec![19.6, 7.2]);
    assert_eq!(
        i64_column(&tables.orders.frame, "num_participating_members"),
        vec![3, 2]
    );

    // 2 * 2.40 + 1 * 5.00, 1.5 * 2.40, blank filled amount, 3 * 2.40, nothing
    let values: Vec<f64> = tables.members.frame.column("order_request_value").unwrap()
        .f64().unwrap().into_no_null_iter().collect();
    assert_eq!(values, vec![9.8, 3.6, 0.0, 7.2, 0.0]);
}

#[test]
fn test_end_to_end_rfm() {
    let export = create_test_export();
    let tables = build_tables(export.path(), &Settings::default()).unwrap();

    let rfm = analyze_rfm(&tables.members.frame, Frequency::Week).unwrap();
    let table = &rfm.table.frame;

    assert_eq!(rfm.table.name, TableName::RfmTable);
    assert_eq!(i64_column(table, "member_ID"), vec![1, 2]);
    assert_eq!(i64_column(table, "frequency"), vec![2, 1]);

    let recency = i64_column(table, "recency");
    assert!(recency[1] > recency[0]);

    for score in table.column("rfm_score").unwrap().str().unwrap().into_no_null_iter() {
        assert_eq!(score.len(), 3);
        assert!(score.chars().all(|c| ('1'..='4').contains(&c)));
    }
}

#[test]
fn test_end_to_end_cohort() {
    let export = create_test_export();
    let tables = build_tables(export.path(), &Settings::default()).unwrap();

    let cohorts = analyze_cohorts(&tables.members.frame, Frequency::Month).unwrap();
    assert_eq!(cohorts.cohort_labels(), vec!["2021-03"]);
    // members 1 and 2; the company account is not counted
    assert_eq!(cohorts.cohort_sizes(), vec![2.0]);
    assert_eq!(cohorts.retention[[0, 0]], 1.0);
}

#[test]
fn test_invalid_frequencies_rejected() {
    let export = create_test_export();
    let tables = build_tables(export.path(), &Settings::default()).unwrap();

    for result in [
        analyze_cohorts(&tables.members.frame, Frequency::Week).map(|_| ()),
        analyze_rfm(&tables.members.frame, Frequency::Quarter).map(|_| ()),
    ] {
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalyticsError>(),
            Some(AnalyticsError::Configuration { .. })
        ));
    }
}

#[test]
fn test_csv_round_trip() {
    let export = create_test_export();
    let tables = build_tables(export.path(), &Settings::default()).unwrap();
    let dir = tempdir().unwrap();

    let written = export_tables(&tables.all(), dir.path()).unwrap();
    assert_eq!(written.len(), 3);
    for path in &written {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.contains("_scoop_"));
        assert!(name.ends_with(".csv"));
    }

    let loaded = load_tables(dir.path()).unwrap().into_tables().unwrap();
    assert_eq!(loaded.orders.height(), tables.orders.height());
    assert_eq!(loaded.members.height(), tables.members.height());
    assert_eq!(loaded.products.height(), tables.products.height());

    for column in ["delivery_date", "created_at", "updated_at"] {
        assert_eq!(
            loaded.orders.frame.column(column).unwrap().dtype(),
            &DataType::Date
        );
    }
    assert_eq!(
        loaded.members.frame.column("delivery_date").unwrap().dtype(),
        &DataType::Date
    );

    // analyses run the same on reloaded data
    let built = analyze_rfm(&tables.members.frame, Frequency::Week).unwrap();
    let reloaded = analyze_rfm(&loaded.members.frame, Frequency::Week).unwrap();
    assert_eq!(
        i64_column(&built.table.frame, "frequency"),
        i64_column(&reloaded.table.frame, "frequency")
    );
}

#[test]
fn test_make_dataframes_exports_snapshot() {
    let export = create_test_export();
    let dir = tempdir().unwrap();
    let settings = Settings {
        processed_dir: dir.path().join("processed"),
        ..Settings::default()
    };

    make_dataframes(export.path(), &settings, true).unwrap();

    let files: Vec<String> = std::fs::read_dir(&settings.processed_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(files.len(), 3);
    for table in ["orders", "members", "products"] {
        assert!(files.iter().any(|f| f.ends_with(&format!("_scoop_{table}.csv"))));
    }
}

#[test]
fn test_missing_input_file() {
    let result = build_tables("/no/such/export.json", &Settings::default());
    assert!(result.is_err());
}
