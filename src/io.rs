//! CSV snapshots of the tables and dated output file names

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Local, NaiveDate};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::data::{NamedFrame, ScoopTables, TableName};

/// Today's date as `YYYYMMDD`, the prefix of every exported file
pub fn today_stamp() -> String {
    date_stamp(Local::now().date_naive())
}

pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `<YYYYMMDD>_scoop_<table_name>.csv`
pub fn csv_file_name(stamp: &str, name: TableName) -> String {
    format!("{stamp}_scoop_{name}.csv")
}

/// Write each table as `<YYYYMMDD>_scoop_<name>.csv` into `dir`.
///
/// The directory is created when missing. Existing files of the same day are
/// overwritten.
pub fn export_tables(tables: &[&NamedFrame], dir: impl AsRef<Path>) -> crate::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;

    let stamp = today_stamp();
    let mut written = Vec::with_capacity(tables.len());

    for table in tables {
        let path = dir.join(csv_file_name(&stamp, table.name));
        let mut file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut frame = table.frame.clone();
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut frame)
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!(table = %table.name, rows = frame.height(), path = %path.display(), "exported table");
        written.push(path);
    }

    Ok(written)
}

/// Tables found in a directory of CSV snapshots
#[derive(Debug, Clone, Default)]
pub struct LoadedTables {
    pub orders: Option<NamedFrame>,
    pub members: Option<NamedFrame>,
    pub products: Option<NamedFrame>,
}

impl LoadedTables {
    /// Require all three tables
    pub fn into_tables(self) -> crate::Result<ScoopTables> {
        match (self.orders, self.members, self.products) {
            (Some(orders), Some(members), Some(products)) => Ok(ScoopTables {
                orders,
                members,
                products,
            }),
            (orders, members, products) => {
                let missing: Vec<&str> = [
                    (orders.is_none(), "orders"),
                    (members.is_none(), "members"),
                    (products.is_none(), "products"),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();
                anyhow::bail!("no CSV snapshot found for: {}", missing.join(", "))
            }
        }
    }
}

fn classify(file_name: &str) -> Option<TableName> {
    if file_name.contains("orders") {
        Some(TableName::Orders)
    } else if file_name.contains("members") {
        Some(TableName::Members)
    } else if file_name.contains("products") {
        Some(TableName::Products)
    } else {
        None
    }
}

fn read_csv(path: &Path) -> crate::Result<DataFrame> {
    let frame = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_try_parse_dates(true)
        .finish()?
        .collect()
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(frame)
}

/// Load the orders, members and products snapshots from `dir`.
///
/// Files are matched by the table name appearing in the file name; with
/// several snapshots of a table the lexicographically last (newest) wins.
/// Date columns are parsed back into dates. Derived analysis tables are not
/// reconstructed.
pub fn load_tables(dir: impl AsRef<Path>) -> crate::Result<LoadedTables> {
    let dir = dir.as_ref();
    let mut files: Vec<(String, PathBuf)> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            Some((name, path))
        })
        .collect();
    files.sort();
    debug!(dir = %dir.display(), files = files.len(), "scanning CSV snapshots");

    let mut loaded = LoadedTables::default();
    for (file_name, path) in files {
        let Some(name) = classify(&file_name) else {
            continue;
        };
        let table = Some(NamedFrame::new(name, read_csv(&path)?));
        match name {
            TableName::Orders => loaded.orders = table,
            TableName::Members => {
                loaded.members = table;
                warn!("reminder: data from the company account (#46) is included in {file_name}");
            }
            TableName::Products => loaded.products = table,
            TableName::RfmTable => {}
        }
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn members_frame() -> NamedFrame {
        let frame = df!(
            "member_ID" => [1i64, 2, 46],
            "order_ID" => [1i64, 1, 1],
            "delivery_date" => [18_700i32, 18_700, 18_700],
        )
        .unwrap()
        .lazy()
        .with_column(col("delivery_date").cast(DataType::Date))
        .collect()
        .unwrap();
        NamedFrame::new(TableName::Members, frame)
    }

    #[test]
    fn test_csv_file_name() {
        let date = NaiveDate::from_ymd_opt(2021, 3, 8).unwrap();
        assert_eq!(
            csv_file_name(&date_stamp(date), TableName::RfmTable),
            "20210308_scoop_rfm_table.csv"
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("20210308_scoop_orders.csv"), Some(TableName::Orders));
        assert_eq!(classify("20210308_scoop_members.csv"), Some(TableName::Members));
        assert_eq!(classify("20210308_scoop_products.csv"), Some(TableName::Products));
        assert_eq!(classify("20210308_scoop_rfm_table.csv"), None);
    }

    #[test]
    fn test_export_then_load_members() {
        let dir = tempdir().unwrap();
        let members = members_frame();

        let written = export_tables(&[&members], dir.path()).unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].exists());

        let loaded = load_tables(dir.path()).unwrap();
        assert!(loaded.orders.is_none());
        let reloaded = loaded.members.unwrap();
        assert_eq!(reloaded.name, TableName::Members);
        assert_eq!(reloaded.height(), 3);
        assert_eq!(
            reloaded.frame.column("delivery_date").unwrap().dtype(),
            &DataType::Date
        );
    }

    #[test]
    fn test_into_tables_requires_all() {
        let loaded = LoadedTables {
            members: Some(members_frame()),
            ..Default::default()
        };
        let err = loaded.into_tables().unwrap_err();
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("products"));
    }

    #[test]
    fn test_export_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("data").join("processed");
        export_tables(&[&members_frame()], &nested).unwrap();
        assert!(nested.is_dir());
    }
}
