//! Scoop analytics: cohort retention and RFM segmentation of co-op orders
//!
//! The pipeline flattens the app's nested JSON export into orders, members
//! and products tables, derives order values, and analyses member behaviour
//! with a cohort retention matrix and an RFM score table.

pub mod cli;
pub mod cohort;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod io;
pub mod members;
pub mod period;
pub mod rfm;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use cohort::{analyze_cohorts, CohortAnalysis};
pub use config::Settings;
pub use data::{build_tables, make_dataframes, NamedFrame, ScoopTables, TableName};
pub use error::AnalyticsError;
pub use io::{export_tables, load_tables};
pub use members::{exclude_company_account, COMPANY_ACCOUNT_ID};
pub use period::Frequency;
pub use rfm::{analyze_rfm, BinInfo, RfmAnalysis};
pub use viz::{plot_retention_matrix, plot_rfm_heatmap};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
