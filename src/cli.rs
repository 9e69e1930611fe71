//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::Settings;
use crate::period::Frequency;

/// Cohort retention and RFM segmentation of scoop order exports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the JSON export of the scoop app
    #[arg(short, long, default_value = "data/raw/scoop.json")]
    pub input: String,

    /// Load previously exported CSV tables from this directory instead of the JSON export
    #[arg(long, value_name = "DIR")]
    pub from_csv: Option<PathBuf>,

    /// Which analyses to run
    #[arg(short, long, value_enum, default_value = "all")]
    pub analysis: Analysis,

    /// Cohort period: M (month) or Q (quarter)
    #[arg(long, default_value = "Q")]
    pub cohort_freq: String,

    /// RFM period: W (week) or M (month)
    #[arg(long, default_value = "W")]
    pub rfm_freq: String,

    /// TOML settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for CSV snapshots (overrides the settings file)
    #[arg(long)]
    pub processed_dir: Option<PathBuf>,

    /// Directory for figures (overrides the settings file)
    #[arg(long)]
    pub figures_dir: Option<PathBuf>,

    /// Fail when an order request references a product missing from its order
    #[arg(long)]
    pub strict_references: bool,

    /// Do not write CSV snapshots
    #[arg(long)]
    pub no_export: bool,

    /// Do not render figures
    #[arg(long)]
    pub no_plots: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Analyses selectable from the command line
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Analysis {
    /// Only build (and export) the tables
    Tables,
    Cohort,
    Rfm,
    All,
}

impl Analysis {
    pub fn includes_cohort(&self) -> bool {
        matches!(self, Analysis::Cohort | Analysis::All)
    }

    pub fn includes_rfm(&self) -> bool {
        matches!(self, Analysis::Rfm | Analysis::All)
    }
}

impl Args {
    /// Parse the cohort and RFM frequencies, rejecting unsupported ones
    pub fn parse_frequencies(&self) -> crate::Result<(Frequency, Frequency)> {
        let cohort = self
            .cohort_freq
            .parse::<Frequency>()?
            .ensure_one_of(&crate::cohort::COHORT_FREQUENCIES)?;
        let rfm = self
            .rfm_freq
            .parse::<Frequency>()?
            .ensure_one_of(&crate::rfm::RFM_FREQUENCIES)?;
        Ok((cohort, rfm))
    }

    /// Settings from the config file (or defaults) with command-line overrides applied
    pub fn settings(&self) -> crate::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(dir) = &self.processed_dir {
            settings.processed_dir = dir.clone();
        }
        if let Some(dir) = &self.figures_dir {
            settings.figures_dir = dir.clone();
        }
        if self.strict_references {
            settings.strict_references = true;
        }
        Ok(settings)
    }
}
