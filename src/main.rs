//! Scoop analytics CLI: builds the order tables and runs the cohort and RFM
//! analyses, exporting CSV snapshots and figures.

use anyhow::Result;
use clap::Parser;
use scoop_analytics::{
    analyze_cohorts, analyze_rfm, build_tables, export_tables, load_tables, viz, Args,
    Frequency, ScoopTables, Settings,
};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.verbose {
        println!("Scoop Analytics - Cohort Retention & RFM Segmentation");
        println!("=====================================================\n");
    }

    let settings = args.settings()?;
    let (cohort_freq, rfm_freq) = args.parse_frequencies()?;

    let start_time = Instant::now();

    let tables = load_input(&args, &settings)?;

    if args.analysis.includes_cohort() {
        run_cohort_analysis(&args, &settings, &tables, cohort_freq)?;
    }
    if args.analysis.includes_rfm() {
        run_rfm_analysis(&args, &settings, &tables, rfm_freq)?;
    }

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Build the tables from the JSON export, or load an earlier CSV snapshot
fn load_input(args: &Args, settings: &Settings) -> Result<ScoopTables> {
    println!("=== Loading Data ===");
    let data_start = Instant::now();

    let tables = match &args.from_csv {
        Some(dir) => {
            if args.verbose {
                println!("  CSV directory: {}", dir.display());
            }
            load_tables(dir)?.into_tables()?
        }
        None => {
            if args.verbose {
                println!("  Input file: {}", args.input);
            }
            let tables = build_tables(&args.input, settings)?;
            if !args.no_export {
                let written = export_tables(&tables.all(), &settings.processed_dir)?;
                for path in written {
                    println!("  exported {}", path.display());
                }
            }
            tables
        }
    };

    println!(
        "✓ Tables ready: {} orders, {} member rows, {} products",
        tables.orders.height(),
        tables.members.height(),
        tables.products.height()
    );
    if args.verbose {
        println!("  Processing time: {:.2}s", data_start.elapsed().as_secs_f64());
    }

    Ok(tables)
}

fn run_cohort_analysis(
    args: &Args,
    settings: &Settings,
    tables: &ScoopTables,
    frequency: Frequency,
) -> Result<()> {
    println!("\n=== Cohort Analysis ({}) ===", frequency.unit_name());

    let cohorts = analyze_cohorts(&tables.members.frame, frequency)?;
    println!(
        "✓ {} cohorts, {} members, up to {} periods",
        cohorts.cohorts.len(),
        cohorts.total_members(),
        cohorts.retention.ncols()
    );
    if args.verbose {
        println!("{}", cohorts.retention_frame()?);
    }

    if !args.no_plots && !cohorts.cohorts.is_empty() {
        let path = viz::plot_path(&settings.figures_dir, Some(frequency), "retention_matrix")?;
        viz::plot_retention_matrix(&cohorts, &path)?;
        println!("  Retention matrix saved to: {}", path.display());
    }

    Ok(())
}

fn run_rfm_analysis(
    args: &Args,
    settings: &Settings,
    tables: &ScoopTables,
    frequency: Frequency,
) -> Result<()> {
    println!("\n=== RFM Analysis ({}) ===", frequency.unit_name());

    let rfm = analyze_rfm(&tables.members.frame, frequency)?;
    println!("✓ RFM table: {} members", rfm.len());

    println!("\nSegments (frequency score x recency score):");
    println!("  F \\ R |    4 |    3 |    2 |    1");
    println!("  ------|------|------|------|-----");
    let segments = rfm.segments()?;
    for f_score in (1..=4).rev() {
        let counts: Vec<String> = (1..=4)
            .rev()
            .map(|r_score: usize| {
                let members = segments[f_score - 1][r_score - 1].map_or(0, |s| s.members);
                format!("{members:4}")
            })
            .collect();
        println!("  {:5} | {}", f_score, counts.join(" | "));
    }

    if args.verbose {
        println!("\n{}", rfm.table.frame);
    }

    if !args.no_export {
        for path in export_tables(&[&rfm.table], &settings.processed_dir)? {
            println!("  RFM table saved to: {}", path.display());
        }
    }

    if !args.no_plots {
        let path = viz::plot_path(&settings.figures_dir, Some(frequency), "rfm_heatmap")?;
        viz::plot_rfm_heatmap(&rfm, &path)?;
        println!("  RFM heatmap saved to: {}", path.display());
    }

    Ok(())
}
