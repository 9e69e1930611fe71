//! Heatmap rendering of the cohort and RFM results using Plotters

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use plotters::prelude::*;
use tracing::info;

use crate::cohort::CohortAnalysis;
use crate::io::today_stamp;
use crate::period::Frequency;
use crate::rfm::{BinInfo, RfmAnalysis};

/// Light end of the purple-blue colour ramp
const RAMP_LOW: (u8, u8, u8) = (247, 252, 253);
/// Dark end of the purple-blue colour ramp
const RAMP_HIGH: (u8, u8, u8) = (77, 0, 75);

/// Colour of `t` in `[0, 1]` on a white-to-purple ramp
pub fn ramp_color(t: f64) -> RGBColor {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(
        lerp(RAMP_LOW.0, RAMP_HIGH.0),
        lerp(RAMP_LOW.1, RAMP_HIGH.1),
        lerp(RAMP_LOW.2, RAMP_HIGH.2),
    )
}

/// Dark cells get white annotations
fn annotation_color(t: f64) -> RGBColor {
    if t > 0.6 {
        WHITE
    } else {
        BLACK
    }
}

/// `<YYYYMMDD>_<freq>_<name>.png`, or `<YYYYMMDD>_<name>.png` without a frequency
pub fn plot_file_name(stamp: &str, frequency: Option<Frequency>, name: &str) -> String {
    match frequency {
        Some(frequency) => format!("{stamp}_{}_{name}.png", frequency.code()),
        None => format!("{stamp}_{name}.png"),
    }
}

/// Dated path of a figure inside `figures_dir`, creating the directory
pub fn plot_path(
    figures_dir: impl AsRef<Path>,
    frequency: Option<Frequency>,
    name: &str,
) -> crate::Result<PathBuf> {
    let dir = figures_dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create figures directory {}", dir.display()))?;
    Ok(dir.join(plot_file_name(&today_stamp(), frequency, name)))
}

fn period_subtitle(range: Option<(chrono::NaiveDate, chrono::NaiveDate)>, n: f64) -> String {
    match range {
        Some((first, last)) => format!(
            "(t = {} - {}, n = {:.0})",
            first.format("%b. %Y"),
            last.format("%b. %Y"),
            n
        ),
        None => format!("(n = {n:.0})"),
    }
}

/// Render the retention matrix as an annotated heatmap.
///
/// The first column shows the cohort size, the remaining cells the share of
/// the cohort active after that many periods.
pub fn plot_retention_matrix(cohorts: &CohortAnalysis, output_path: &Path) -> crate::Result<()> {
    let rows = cohorts.retention.nrows();
    let cols = cohorts.retention.ncols();
    if rows == 0 || cols == 0 {
        anyhow::bail!("retention matrix is empty, nothing to plot");
    }

    let labels = cohorts.cohort_labels();
    let sizes = cohorts.cohort_sizes();
    let title = format!(
        "User Retention by Cohorts {}",
        period_subtitle(cohorts.delivery_range, cohorts.total_members())
    );

    let width = 200 + 70 * (cols as u32 + 1);
    let height = 120 + 40 * rows as u32;
    let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
    root.fill(&WHITE)?;

    // column -1 holds the cohort sizes
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(150)
        .build_cartesian_2d(-1f64..cols as f64, 0f64..rows as f64)?;

    let row_label = |y: &f64| {
        let index = rows as f64 - y.floor() - 1.0;
        if index >= 0.0 && (index as usize) < labels.len() {
            labels[index as usize].clone()
        } else {
            String::new()
        }
    };
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(cols + 1)
        .y_labels(rows)
        .x_label_formatter(&|x| {
            if *x < 0.0 {
                "size".to_string()
            } else {
                format!("{}", x.floor() as i64)
            }
        })
        .y_label_formatter(&row_label)
        .x_desc("Number of periods")
        .y_desc("Cohorts")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (row, size) in sizes.iter().enumerate() {
        let y = (rows - row - 1) as f64;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(-1.0, y), (0.0, y + 1.0)],
            WHITE.filled(),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            format!("{size:.0}"),
            (-0.6, y + 0.6),
            ("sans-serif", 14).into_font().color(&BLACK),
        )))?;
    }

    for ((row, col), &share) in cohorts.retention.indexed_iter() {
        if share.is_nan() {
            continue;
        }
        let x = col as f64;
        let y = (rows - row - 1) as f64;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x, y), (x + 1.0, y + 1.0)],
            ramp_color(share).filled(),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            format!("{:.0}%", share * 100.0),
            (x + 0.25, y + 0.6),
            ("sans-serif", 13)
                .into_font()
                .color(&annotation_color(share)),
        )))?;
    }

    root.present()?;
    info!(path = %output_path.display(), "retention matrix plot saved");

    Ok(())
}

/// Footnote lines describing the R and F score intervals
pub fn bin_legend(bins: &BinInfo, frequency: Frequency) -> (String, String) {
    let r = &bins.recency;
    let recency = format!(
        "Recency Score Intervals in {}    4: [{:.0} - {:.0}] > 3: ({:.0} - {:.0}] > 2: ({:.0} - {:.0}] > 1: ({:.0} - {:.0})",
        frequency.unit_name(),
        r[0], r[1], r[1], r[2], r[2], r[3], r[3], r[4]
    );
    let f = &bins.frequency;
    let frequency = format!(
        "Frequency Score Intervals   4: [{:.1} - {:.1}] > 3: [{:.1} - {:.1}) > 2: [{:.1} - {:.1}) > 1: [{:.1} - {:.1})",
        f[4], f[3], f[3], f[2], f[2], f[1], f[1], f[0]
    );
    (recency, frequency)
}

/// Render the recency/frequency segment grid.
///
/// Rows are frequency scores (4 on top), columns recency scores (4 on the
/// left); each cell shows the member count and their mean spending.
pub fn plot_rfm_heatmap(rfm: &RfmAnalysis, output_path: &Path) -> crate::Result<()> {
    let segments = rfm.segments()?;
    let max_members = segments
        .iter()
        .flatten()
        .flatten()
        .map(|s| s.members)
        .max()
        .unwrap_or(1) as f64;

    let title = format!(
        "Recency-Frequency Heatmap {}",
        period_subtitle(rfm.delivery_range, rfm.len() as f64)
    );

    let root = BitMapBackend::new(output_path, (1200, 900)).into_drawing_area();
    root.fill(&WHITE)?;
    let (upper, footer) = root.split_vertically(820);

    let mut chart = ChartBuilder::on(&upper)
        .caption(title, ("sans-serif", 26))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..4f64, 0f64..4f64)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(4)
        .y_labels(4)
        .x_label_formatter(&|x| format!("{}", 4 - x.floor() as i64))
        .y_label_formatter(&|y| format!("{}", y.floor() as i64 + 1))
        .x_desc("Recency Score")
        .y_desc("Frequency Score")
        .axis_desc_style(("sans-serif", 16))
        .draw()?;

    for (f_index, row) in segments.iter().enumerate() {
        for (r_index, segment) in row.iter().enumerate() {
            let Some(segment) = segment else {
                continue;
            };
            // recency 4 sits in the leftmost column
            let x = (3 - r_index) as f64;
            let y = f_index as f64;
            let share = segment.members as f64 / max_members;
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x, y), (x + 1.0, y + 1.0)],
                ramp_color(share).filled(),
            )))?;
            let style = ("sans-serif", 16)
                .into_font()
                .color(&annotation_color(share));
            chart.draw_series([
                Text::new(
                    format!("{} Members", segment.members),
                    (x + 0.15, y + 0.6),
                    style.clone(),
                ),
                Text::new(
                    format!("{:.2} EUR avg. Spending", segment.mean_monetary),
                    (x + 0.15, y + 0.4),
                    style,
                ),
            ])?;
        }
    }

    let (recency_note, frequency_note) = bin_legend(&rfm.bins, rfm.frequency);
    let note_style = ("sans-serif", 14).into_font().color(&BLACK);
    footer.draw(&Text::new(frequency_note, (20, 10), note_style.clone()))?;
    footer.draw(&Text::new(recency_note, (20, 40), note_style))?;

    root.present()?;
    info!(path = %output_path.display(), "rfm heatmap saved");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_file_name() {
        assert_eq!(
            plot_file_name("20210308", Some(Frequency::Quarter), "retention_matrix"),
            "20210308_Q_retention_matrix.png"
        );
        assert_eq!(plot_file_name("20210308", None, "overview"), "20210308_overview.png");
    }

    #[test]
    fn test_plot_path_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let figures = dir.path().join("figures");
        let path = plot_path(&figures, Some(Frequency::Week), "rfm_heatmap").unwrap();
        assert!(figures.is_dir());
        assert!(path.to_string_lossy().ends_with("_W_rfm_heatmap.png"));
    }

    #[test]
    fn test_ramp_color() {
        assert_eq!(ramp_color(0.0), RGBColor(247, 252, 253));
        assert_eq!(ramp_color(1.0), RGBColor(77, 0, 75));
        assert_eq!(ramp_color(2.0), ramp_color(1.0));
        assert_eq!(ramp_color(f64::NAN), ramp_color(0.0));
    }

    #[test]
    fn test_bin_legend() {
        let bins = BinInfo {
            recency: crate::rfm::recency_edges(Frequency::Week),
            frequency: [1.0, 1.0, 2.0, 3.5, 8.0],
            monetary: [0.0; 5],
        };
        let (recency, frequency) = bin_legend(&bins, Frequency::Week);
        assert!(recency.contains("in Weeks"));
        assert!(recency.contains("4: [0 - 13]"));
        assert!(recency.contains("1: (52 - inf)"));
        assert!(frequency.contains("4: [8.0 - 3.5]"));
    }
}
