use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{ArrayView2, Axis};

use crate::dataset::DatasetDescriptor;
use crate::metrics::RunMetrics;
use crate::model::VARIANTS;
use crate::training::ExperimentConfig;

/// Writes every export artifact. The artifacts are independent of each other,
/// so their order is arbitrary.
pub fn write_all(
    results_dir: &Path,
    config: &ExperimentConfig,
    metrics: &RunMetrics,
    descriptors: &[DatasetDescriptor],
) -> Result<()> {
    write_key_values(&results_dir.join("keys-values.csv"), config)?;

    for (index, desc) in descriptors.iter().enumerate() {
        let svg = render_loss_curves(
            desc.name,
            metrics.train_loss.index_axis(Axis(0), index),
            metrics.valid_loss.index_axis(Axis(0), index),
        )?;
        let path = results_dir.join(format!("{}-loss.svg", desc.name));
        fs::write(&path, svg)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let table = render_metrics_table(metrics, descriptors)?;
    let path = results_dir.join("metrics.tex");
    fs::write(&path, table).with_context(|| format!("failed to write {}", path.display()))
}

/// Run-configuration record: a small key/value table.
fn write_key_values(path: &Path, config: &ExperimentConfig) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(["key", "value"])?;
    writer.write_record(["num_epochs", config.num_epochs.to_string().as_str()])?;
    writer.write_record(["batch_size", config.batch_size.to_string().as_str()])?;
    writer.write_record(["lr", config.lr.to_string().as_str()])?;
    writer.flush()?;
    Ok(())
}

const SVG_WIDTH: f64 = 640.0;
const SVG_HEIGHT: f64 = 480.0;
const MARGIN_LEFT: f64 = 62.0;
const MARGIN_RIGHT: f64 = 18.0;
const MARGIN_TOP: f64 = 42.0;
const MARGIN_BOTTOM: f64 = 54.0;

/// One color per variant: blue for the baseline, orange for the alternate.
const VARIANT_COLORS: [&str; 2] = ["#1f77b4", "#ff7f0e"];

/// Renders one dataset's loss curves: solid training and dashed validation
/// lines per variant, y axis fixed to [0, 1], integer epoch ticks.
fn render_loss_curves(
    title: &str,
    train_loss: ArrayView2<f64>,
    valid_loss: ArrayView2<f64>,
) -> Result<String> {
    let num_epochs = train_loss.ncols();
    let plot_width = SVG_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = SVG_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let x = |epoch: usize| {
        if num_epochs > 1 {
            MARGIN_LEFT + epoch as f64 / (num_epochs - 1) as f64 * plot_width
        } else {
            MARGIN_LEFT + plot_width / 2.0
        }
    };
    let y = |loss: f64| MARGIN_TOP + (1.0 - loss) * plot_height;

    let mut svg = String::new();
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{SVG_WIDTH}" height="{SVG_HEIGHT}" viewBox="0 0 {SVG_WIDTH} {SVG_HEIGHT}">"#,
    )?;
    writeln!(
        svg,
        r#"<rect width="{SVG_WIDTH}" height="{SVG_HEIGHT}" fill="white"/>"#,
    )?;
    writeln!(
        svg,
        r#"<clipPath id="plot-area"><rect x="{MARGIN_LEFT}" y="{MARGIN_TOP}" width="{plot_width}" height="{plot_height}"/></clipPath>"#,
    )?;

    // Horizontal grid and y tick labels, fixed to [0, 1].
    for tick in 0..=5 {
        let value = tick as f64 / 5.0;
        let line_y = y(value);
        writeln!(
            svg,
            r##"<line x1="{MARGIN_LEFT}" y1="{line_y:.1}" x2="{:.1}" y2="{line_y:.1}" stroke="#d0d0d0" stroke-width="0.5"/>"##,
            MARGIN_LEFT + plot_width,
        )?;
        writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" font-size="12" text-anchor="end">{value:.1}</text>"#,
            MARGIN_LEFT - 8.0,
            line_y + 4.0,
        )?;
    }

    // Vertical grid and integer epoch ticks.
    let last_epoch = num_epochs.saturating_sub(1);
    let step = (last_epoch.div_ceil(10)).max(1);
    for epoch in (0..num_epochs).step_by(step) {
        let line_x = x(epoch);
        writeln!(
            svg,
            r##"<line x1="{line_x:.1}" y1="{MARGIN_TOP}" x2="{line_x:.1}" y2="{:.1}" stroke="#d0d0d0" stroke-width="0.5"/>"##,
            MARGIN_TOP + plot_height,
        )?;
        writeln!(
            svg,
            r#"<text x="{line_x:.1}" y="{:.1}" font-size="12" text-anchor="middle">{epoch}</text>"#,
            MARGIN_TOP + plot_height + 18.0,
        )?;
    }

    // Axes, title and axis labels.
    writeln!(
        svg,
        r#"<rect x="{MARGIN_LEFT}" y="{MARGIN_TOP}" width="{plot_width}" height="{plot_height}" fill="none" stroke="black" stroke-width="1"/>"#,
    )?;
    writeln!(
        svg,
        r#"<text x="{:.1}" y="24" font-size="16" text-anchor="middle">{title}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
    )?;
    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" font-size="15" text-anchor="middle">Epochs</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        SVG_HEIGHT - 14.0,
    )?;
    writeln!(
        svg,
        r#"<text x="18" y="{:.1}" font-size="15" text-anchor="middle" transform="rotate(-90 18 {:.1})">loss</text>"#,
        MARGIN_TOP + plot_height / 2.0,
        MARGIN_TOP + plot_height / 2.0,
    )?;

    // Loss curves, clipped to the plot area.
    for index in 0..VARIANTS.len() {
        let color = VARIANT_COLORS[index];
        for (values, dashed) in [
            (train_loss.index_axis(Axis(0), index), false),
            (valid_loss.index_axis(Axis(0), index), true),
        ] {
            let points: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(epoch, &loss)| format!("{:.1},{:.1}", x(epoch), y(loss)))
                .collect();
            let dash = if dashed { r#" stroke-dasharray="6 4""# } else { "" };
            writeln!(
                svg,
                r#"<polyline points="{}" fill="none" stroke="{color}" stroke-width="1.5"{dash} clip-path="url(#plot-area)"/>"#,
                points.join(" "),
            )?;
        }
    }

    // Legend, top-right inside the plot area.
    let legend_x = MARGIN_LEFT + plot_width - 170.0;
    let legend_y = MARGIN_TOP + 10.0;
    writeln!(
        svg,
        r##"<rect x="{legend_x:.1}" y="{legend_y:.1}" width="160" height="76" fill="white" stroke="#808080" stroke-width="0.5"/>"##,
    )?;
    for (index, variant) in VARIANTS.iter().enumerate() {
        let color = VARIANT_COLORS[index];
        for (offset, (phase, dashed)) in [("Train", false), ("Validation", true)]
            .into_iter()
            .enumerate()
        {
            let entry_y = legend_y + 16.0 + (index * 2 + offset) as f64 * 16.0;
            let dash = if dashed { r#" stroke-dasharray="6 4""# } else { "" };
            writeln!(
                svg,
                r#"<line x1="{:.1}" y1="{entry_y:.1}" x2="{:.1}" y2="{entry_y:.1}" stroke="{color}" stroke-width="1.5"{dash}/>"#,
                legend_x + 8.0,
                legend_x + 36.0,
            )?;
            writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-size="12">{phase} {}</text>"#,
                legend_x + 42.0,
                entry_y + 4.0,
                variant.label(),
            )?;
        }
    }

    writeln!(svg, "</svg>")?;
    Ok(svg)
}

/// Summary table: variants as rows, datasets as columns, the best accuracy
/// of each column emboldened.
fn render_metrics_table(
    metrics: &RunMetrics,
    descriptors: &[DatasetDescriptor],
) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "\\begin{{tabular}}{{r|{}}}", "r".repeat(descriptors.len()))?;
    writeln!(out, "\\toprule")?;

    let header: Vec<&str> = descriptors.iter().map(|desc| desc.name).collect();
    writeln!(out, " & {} \\\\", header.join(" & "))?;
    writeln!(out, "\\midrule")?;

    for (variant_index, variant) in VARIANTS.iter().enumerate() {
        let mut cells = Vec::with_capacity(descriptors.len());
        for dataset_index in 0..descriptors.len() {
            let value = metrics.test_accuracy[[dataset_index, variant_index]];
            let column_max = metrics
                .test_accuracy
                .row(dataset_index)
                .fold(f64::NEG_INFINITY, |max, &candidate| max.max(candidate));
            if (value - column_max).abs() < 1e-12 {
                cells.push(format!("\\bf{{{value:.2}}}"));
            } else {
                cells.push(format!("{value:.2}"));
            }
        }
        writeln!(out, "\\textbf{{{}}} & {} \\\\", variant.label(), cells.join(" & "))?;
    }

    writeln!(out, "\\bottomrule")?;
    writeln!(out, "\\end{{tabular}}")?;
    Ok(out)
}
