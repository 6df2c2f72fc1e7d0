use std::path::Path;

use synseg::ledger::{LedgerEntry, MetricLedger};
use synseg::train::StatsWriter;

/// One polyline of a chart.
pub struct Series<'a> {
    pub label: &'a str,
    pub color: &'a str,
    pub dashed: bool,
    /// `(x, y)` pairs; non-finite values are skipped.
    pub points: Vec<(f64, f64)>,
}

/// Renders the series onto one shared pair of axes.
pub fn build_svg_curve(series: &[Series<'_>]) -> String {
    let points: Vec<(f64, f64)> = series
        .iter()
        .flat_map(|s| s.points.iter().copied())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    if points.len() < 2 {
        return "<p class=\"hint\">Not enough data to draw a curve.</p>".into();
    }

    let w = 760.0f64;
    let h = 220.0f64;
    let pad_l = 60.0f64;
    let pad_r = 16.0f64;
    let pad_t = 16.0f64;
    let pad_b = 30.0f64;

    let (min_x, max_x) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _)| (lo.min(x), hi.max(x)));
    let min_y = points.iter().map(|p| p.1).fold(0.0f64, f64::min);
    let max_y = points.iter().map(|p| p.1).fold(0.0f64, f64::max) * 1.05;

    let px = |x: f64, y: f64| -> (f64, f64) {
        let sx = pad_l + (x - min_x) / (max_x - min_x + 1e-12) * (w - pad_l - pad_r);
        let sy = pad_t + (max_y - y) / (max_y - min_y + 1e-12) * (h - pad_t - pad_b);
        (sx, sy)
    };

    let grey_grid = "#f0f2f5";
    let grey_text = "#999";
    let dark_text = "#333";

    let y_labels: String = (0..=4)
        .map(|g| {
            let frac = g as f64 / 4.0;
            let val = min_y + (max_y - min_y) * frac;
            let y = pad_t + (1.0 - frac) * (h - pad_t - pad_b);
            format!(
                "<text x=\"{}\" y=\"{:.1}\" text-anchor=\"end\" fill=\"{}\" font-size=\"10\">{:.3}</text>\n\
                 <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"{}\" stroke-width=\"1\"/>",
                pad_l - 4.0, y + 4.0, grey_text, val,
                pad_l, y, w - pad_r, y, grey_grid
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let x_labels: String = [min_x, (min_x + max_x) / 2.0, max_x]
        .iter()
        .map(|&x| {
            let (sx, _) = px(x, 0.0);
            format!(
                "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" fill=\"{}\" font-size=\"10\">{:.0}</text>",
                sx, h - 4.0, grey_text, x
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut lines = Vec::new();
    let mut legend = Vec::new();
    for (k, s) in series.iter().enumerate() {
        let path: String = s
            .points
            .iter()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .enumerate()
            .map(|(i, &(x, y))| {
                let (sx, sy) = px(x, y);
                if i == 0 { format!("M{:.1},{:.1}", sx, sy) } else { format!(" L{:.1},{:.1}", sx, sy) }
            })
            .collect();
        if path.is_empty() {
            continue;
        }
        let dash = if s.dashed { " stroke-dasharray=\"5,4\"" } else { "" };
        lines.push(format!(
            "<path d=\"{}\" stroke=\"{}\" stroke-width=\"2\" fill=\"none\"{}/>",
            path, s.color, dash
        ));
        let lx = pad_l + 8.0 + 110.0 * k as f64;
        legend.push(format!(
            "<rect x=\"{:.1}\" y=\"4\" width=\"18\" height=\"4\" fill=\"{}\"/>\n\
             <text x=\"{:.1}\" y=\"13\" fill=\"{}\" font-size=\"10\">{}</text>",
            lx, s.color, lx + 22.0, dark_text, s.label
        ));
    }

    format!(
        "<svg class=\"loss-svg\" width=\"{}\" height=\"{}\" xmlns=\"http://www.w3.org/2000/svg\">\n\
         {}\n{}\n{}\n\
         <!-- Legend -->\n\
         {}\n\
         </svg>",
        w, h, y_labels, x_labels, lines.join("\n"), legend.join("\n"),
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn results_table(entries: &[LedgerEntry]) -> String {
    let Some(first) = entries.first() else {
        return "<p class=\"hint\">No results yet.</p>".into();
    };
    let header: String = first.metrics.iter().map(|m| format!("<th>{}</th>", escape(m))).collect();
    let rows: String = entries
        .iter()
        .map(|e| {
            let cells: String = first
                .metrics
                .iter()
                .map(|m| match e.results.get(m) {
                    Some(v) => format!("<td>{v:.4}</td>"),
                    None => "<td>-</td>".to_string(),
                })
                .collect();
            format!(
                "<tr><td>{}</td>{}<td>{}</td></tr>",
                escape(e.snapshot_pth.as_deref().unwrap_or("-")),
                cells,
                escape(&e.total_time_str)
            )
        })
        .collect();
    format!("<table><tr><th>snapshot</th>{header}<th>time</th></tr>{rows}</table>")
}

/// Iteration parsed from a `network-snapshot-<iter>.json` reference.
fn snapshot_iteration(reference: &str) -> Option<f64> {
    let name = Path::new(reference).file_stem()?.to_str()?;
    name.rsplit('-').next()?.parse().ok()
}

pub fn dashboard_page(run_dir: &Path) -> anyhow::Result<String> {
    let stats = StatsWriter::read_all(run_dir)?;
    let loss = Series {
        label: "train loss",
        color: "#dc2626",
        dashed: false,
        points: stats
            .iter()
            .filter_map(|line| Some((line.scalars.get("Progress/niter")?.mean, line.scalars.get("Loss/loss")?.mean)))
            .collect(),
    };

    let val = MetricLedger::read_all(run_dir, "val")?;
    let iou = Series {
        label: "val IoU",
        color: "#1e40af",
        dashed: true,
        points: val
            .entries
            .iter()
            .filter_map(|e| Some((snapshot_iteration(e.snapshot_pth.as_deref()?)?, e.score("IoU")?)))
            .collect(),
    };

    let test = MetricLedger::read_all(run_dir, "test")?;
    let test_all = MetricLedger::read_all(run_dir, "test_all")?;

    Ok(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>synseg: {title}</title>\n\
         <style>body{{font-family:sans-serif;margin:24px;color:#333}}td,th{{padding:2px 8px;text-align:right}}\
         .hint{{color:#999}}</style></head><body>\n\
         <h1>{title}</h1>\n\
         <h2>Training loss</h2>\n{loss}\n\
         <h2>Validation IoU</h2>\n{iou}\n\
         <h2>Validation</h2>\n{val_table}\n\
         <h2>Test</h2>\n{test_table}\n\
         <h2>Test (all checkpoints)</h2>\n{test_all_table}\n\
         <p><a href=\"/stats.json\">stats.json</a> · <a href=\"/metrics/val.json\">val</a> · \
         <a href=\"/metrics/test.json\">test</a></p>\n\
         </body></html>",
        title = escape(&run_dir.display().to_string()),
        loss = build_svg_curve(&[loss]),
        iou = build_svg_curve(&[iou]),
        val_table = results_table(&val.entries),
        test_table = results_table(&test.entries),
        test_all_table = results_table(&test_all.entries),
    ))
}
