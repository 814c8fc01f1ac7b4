use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::metrics::EvaluationMetrics;

const CHART_WIDTH: f64 = 960.0;
const CHART_HEIGHT: f64 = 420.0;
const MARGIN_LEFT: f64 = 72.0;
const MARGIN_RIGHT: f64 = 24.0;
const MARGIN_TOP: f64 = 24.0;
const MARGIN_BOTTOM: f64 = 56.0;
const Y_TICKS: usize = 5;
const X_TICKS: usize = 6;
const ACTUAL_COLOR: &str = "#1f77b4";
const PREDICTED_COLOR: &str = "#ff7f0e";

/// Test-period actual vs. predicted closes for one ticker.
pub struct ChartInput<'a> {
    pub ticker: &'a str,
    pub dates: &'a [NaiveDate],
    pub actual: &'a [f64],
    pub predicted: &'a [f64],
    pub metrics: &'a EvaluationMetrics,
}

pub fn write_forecast_chart(chart_dir: &Path, input: &ChartInput<'_>) -> Result<PathBuf> {
    let html = render_forecast_chart_html(input)?;
    fs::create_dir_all(chart_dir)
        .with_context(|| format!("Failed to create chart directory {}", chart_dir.display()))?;
    let safe_name: String = input
        .ticker
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let output_path = chart_dir.join(format!("{}_forecast_{}.html", safe_name, Uuid::new_v4()));
    fs::write(&output_path, html)
        .with_context(|| format!("Failed to write chart {}", output_path.display()))?;
    Ok(output_path)
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn render_forecast_chart_html(input: &ChartInput<'_>) -> Result<String> {
    let n = input.dates.len();
    if n == 0 {
        bail!("No test rows to chart for {}", input.ticker);
    }
    if input.actual.len() != n || input.predicted.len() != n {
        bail!(
            "Chart series lengths differ for {} (dates={}, actual={}, predicted={})",
            input.ticker,
            n,
            input.actual.len(),
            input.predicted.len()
        );
    }

    let ticker = escape_html(input.ticker);
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">");
    let _ = write!(&mut html, "<title>{} forecast</title>", ticker);
    html.push_str("<style>body{font-family:Arial,Helvetica,sans-serif;margin:24px;color:#111;}h1{margin-bottom:8px;} .summary-grid{display:flex;gap:16px;flex-wrap:wrap;margin:8px 0 16px;} .summary-card{border:1px solid #d0d0d0;border-radius:6px;padding:12px 16px;min-width:140px;} .summary-label{font-size:12px;color:#555;text-transform:uppercase;letter-spacing:0.05em;} .summary-value{font-size:18px;font-weight:600;color:#111;} svg text{font-size:12px;fill:#333;}</style></head><body>");
    let _ = write!(
        &mut html,
        "<h1>{}: actual vs. predicted close</h1>",
        ticker
    );
    html.push_str("<div class=\"summary-grid\">");
    for (label, value) in [
        ("Test rows", n.to_string()),
        (
            "Date range",
            format!("{} - {}", input.dates[0], input.dates[n - 1]),
        ),
        ("RMSE", format!("{:.4}", input.metrics.rmse)),
        ("MAE", format!("{:.4}", input.metrics.mae)),
        ("R\u{b2}", format!("{:.4}", input.metrics.r2)),
    ] {
        let _ = write!(
            &mut html,
            "<div class=\"summary-card\"><div class=\"summary-label\">{}</div><div class=\"summary-value\">{}</div></div>",
            label, value
        );
    }
    html.push_str("</div>");
    write_svg(&mut html, input);
    html.push_str("</body></html>");
    Ok(html)
}

fn write_svg(html: &mut String, input: &ChartInput<'_>) {
    let n = input.dates.len();
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (mut lo, mut hi) = input
        .actual
        .iter()
        .chain(input.predicted.iter())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        lo = 0.0;
        hi = 1.0;
    }
    if hi - lo < 1e-9 {
        lo -= 1.0;
        hi += 1.0;
    }
    let pad = (hi - lo) * 0.05;
    lo -= pad;
    hi += pad;

    let x_at = |idx: usize| -> f64 {
        if n > 1 {
            MARGIN_LEFT + plot_width * idx as f64 / (n - 1) as f64
        } else {
            MARGIN_LEFT + plot_width / 2.0
        }
    };
    let y_at = |value: f64| -> f64 { MARGIN_TOP + plot_height * (hi - value) / (hi - lo) };

    let _ = write!(
        html,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">",
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    );
    let _ = write!(
        html,
        "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"#fff\" stroke=\"#d0d0d0\"/>",
        MARGIN_LEFT, MARGIN_TOP, plot_width, plot_height
    );

    for tick in 0..=Y_TICKS {
        let value = lo + (hi - lo) * tick as f64 / Y_TICKS as f64;
        let y = y_at(value);
        let _ = write!(
            html,
            "<line x1=\"{:.1}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"#eee\"/><text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\">{:.2}</text>",
            MARGIN_LEFT,
            MARGIN_LEFT + plot_width,
            MARGIN_LEFT - 6.0,
            y + 4.0,
            value
        );
    }

    let x_ticks = X_TICKS.min(n);
    for tick in 0..x_ticks {
        let idx = if x_ticks > 1 {
            tick * (n - 1) / (x_ticks - 1)
        } else {
            0
        };
        let _ = write!(
            html,
            "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\">{}</text>",
            x_at(idx),
            MARGIN_TOP + plot_height + 18.0,
            input.dates[idx]
        );
    }
    let _ = write!(
        html,
        "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\">Date</text><text x=\"16\" y=\"{:.1}\" text-anchor=\"middle\" transform=\"rotate(-90 16 {:.1})\">Close</text>",
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 12.0,
        MARGIN_TOP + plot_height / 2.0,
        MARGIN_TOP + plot_height / 2.0
    );

    for (values, color, dash) in [
        (input.actual, ACTUAL_COLOR, ""),
        (input.predicted, PREDICTED_COLOR, " stroke-dasharray=\"6 4\""),
    ] {
        let points: Vec<String> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(idx, v)| format!("{:.1},{:.1}", x_at(idx), y_at(*v)))
            .collect();
        let _ = write!(
            html,
            "<polyline fill=\"none\" stroke=\"{}\" stroke-width=\"2\"{} points=\"{}\"/>",
            color,
            dash,
            points.join(" ")
        );
    }

    let legend_x = MARGIN_LEFT + 12.0;
    let legend_y = MARGIN_TOP + 16.0;
    for (offset, (label, color)) in [("Actual", ACTUAL_COLOR), ("Predicted", PREDICTED_COLOR)]
        .iter()
        .enumerate()
    {
        let y = legend_y + offset as f64 * 18.0;
        let _ = write!(
            html,
            "<line x1=\"{:.1}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"{}\" stroke-width=\"3\"/><text x=\"{:.1}\" y=\"{:.1}\">{}</text>",
            legend_x,
            legend_x + 24.0,
            color,
            legend_x + 30.0,
            y + 4.0,
            label
        );
    }
    html.push_str("</svg>");
}
