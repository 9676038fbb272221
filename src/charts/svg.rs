//! Inline SVG renderer
//!
//! Produces a self-contained HTML fragment (one `<svg>` with the four panels
//! stacked). Every marker carries a `<title>` child, which browsers show as a
//! hover tooltip, so no script is needed for point labels.

use anyhow::Result;
use std::fmt::Write as _;

use crate::charts::autoscale::Range;
use crate::charts::ticks::{format_sig, linear_ticks, log_ticks};
use crate::charts::{Axis, Chart, ChartSink, LineStyle, Panel, Series};

const Y_TICKS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct SvgChartSink {
    pub width: f64,
    pub panel_height: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub panel_gap: f64,
    pub marker_radius: f64,
}

impl Default for SvgChartSink {
    fn default() -> Self {
        Self {
            width: 1600.0,
            panel_height: 170.0,
            margin_left: 90.0,
            margin_right: 90.0,
            panel_gap: 70.0,
            marker_radius: 2.5,
        }
    }
}

/// Plot-area geometry of one panel, in SVG user units.
#[derive(Debug, Clone, Copy)]
struct Frame {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    x_range: Range,
}

impl Frame {
    fn x_px(&self, x: f64) -> Option<f64> {
        let (lo, hi) = self.x_range;
        let t = (x - lo) / (hi - lo);
        t.is_finite().then(|| self.left + t * self.width)
    }

    fn y_px(&self, y: f64, axis: &Axis) -> Option<f64> {
        let (lo, hi) = axis.range;
        let t = if axis.log {
            if y <= 0.0 || lo <= 0.0 {
                return None;
            }
            (y.ln() - lo.ln()) / (hi.ln() - lo.ln())
        } else {
            (y - lo) / (hi - lo)
        };
        t.is_finite().then(|| self.top + (1.0 - t) * self.height)
    }

    /// Linear position for the right axis, which is never log.
    fn y_px_linear(&self, y: f64, range: Range) -> Option<f64> {
        let t = (y - range.0) / (range.1 - range.0);
        t.is_finite().then(|| self.top + (1.0 - t) * self.height)
    }

    fn contains_x(&self, x: f64) -> bool {
        let (lo, hi) = self.x_range;
        x >= lo && x <= hi
    }
}

impl ChartSink for SvgChartSink {
    type Output = String;

    fn render(&self, chart: &Chart) -> Result<String> {
        let title_band = 24.0;
        let slot = title_band + self.panel_height + self.panel_gap;
        let total_height = slot * chart.panels.len() as f64;
        let plot_width = self.width - self.margin_left - self.margin_right;

        let mut out = String::new();
        writeln!(
            out,
            r##"<div class="coronaboard-chart" data-region="{}">"##,
            escape_html(&chart.region)
        )?;
        writeln!(
            out,
            r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w:.0} {h:.0}" width="100%" font-family="sans-serif" font-size="12">"##,
            w = self.width,
            h = total_height
        )?;

        for (i, panel) in chart.panels.iter().enumerate() {
            let frame = Frame {
                left: self.margin_left,
                top: i as f64 * slot + title_band,
                width: plot_width,
                height: self.panel_height,
                x_range: panel.x_range,
            };
            self.write_panel(&mut out, i, panel, &frame, &chart.x_ticks)?;
        }

        writeln!(out, "</svg>")?;
        writeln!(out, "</div>")?;
        Ok(out)
    }
}

impl SvgChartSink {
    fn write_panel(
        &self,
        out: &mut String,
        index: usize,
        panel: &Panel,
        frame: &Frame,
        x_ticks: &[(f64, String)],
    ) -> Result<()> {
        let clip_id = format!("cb-clip-{}", index);
        let bottom = frame.top + frame.height;
        let right = frame.left + frame.width;

        writeln!(out, r##"<g class="panel">"##)?;
        writeln!(
            out,
            r##"<clipPath id="{id}"><rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}"/></clipPath>"##,
            id = clip_id,
            x = frame.left,
            y = frame.top,
            w = frame.width,
            h = frame.height
        )?;
        writeln!(
            out,
            r##"<text x="{x:.1}" y="{y:.1}" text-anchor="middle" font-size="14">{t}</text>"##,
            x = frame.left + frame.width / 2.0,
            y = frame.top - 8.0,
            t = escape_html(&panel.title)
        )?;
        writeln!(
            out,
            r##"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="none" stroke="#444"/>"##,
            x = frame.left,
            y = frame.top,
            w = frame.width,
            h = frame.height
        )?;

        // date axis, labels slanted like an auto-formatted date axis
        for (x, label) in x_ticks {
            let Some(px) = frame.x_px(*x) else { continue };
            writeln!(
                out,
                r##"<line x1="{px:.1}" y1="{b:.1}" x2="{px:.1}" y2="{b2:.1}" stroke="#444"/><text transform="translate({px:.1},{ty:.1}) rotate(-30)" text-anchor="end" font-size="10">{l}</text>"##,
                b = bottom,
                b2 = bottom + 4.0,
                ty = bottom + 14.0,
                l = escape_html(label)
            )?;
        }

        // left axis
        let left_ticks = if panel.primary_axis.log {
            log_ticks(panel.primary_axis.range, Y_TICKS)
        } else {
            linear_ticks(panel.primary_axis.range, Y_TICKS)
        };
        for v in left_ticks {
            let Some(py) = frame.y_px(v, &panel.primary_axis) else { continue };
            writeln!(
                out,
                r##"<line x1="{l2:.1}" y1="{py:.1}" x2="{l:.1}" y2="{py:.1}" stroke="{c}"/><text x="{tx:.1}" y="{py:.1}" dy="4" text-anchor="end" fill="{c}">{v}</text>"##,
                l = frame.left,
                l2 = frame.left - 4.0,
                tx = frame.left - 6.0,
                c = panel.primary_axis.color,
                v = format_sig(v, 3)
            )?;
        }
        write_axis_label(out, &panel.primary_axis, frame.left - 70.0, frame)?;

        // right axis
        if let Some(secondary) = &panel.secondary {
            for v in linear_ticks(secondary.axis.range, Y_TICKS) {
                let Some(py) = frame.y_px_linear(v, secondary.axis.range) else { continue };
                writeln!(
                    out,
                    r##"<line x1="{r:.1}" y1="{py:.1}" x2="{r2:.1}" y2="{py:.1}" stroke="{c}"/><text x="{tx:.1}" y="{py:.1}" dy="4" fill="{c}">{v}</text>"##,
                    r = right,
                    r2 = right + 4.0,
                    tx = right + 6.0,
                    c = secondary.axis.color,
                    v = format_sig(v, 3)
                )?;
            }
            write_axis_label(out, &secondary.axis, right + 75.0, frame)?;
        }

        writeln!(out, r##"<g clip-path="url(#{})">"##, clip_id)?;
        for reference in &panel.references {
            self.write_series(out, reference, &reference.y, &panel.primary_axis, frame)?;
        }
        self.write_series(out, &panel.primary, &panel.primary.y, &panel.primary_axis, frame)?;
        if let Some(secondary) = &panel.secondary {
            // overlay already lives in primary coordinates
            self.write_series(
                out,
                &secondary.series,
                &secondary.overlay,
                &panel.primary_axis,
                frame,
            )?;
        }
        writeln!(out, "</g>")?;
        writeln!(out, "</g>")?;
        Ok(())
    }

    /// Draw `series` using `ys` as positions on `axis`; hover labels come from
    /// the series itself.
    fn write_series(
        &self,
        out: &mut String,
        series: &Series,
        ys: &[f64],
        axis: &Axis,
        frame: &Frame,
    ) -> Result<()> {
        let points: Vec<(usize, f64, f64)> = series
            .x
            .iter()
            .zip(ys)
            .enumerate()
            .filter_map(|(i, (&x, &y))| {
                let keep = series.style == LineStyle::Dashed || frame.contains_x(x);
                if !keep {
                    return None;
                }
                Some((i, frame.x_px(x)?, frame.y_px(y, axis)?))
            })
            .collect();
        if points.is_empty() {
            return Ok(());
        }

        let mut path = String::new();
        let mut previous: Option<usize> = None;
        for &(i, px, py) in &points {
            // break the line where a point was dropped (NaN, off-axis)
            let cmd = if previous.is_some_and(|p| p + 1 == i) { 'L' } else { 'M' };
            write!(path, "{}{:.1},{:.1} ", cmd, px, py)?;
            previous = Some(i);
        }
        let dash = match series.style {
            LineStyle::Dashed => r##" stroke-dasharray="6,4""##,
            LineStyle::MarkersLine => "",
        };
        writeln!(
            out,
            r##"<path d="{d}" fill="none" stroke="{c}" stroke-width="1.2"{dash}/>"##,
            d = path.trim_end(),
            c = series.color,
            dash = dash
        )?;

        if series.style == LineStyle::MarkersLine {
            for &(i, px, py) in &points {
                let label = series.hover.get(i).map(String::as_str).unwrap_or_default();
                writeln!(
                    out,
                    r##"<circle cx="{px:.1}" cy="{py:.1}" r="{r}" fill="{c}"><title>{l}</title></circle>"##,
                    r = self.marker_radius,
                    c = series.color,
                    l = escape_html(label)
                )?;
            }
        }
        Ok(())
    }
}

fn write_axis_label(out: &mut String, axis: &Axis, x: f64, frame: &Frame) -> Result<()> {
    let y = frame.top + frame.height / 2.0;
    writeln!(
        out,
        r##"<text transform="translate({x:.1},{y:.1}) rotate(-90)" text-anchor="middle" fill="{c}">{l}</text>"##,
        c = axis.color,
        l = escape_html(&axis.label)
    )?;
    Ok(())
}

/// Minimal escaping for text and attribute content.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
