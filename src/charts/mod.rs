//! Chart composition
//!
//! `composer` turns a [`DerivedSignalSet`](crate::signals::DerivedSignalSet) into a
//! toolkit-neutral [`Chart`]; a [`ChartSink`] turns that into something a page can
//! embed. The shipped sink writes inline SVG.

pub mod autoscale;
pub mod composer;
pub mod svg;
pub mod ticks;

use anyhow::Result;
use serde::Serialize;

pub use autoscale::{polyfit_linear, polyval, transform, x_window, ylim, Range};
pub use composer::{ChartComposer, ChartOptions};
pub use svg::SvgChartSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    /// Markers joined by a solid line
    MarkersLine,
    Dashed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Series {
    pub name: String,
    pub color: &'static str,
    pub style: LineStyle,
    /// Day ordinals
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// One label per point; empty for decoration lines
    pub hover: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Axis {
    pub label: String,
    pub color: &'static str,
    pub range: Range,
    pub log: bool,
}

/// Right-hand axis of a dual-axis panel.
#[derive(Debug, Clone, Serialize)]
pub struct SecondaryAxis {
    pub axis: Axis,
    pub series: Series,
    /// `series.y` expressed in primary-axis coordinates
    pub overlay: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Panel {
    pub title: String,
    pub x_range: Range,
    pub primary_axis: Axis,
    pub primary: Series,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<SecondaryAxis>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Series>,
}

/// Four stacked panels sharing one date axis.
#[derive(Debug, Clone, Serialize)]
pub struct Chart {
    pub region: String,
    pub x_range: Range,
    pub x_ticks: Vec<(f64, String)>,
    pub panels: Vec<Panel>,
}

/// Rendering seam: consumes a finished chart, produces the toolkit's document.
pub trait ChartSink {
    type Output;

    fn render(&self, chart: &Chart) -> Result<Self::Output>;
}

/// Passes the chart through as JSON for client-side renderers.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonChartSink;

impl ChartSink for JsonChartSink {
    type Output = serde_json::Value;

    fn render(&self, chart: &Chart) -> Result<Self::Output> {
        Ok(serde_json::to_value(chart)?)
    }
}
