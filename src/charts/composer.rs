use anyhow::Result;

use crate::charts::autoscale::{rescale, x_window, ylim, Range, MARGIN};
use crate::charts::ticks::{date_ticks, format_sig};
use crate::charts::{Axis, Chart, ChartSink, LineStyle, Panel, SecondaryAxis, Series};
use crate::dates;
use crate::signals::DerivedSignalSet;

pub const WINDOW_DAYS: i64 = 100;
pub const DATE_TICK_EVERY_DAYS: i64 = 5;
pub const REPRODUCTION_DISPLAY_RANGE: Range = (0.5, 1.5);

const PRIMARY_COLOR: &str = "red";
const SECONDARY_COLOR: &str = "black";

#[derive(Debug, Clone, Copy)]
pub struct ChartOptions {
    /// Log y-axis on the cumulative panels
    pub log_scale: bool,
    pub window_days: i64,
    /// Right edge of the x-window (day ordinal)
    pub today: i64,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            log_scale: false,
            window_days: WINDOW_DAYS,
            today: dates::today_ordinal(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChartComposer {
    options: ChartOptions,
}

impl ChartComposer {
    pub fn new(options: ChartOptions) -> Self {
        Self { options }
    }

    pub fn compose(&self, signals: &DerivedSignalSet) -> Chart {
        let x = signals.ordinals_f64();
        let window = x_window(self.options.today, self.options.window_days);
        let log = self.options.log_scale;

        let panels = vec![
            self.dual_axis_panel(
                "cumulative and new daily cases",
                &x,
                window,
                ("sick cumulative", &signals.cumulative, log),
                ("daily new cases", &signals.daily_new),
            ),
            self.dual_axis_panel(
                "current sick and daily change",
                &x,
                window,
                ("sick now", &signals.active, false),
                ("daily change", &signals.active_change),
            ),
            reproduction_panel(signals, &x, window),
            self.dual_axis_panel(
                "cumulative and new deaths",
                &x,
                window,
                ("deceased cumulative", &signals.deaths_cumulative, log),
                ("daily deceased", &signals.daily_deaths),
            ),
        ];

        Chart {
            region: signals.region.clone(),
            x_range: window,
            x_ticks: date_ticks(window, DATE_TICK_EVERY_DAYS),
            panels,
        }
    }

    /// Compose and hand the chart to `sink`.
    pub fn render<S: ChartSink>(&self, signals: &DerivedSignalSet, sink: &S) -> Result<S::Output> {
        sink.render(&self.compose(signals))
    }

    fn dual_axis_panel(
        &self,
        title: &str,
        x: &[f64],
        window: Range,
        (left_label, left, left_log): (&str, &[f64], bool),
        (right_label, right): (&str, &[f64]),
    ) -> Panel {
        let left_range = ylim(left, Some((x, window)), MARGIN, left_log);
        let right_range = ylim(right, Some((x, window)), MARGIN, false);

        // The secondary is drawn in primary coordinates: on a log axis the
        // calibration line targets ln(range) and the result is exponentiated.
        // A non-positive primary range (nothing visible) has no log image.
        let overlay = if left_log && left_range.0 > 0.0 {
            rescale(right, right_range, (left_range.0.ln(), left_range.1.ln()))
                .into_iter()
                .map(f64::exp)
                .collect()
        } else {
            rescale(right, right_range, left_range)
        };

        Panel {
            title: title.to_string(),
            x_range: window,
            primary_axis: Axis {
                label: left_label.to_string(),
                color: PRIMARY_COLOR,
                range: left_range,
                log: left_log,
            },
            primary: count_series(left_label, PRIMARY_COLOR, x, left),
            secondary: Some(SecondaryAxis {
                axis: Axis {
                    label: right_label.to_string(),
                    color: SECONDARY_COLOR,
                    range: right_range,
                    log: false,
                },
                series: count_series(right_label, SECONDARY_COLOR, x, right),
                overlay,
            }),
            references: Vec::new(),
        }
    }
}

fn count_series(name: &str, color: &'static str, x: &[f64], y: &[f64]) -> Series {
    Series {
        name: name.to_string(),
        color,
        style: LineStyle::MarkersLine,
        x: x.to_vec(),
        y: y.to_vec(),
        hover: y.iter().map(|&v| format_sig(v, 2)).collect(),
    }
}

fn reproduction_panel(signals: &DerivedSignalSet, x: &[f64], window: Range) -> Panel {
    let (first, last) = match (x.first(), x.last()) {
        (Some(&a), Some(&b)) => (a, b),
        _ => window,
    };

    Panel {
        title: "reproduction rate".to_string(),
        x_range: window,
        primary_axis: Axis {
            label: "reproduction rate".to_string(),
            color: PRIMARY_COLOR,
            range: REPRODUCTION_DISPLAY_RANGE,
            log: false,
        },
        primary: Series {
            name: "reproduction rate".to_string(),
            color: PRIMARY_COLOR,
            style: LineStyle::MarkersLine,
            x: x.to_vec(),
            y: signals.reproduction_rate.clone(),
            // tooltips show the unclamped ratio
            hover: signals
                .reproduction_rate_raw
                .iter()
                .map(|r| format!("{:.2}", r))
                .collect(),
        },
        secondary: None,
        references: vec![Series {
            name: "steady state".to_string(),
            color: SECONDARY_COLOR,
            style: LineStyle::Dashed,
            x: vec![first, last],
            y: vec![1.0, 1.0],
            hover: Vec::new(),
        }],
    }
}
