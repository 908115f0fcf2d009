//! Module for visualizing simulation results.

use crate::engine::{OrderSide, SimulationReport};
use crate::errors::{Error, Result};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
#[cfg(feature = "metrics")]
use crate::tradelog::TradeLog;

use chrono::{DateTime, Utc};
use plotters::backend::{BitMapBackend, DrawingBackend, SVGBackend};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::WHITE;

/// Chart height over width (16:9).
const HEIGHT_RATIO: f64 = 9.0 / 16.0;
const LABEL_SIZE: i32 = 20;
const FONT: &str = "sans-serif";

fn plotters_err(e: impl std::fmt::Display) -> Error {
    Error::Plotters(e.to_string())
}

/// Output formats for the generated charts with output filename.
#[derive(Debug, Clone)]
pub enum DrawOutput {
    /// Save to the output SVG file.
    Svg(String),
    /// Save to the output PNG file.
    Png(String),
}

impl Default for DrawOutput {
    fn default() -> Self {
        Self::Svg("capital.svg".to_owned())
    }
}

/// Configuration options for chart generation.
#[derive(Debug, Default)]
pub struct DrawOptions {
    /// Chart title.
    title: Option<String>,
    /// Output format and path.
    output: DrawOutput,
    /// Whether to draw the remaining cash under the asset value.
    show_cash: bool,
    #[cfg(feature = "metrics")]
    /// Whether to show the metrics panel.
    show_metrics: bool,
}

impl DrawOptions {
    /// Sets the chart title.
    pub fn title(mut self, title: impl ToString) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Sets the output format and path.
    pub fn draw_output(mut self, output: DrawOutput) -> Self {
        self.output = output;
        self
    }

    /// Enables or disables the remaining cash curve.
    pub fn show_cash(mut self, show: bool) -> Self {
        self.show_cash = show;
        self
    }

    #[cfg(feature = "metrics")]
    /// Enables or disables the metrics panel. Needs a trade log.
    pub fn show_metrics(mut self, show: bool) -> Self {
        self.show_metrics = show;
        self
    }
}

/// Chart drawing utility for the capital curve of a simulation.
pub struct Draw<'d> {
    report: &'d SimulationReport,
    #[cfg(feature = "metrics")]
    trade_log: Option<&'d TradeLog>,
    options: DrawOptions,
}

impl<'d> Draw<'d> {
    /// Creates a new `Draw` instance with the given report.
    pub fn with_report(report: &'d SimulationReport) -> Self {
        Self {
            report,
            #[cfg(feature = "metrics")]
            trade_log: None,
            options: DrawOptions::default(),
        }
    }

    #[cfg(feature = "metrics")]
    /// Attaches the trade log used by the metrics panel.
    pub fn with_trade_log(mut self, trade_log: &'d TradeLog) -> Self {
        self.trade_log = Some(trade_log);
        self
    }

    /// Sets the drawing options.
    pub fn with_options(mut self, options: DrawOptions) -> Self {
        self.options = options;
        self
    }

    /// Generates and saves the chart based on the configured options.
    pub fn plot(&self) -> Result<()> {
        if self.report.ledger.len() < 2 {
            return Err(Error::Plotters("at least two ledger rows are needed".to_owned()));
        }

        let title = self.options.title.as_deref().unwrap_or("Capital");
        #[cfg(feature = "metrics")]
        let panel = if self.options.show_metrics { 1.2 } else { 1.0 };
        #[cfg(not(feature = "metrics"))]
        let panel = 1.0;

        let bars = self.report.ledger.len() as u32;
        let width = 1280.max(4 * bars).min(4096);
        let height = ((width as f64 * HEIGHT_RATIO * panel) as u32).min(900);

        match &self.options.output {
            DrawOutput::Svg(path) => {
                let root = SVGBackend::new(path, (width, height)).into_drawing_area();
                root.fill(&WHITE).map_err(plotters_err)?;
                self.draw_chart(&root, title)
            }
            DrawOutput::Png(path) => {
                let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
                root.fill(&WHITE).map_err(plotters_err)?;
                self.draw_chart(&root, title)
            }
        }
    }

    /// Draws the capital chart and the optional metrics panel.
    fn draw_chart<DB: DrawingBackend>(&self, drawing_area: &DrawingArea<DB, Shift>, title: &str) -> Result<()> {
        #[cfg(not(feature = "metrics"))]
        let capital_area = drawing_area.clone();
        #[cfg(feature = "metrics")]
        let capital_area = if self.options.show_metrics {
            let metrics_height = drawing_area.dim_in_pixel().1 as f64 * 0.15;
            let (metrics_area, capital_area) = drawing_area.split_vertically(metrics_height as u32);
            self.draw_metrics_panel(&metrics_area)?;
            capital_area
        } else {
            drawing_area.clone()
        };

        self.draw_capital_chart(&capital_area, title)?;
        drawing_area.present().map_err(plotters_err)
    }

    /// Draws the asset value (and remaining cash) curves with entry and exit markers.
    fn draw_capital_chart<DB: DrawingBackend>(&self, drawing_area: &DrawingArea<DB, Shift>, title: &str) -> Result<()> {
        let ledger = &self.report.ledger;
        let first = ledger.first().ok_or(Error::EmptyIndex)?;
        let last = ledger.last().ok_or(Error::EmptyIndex)?;
        let (first_time, last_time) = (first.date, last.date);

        let values = ledger.iter().flat_map(|r| {
            let cash = self.options.show_cash.then_some(r.row.remaining_cash);
            std::iter::once(r.row.asset_value).chain(cash)
        });
        let (min_value, max_value) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let padding = ((max_value - min_value) * 0.1).max(1.0);

        let drawing_area = drawing_area.margin(10, 10, 70, 70);
        let mut chart = ChartBuilder::on(&drawing_area)
            .caption(title, (FONT, 30).into_font())
            .x_label_area_size(LABEL_SIZE)
            .y_label_area_size(LABEL_SIZE)
            .build_cartesian_2d(first_time..last_time, min_value - padding..max_value + padding)
            .map_err(plotters_err)?;

        chart
            .configure_mesh()
            .x_desc("Date")
            .y_desc("Asset value")
            .x_label_style((FONT, LABEL_SIZE))
            .y_label_style((FONT, LABEL_SIZE))
            .x_labels((ledger.len() / 15).max(2))
            .y_labels(5)
            .draw()
            .map_err(plotters_err)?;

        let initial = self.report.initial_cash;
        let curve: Vec<(DateTime<Utc>, f64)> = ledger.iter().map(|r| (r.date, r.row.asset_value)).collect();
        chart
            .draw_series(LineSeries::new(curve.iter().copied(), BLUE))
            .map_err(plotters_err)?
            .label("asset value")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

        if self.options.show_cash {
            chart
                .draw_series(LineSeries::new(ledger.iter().map(|r| (r.date, r.row.remaining_cash)), BLACK.mix(0.5)))
                .map_err(plotters_err)?
                .label("remaining cash")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK.mix(0.5)));
        }

        // underwater stretches
        chart
            .draw_series(
                curve
                    .iter()
                    .filter(|(_, v)| *v < initial)
                    .map(|(d, v)| Circle::new((*d, *v), 1, RED.filled())),
            )
            .map_err(plotters_err)?;

        let value_at = |date: &DateTime<Utc>| {
            curve
                .iter()
                .find(|(d, _)| d == date)
                .map(|(_, v)| *v)
        };
        let markers = self.report.orders.iter().filter_map(|o| {
            let color = match o.side {
                OrderSide::Buy => GREEN.filled(),
                OrderSide::Sell => RED.filled(),
            };
            value_at(&o.date).map(|v| TriangleMarker::new((o.date, v), 4, color))
        });
        chart.draw_series(markers).map_err(plotters_err)?;

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(plotters_err)
    }

    /// Draws the metrics panel (if the "metrics" feature is enabled).
    #[cfg(feature = "metrics")]
    fn draw_metrics_panel<DB: DrawingBackend>(&self, drawing_area: &DrawingArea<DB, Shift>) -> Result<()> {
        let log = self
            .trade_log
            .ok_or_else(|| Error::Plotters("metrics panel needs a trade log".to_owned()))?;
        let metrics = Metrics::from((self.report, log));

        let text = format!(
            "Return: {:.2}% | Max Drawdown: {:.2}% | Profit Factor: {:.2} | Sharpe Ratio: {:.2} | Win Rate: {:.2}% | Trades: {}",
            metrics.total_return(),
            metrics.max_drawdown(),
            metrics.profit_factor(),
            metrics.sharpe_ratio(0.0),
            metrics.win_rate(),
            metrics.trades()
        );
        drawing_area
            .margin(20, 0, 70, 70)
            .draw_text(&text, &(FONT, 24).into_font().color(&BLACK), (0, 20))
            .map_err(plotters_err)
    }
}

#[cfg(test)]
#[test]
fn plot_needs_two_ledger_rows() {
    let report = SimulationReport::default();
    let draw = Draw::with_report(&report).with_options(DrawOptions::default().title("empty"));
    assert!(matches!(draw.plot(), Err(Error::Plotters(_))));
}
