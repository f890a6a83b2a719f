//! Plain-text rendering of the feed: header, dot map, type chart and
//! incident table.
//!
//! Every function returns lines without trailing newlines so the caller
//! decides where they go. Styling is applied with `console`, which emits
//! no escape codes when stdout is not a terminal.

use chrono::NaiveDateTime;
use console::style;
use geo::{BoundingRect, MultiPoint, Point};
use incident_feed_cache::{FeedState, FeedTotals};
use incident_feed_source_models::{Incident, TypeCount};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Density glyphs for the dot map, from one incident per cell upwards.
const DENSITY: [char; 4] = ['.', ':', 'o', '@'];

/// Everything the dashboard shows for one frame.
pub struct Frame<'a> {
    /// Current local time.
    pub now: NaiveDateTime,
    /// Newest timestamp fetched.
    pub watermark: NaiveDateTime,
    /// Window in hours.
    pub hours: u32,
    /// Largest allowed window.
    pub max_hours: u32,
    /// Cache lifecycle state.
    pub state: FeedState,
    /// Counters across fetches.
    pub totals: &'a FeedTotals,
    /// Incidents inside the window.
    pub visible: Vec<&'a Incident>,
    /// Top incident types inside the window.
    pub frequencies: &'a [TypeCount],
    /// Last refresh error, if the last refresh failed.
    pub last_error: Option<&'a str>,
}

/// Renders a whole frame sized to a terminal of `cols` x `rows`.
#[must_use]
pub fn frame(frame: &Frame<'_>, cols: usize, rows: usize) -> Vec<String> {
    let cols = cols.max(40);
    let mut lines = header(frame);
    lines.push(String::new());

    let points: Vec<(f64, f64)> = frame.visible.iter().map(|i| (i.x, i.y)).collect();
    lines.push(style("Map").bold().to_string());
    lines.extend(dot_map(&points, cols.min(72), 14));
    lines.push(String::new());

    lines.push(style("Incident types").bold().to_string());
    lines.extend(bar_chart(frame.frequencies, cols));
    lines.push(String::new());

    lines.push(style(format!("Incidents ({})", frame.visible.len())).bold().to_string());
    let used = lines.len() + 3;
    lines.extend(incident_table(&frame.visible, rows.saturating_sub(used).max(5), cols));
    lines.push(String::new());
    lines.push(
        style("commands: hours <n> | + | - | refresh | quit")
            .dim()
            .to_string(),
    );
    lines
}

/// Status lines: clock, window, watermark and fetch counters.
#[must_use]
pub fn header(frame: &Frame<'_>) -> Vec<String> {
    let totals = frame.totals;
    let mut lines = vec![
        format!(
            "{}  {}  window {}h (max {}h)  state {:?}",
            style("Seattle 911 dispatch").bold().cyan(),
            frame.now.format(TIME_FORMAT),
            frame.hours,
            frame.max_hours,
            frame.state,
        ),
        format!(
            "watermark {}  fetches {} ({} failed)  rows {} kept {}  no coords {}  rejected {}",
            frame.watermark.format(TIME_FORMAT),
            totals.fetches,
            totals.failed_fetches,
            totals.received,
            totals.appended,
            totals.dropped_missing_coordinates,
            totals.rejected_coordinates + totals.rejected_timestamps,
        ),
    ];
    if let Some(error) = frame.last_error {
        lines.push(style(format!("last refresh failed: {error}")).red().to_string());
    }
    lines
}

/// Horizontal bar chart of type counts, scaled to `width` columns.
#[must_use]
pub fn bar_chart(frequencies: &[TypeCount], width: usize) -> Vec<String> {
    if frequencies.is_empty() {
        return vec![style("  no incidents in window").dim().to_string()];
    }

    let label_width = frequencies
        .iter()
        .map(|c| c.incident_type.chars().count())
        .max()
        .unwrap_or(0)
        .min(28);
    let max_count = frequencies.iter().map(|c| c.count).max().unwrap_or(1).max(1);
    let count_width = max_count.to_string().len();
    let bar_space = width
        .saturating_sub(label_width + count_width + 6)
        .max(1);

    frequencies
        .iter()
        .map(|c| {
            let bar_len = (c.count * bar_space).div_ceil(max_count);
            format!(
                "  {:<label_width$} {:>count_width$} {}",
                truncate(&c.incident_type, label_width),
                c.count,
                style("#".repeat(bar_len)).green(),
            )
        })
        .collect()
}

/// Coarse density map of planar points, `cols` x `rows` cells, north up.
#[must_use]
pub fn dot_map(points: &[(f64, f64)], cols: usize, rows: usize) -> Vec<String> {
    let cols = cols.max(1);
    let rows = rows.max(1);
    let border = format!("+{}+", "-".repeat(cols));

    let multi: MultiPoint<f64> = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
    let Some(bounds) = multi.bounding_rect() else {
        let mut lines = vec![border.clone()];
        lines.extend((0..rows).map(|_| format!("|{}|", " ".repeat(cols))));
        lines.push(border);
        return lines;
    };

    let (min, max) = (bounds.min(), bounds.max());
    let span_x = (max.x - min.x).max(f64::EPSILON);
    let span_y = (max.y - min.y).max(f64::EPSILON);

    let mut grid = vec![vec![0usize; cols]; rows];
    for point in &multi {
        let col = cell(point.x() - min.x, span_x, cols);
        let row = rows - 1 - cell(point.y() - min.y, span_y, rows);
        grid[row][col] += 1;
    }

    let mut lines = Vec::with_capacity(rows + 2);
    lines.push(border.clone());
    for row in grid {
        let line: String = row
            .into_iter()
            .map(|n| match n {
                0 => ' ',
                1 => DENSITY[0],
                2..=3 => DENSITY[1],
                4..=7 => DENSITY[2],
                _ => DENSITY[3],
            })
            .collect();
        lines.push(format!("|{}|", style(line).red()));
    }
    lines.push(border);
    lines
}

/// Visible incidents, newest first, at most `limit` rows.
#[must_use]
pub fn incident_table(visible: &[&Incident], limit: usize, width: usize) -> Vec<String> {
    let mut sorted: Vec<&Incident> = visible.to_vec();
    sorted.sort_by(|a, b| b.datetime.cmp(&a.datetime));

    let address_width = width.saturating_sub(19 + 24 + 6).clamp(12, 40);
    let mut lines = vec![
        style(format!(
            "  {:<19} {:<address_width$} {}",
            "Time", "Address", "Type"
        ))
        .underlined()
        .to_string(),
    ];
    lines.extend(sorted.iter().take(limit).map(|incident| {
        format!(
            "  {:<19} {:<address_width$} {}",
            incident.datetime.format(TIME_FORMAT),
            truncate(incident.address.as_deref().unwrap_or("-"), address_width),
            incident.incident_type,
        )
    }));
    if sorted.len() > limit {
        lines.push(style(format!("  ... {} more", sorted.len() - limit)).dim().to_string());
    }
    lines
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn cell(offset: f64, span: f64, cells: usize) -> usize {
    ((offset / span) * cells as f64).floor().clamp(0.0, (cells - 1) as f64) as usize
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('~');
    out
}
