//! Human-readable dataset report.

use crate::domain::{Dataset, MarketFlow, MarketInstant, TermId};
use std::fmt::Write;

/// Points shown per flow unless configured otherwise.
pub const DEFAULT_POINT_LIMIT: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    /// Include the term index and symbol metadata.
    pub show_index: bool,
    /// Flows with more points show the first `point_limit - 1`, an
    /// ellipsis, and the last point.
    pub point_limit: usize,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            show_index: true,
            point_limit: DEFAULT_POINT_LIMIT,
        }
    }
}

const INDENT: &str = "    ";

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

/// Render the whole dataset.
pub fn render_dataset(dataset: &Dataset, options: ViewOptions) -> String {
    let mut out = String::new();
    if options.show_index {
        render_index(&mut out, dataset);
        out.push('\n');
    }

    line(&mut out, 0, "Symbol data:");
    if dataset.data().is_empty() {
        line(&mut out, 1, "No data.");
    }
    for (&symbol, group) in dataset.data() {
        line(&mut out, 1, &format!("{} ->", term_label(dataset, symbol)));
        for flow in group.flows() {
            render_flow(&mut out, flow, options.point_limit.max(1));
        }
    }
    out
}

fn term_label(dataset: &Dataset, id: TermId) -> String {
    match dataset.index().terms().lookup(id) {
        Ok(name) => format!("[{}] {name}", id.0),
        Err(_) => format!("[{}] <unknown>", id.0),
    }
}

fn render_index(out: &mut String, dataset: &Dataset) {
    let index = dataset.index();
    line(out, 0, "Index:");
    if index.terms().is_empty() {
        line(out, 1, "No data.");
        return;
    }

    line(out, 1, "Terms:");
    let width = index.terms().iter().map(|(_, name)| name.len()).max().unwrap_or(0);
    for (id, name) in index.terms().iter() {
        line(
            out,
            2,
            &format!("[{}] -> {name:<width$} ({})", id.0, index.role(id)),
        );
    }

    out.push('\n');
    line(out, 1, "Symbol Metadata:");
    for (&symbol, meta) in index.symbols() {
        let name = |id: TermId| index.terms().lookup(id).unwrap_or("<unknown>");
        line(out, 2, &format!("{} ->", name(symbol)));
        line(out, 3, &format!("Quote   : [{}] ({})", meta.held_asset.0, name(meta.held_asset)));
        line(out, 3, &format!("Base    : [{}] ({})", meta.traded_asset.0, name(meta.traded_asset)));
        line(out, 3, &format!("Exchange: [{}] ({})", meta.exchange.0, name(meta.exchange)));
        line(out, 3, &format!("Type    : {}", meta.kind));
    }
}

fn render_flow(out: &mut String, flow: &MarketFlow, limit: usize) {
    line(out, 2, &format!("{}:", flow.interval().describe()));
    let range = match (flow.start(), flow.end()) {
        (None, None) => "None.".to_string(),
        (Some(start), None) => format!("[{start},)"),
        (None, Some(end)) => format!("(,{end}]"),
        (Some(start), Some(end)) => format!("[{start},{end}]"),
    };
    line(out, 3, &format!("Allowed Time Range: {range}"));
    out.push('\n');

    let points = flow.points();
    if points.len() > limit {
        for point in points.values().take(limit - 1) {
            line(out, 3, &point_line(point));
        }
        line(out, 4, "...");
        if let Some(last) = points.values().next_back() {
            line(out, 3, &point_line(last));
        }
    } else {
        for point in points.values() {
            line(out, 3, &point_line(point));
        }
    }
}

fn point_line(point: &MarketInstant) -> String {
    let mut text = String::new();
    match point.time {
        Some(time) => {
            let _ = write!(text, "[{time}]");
        }
        None => text.push_str("[<Undefined>]"),
    }
    let _ = write!(
        text,
        " Open: {} | High: {} | Low: {} | Close: {} | Volume: {}",
        point.open, point.high, point.low, point.close, point.volume
    );
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Silent;
    use crate::domain::Interval;
    use crate::merge::{merge, MergeRequest, SymbolKey};
    use chrono::{NaiveDate, NaiveDateTime};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn sample(days: u32) -> Dataset {
        let points = (1..=days).map(|d| MarketInstant::flat(day(d), f64::from(d), 1.0)).collect();
        let request = MergeRequest::new(
            SymbolKey::new("KRAKEN_SPOT_BTC_USD", "BTC", "USD", "KRAKEN"),
            Interval::days(1).unwrap(),
            points,
        )
        .declaring(Some(day(1)), None);
        merge(&Dataset::empty(), request, &Silent).unwrap()
    }

    #[test]
    fn empty_dataset_says_so() {
        let text = render_dataset(&Dataset::empty(), ViewOptions::default());
        assert!(text.contains("Index:\n    No data."));
        assert!(text.contains("Symbol data:\n    No data."));
    }

    #[test]
    fn lists_terms_with_roles() {
        let text = render_dataset(&sample(2), ViewOptions::default());
        assert!(text.contains("KRAKEN_SPOT_BTC_USD (Symbol)"), "{text}");
        assert!(text.contains("(Exchange)"));
        assert!(text.contains("Type    : Spot"));
        assert!(text.contains("1 Day:"));
        assert!(text.contains("Allowed Time Range: [2021-01-01 00:00:00,)"));
    }

    #[test]
    fn truncates_long_flows() {
        let options = ViewOptions {
            show_index: false,
            point_limit: 3,
        };
        let text = render_dataset(&sample(5), options);
        let shown: Vec<&str> = text.lines().filter(|l| l.contains("Open:")).collect();
        assert_eq!(shown.len(), 3);
        assert!(shown[0].contains("[2021-01-01 00:00:00]"));
        assert!(shown[1].contains("[2021-01-02 00:00:00]"));
        assert!(shown[2].contains("[2021-01-05 00:00:00]"));
        assert!(text.contains("..."));
        assert!(!text.contains("Index:"));
    }
}
