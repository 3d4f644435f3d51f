//! Console reports.
//!
//! [`TableManager`] turns configuration, health results and manager
//! snapshots into plain-text tables. Every input is optional; missing data
//! renders as an `UNAVAILABLE` placeholder row instead of an error.
//!
//! With [`TableManager::with_color`] the status and state cells are painted
//! with `colored` (green healthy/ready, yellow degraded/unknown, red
//! unhealthy/failed). Widths are measured on the plain text, so colored and
//! plain tables line up the same way.

use crate::config::ServiceConfig;
use crate::health::{AggregateHealthStatus, HealthCheckResult, HealthStatus};
use crate::state::{ManagerKind, ManagerSnapshot, ManagerState};
use colored::{Color, Colorize};
use serde_json::Value;
use std::fmt::Write as _;

const UNAVAILABLE: &str = "UNAVAILABLE";
const NONE: &str = "-";

/// Read-only reporting over manager state.
#[derive(Debug, Clone, Default)]
pub struct TableManager {
    color: bool,
}

impl TableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paints status and state cells when `enabled`.
    pub fn with_color(mut self, enabled: bool) -> Self {
        self.color = enabled;
        self
    }

    pub fn color(&self) -> bool {
        self.color
    }

    fn paint(&self, text: String, color: Option<Color>) -> Cell {
        Cell {
            text,
            color: color.filter(|_| self.color),
        }
    }

    /// Parameter/value table of every configuration field.
    pub fn render_config(&self, config: &ServiceConfig) -> String {
        let mut table = TextTable::new(format!("{} started", config.service_name()), ["Parameter", "Value"]);
        for (key, value) in config.entries() {
            table.row([key.to_string(), value]);
        }
        table.render()
    }

    /// Health table followed by the instrumentation table.
    pub fn render(
        &self,
        health: Option<&AggregateHealthStatus>,
        tracer: Option<&ManagerSnapshot>,
        metrics: Option<&ManagerSnapshot>,
    ) -> String {
        let mut report = self.render_health(health);
        report.push('\n');
        report.push_str(&self.render_managers(tracer, metrics));
        report
    }

    pub fn render_health(&self, health: Option<&AggregateHealthStatus>) -> String {
        let title = match health {
            Some(aggregate) => format!("Health Check Services (overall {})", aggregate.overall),
            None => "Health Check Services".to_string(),
        };
        let mut table = TextTable::new(title, ["Service", "Status", "Message", "Details"]);
        match health {
            Some(aggregate) if !aggregate.services.is_empty() => {
                for (name, result) in &aggregate.services {
                    let status = result.status();
                    table.row([
                        Cell::from(name.clone()),
                        self.paint(status.to_string(), Some(status_color(status))),
                        Cell::from(message_cell(result)),
                        Cell::from(details_cell(result)),
                    ]);
                }
            }
            Some(_) => table.row([NONE, NONE, "no services registered", NONE]),
            None => table.row([NONE, UNAVAILABLE, "health data unavailable", NONE]),
        }
        table.render()
    }

    pub fn render_managers(&self, tracer: Option<&ManagerSnapshot>, metrics: Option<&ManagerSnapshot>) -> String {
        let mut table = TextTable::new("Instrumentation", ["Manager", "State", "Services"]);
        for (kind, snapshot) in [(ManagerKind::Tracer, tracer), (ManagerKind::Metrics, metrics)] {
            match snapshot {
                Some(snapshot) => table.row([
                    Cell::from(snapshot.kind.to_string()),
                    self.paint(snapshot.state.to_string(), state_color(snapshot.state)),
                    Cell::from(services_cell(&snapshot.services)),
                ]),
                None => table.row([kind.to_string(), UNAVAILABLE.to_string(), NONE.to_string()]),
            }
        }
        table.render()
    }

    pub fn print(&self, report: &str) {
        println!("{report}");
    }
}

fn status_color(status: HealthStatus) -> Color {
    match status {
        HealthStatus::Healthy => Color::Green,
        HealthStatus::Degraded | HealthStatus::Unknown => Color::Yellow,
        HealthStatus::Unhealthy => Color::Red,
    }
}

fn state_color(state: ManagerState) -> Option<Color> {
    match state {
        ManagerState::Ready => Some(Color::Green),
        ManagerState::Failed => Some(Color::Red),
        _ => None,
    }
}

fn message_cell(result: &HealthCheckResult) -> String {
    if result.message().is_empty() {
        "No message".to_string()
    } else {
        result.message().to_string()
    }
}

fn details_cell(result: &HealthCheckResult) -> String {
    if result.details().is_empty() {
        return "No details".to_string();
    }
    result
        .details()
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}={s}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn services_cell(services: &[String]) -> String {
    if services.is_empty() {
        NONE.to_string()
    } else {
        services.join(", ")
    }
}

/// Table cell text plus an optional paint.
struct Cell {
    text: String,
    color: Option<Color>,
}

impl From<String> for Cell {
    fn from(text: String) -> Self {
        Self { text, color: None }
    }
}

impl From<&str> for Cell {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

struct TextTable<const N: usize> {
    title: String,
    headers: [Cell; N],
    rows: Vec<[Cell; N]>,
}

impl<const N: usize> TextTable<N> {
    fn new(title: impl Into<String>, headers: [&str; N]) -> Self {
        Self {
            title: title.into(),
            headers: headers.map(Cell::from),
            rows: Vec::new(),
        }
    }

    fn row<S: Into<Cell>>(&mut self, cells: [S; N]) {
        self.rows.push(cells.map(Into::into));
    }

    fn widths(&self) -> [usize; N] {
        let mut widths = [0; N];
        for cells in std::iter::once(&self.headers).chain(&self.rows) {
            for (width, cell) in widths.iter_mut().zip(cells) {
                *width = (*width).max(cell.text.chars().count());
            }
        }
        widths
    }

    fn render(&self) -> String {
        let widths = self.widths();
        let border = widths
            .iter()
            .fold(String::from("+"), |acc, w| acc + &"-".repeat(w + 2) + "+");

        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title);
        let _ = writeln!(out, "{border}");
        write_cells(&mut out, &self.headers, &widths);
        let _ = writeln!(out, "{border}");
        for cells in &self.rows {
            write_cells(&mut out, cells, &widths);
        }
        let _ = write!(out, "{border}");
        out
    }
}

fn write_cells(out: &mut String, cells: &[Cell], widths: &[usize]) {
    out.push('|');
    for (cell, width) in cells.iter().zip(widths) {
        let pad = " ".repeat(width.saturating_sub(cell.text.chars().count()));
        match cell.color {
            Some(color) => {
                let _ = write!(out, " {}{pad} |", cell.text.as_str().color(color));
            }
            None => {
                let _ = write!(out, " {}{pad} |", cell.text);
            }
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use crate::mock::test_config;
    use crate::state::ManagerState;
    use colored::Colorize;

    fn snapshot(kind: ManagerKind, state: ManagerState, services: &[&str]) -> ManagerSnapshot {
        ManagerSnapshot {
            kind,
            state,
            services: services.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_config_table_lists_every_field() {
        let rendered = TableManager::new().render_config(&test_config());
        assert!(rendered.starts_with("svc started\n"));
        for key in ["service_name", "host", "port", "version", "workers", "debug_mode", "environment"] {
            assert!(rendered.contains(key), "missing {key} in\n{rendered}");
        }
        assert!(rendered.contains("| 8080 "));
    }

    #[test]
    fn test_missing_inputs_render_placeholders() {
        let rendered = TableManager::new().render(None, None, None);
        assert!(rendered.contains("health data unavailable"));
        assert_eq!(rendered.matches(UNAVAILABLE).count(), 3);
    }

    #[test]
    fn test_health_rows() {
        let aggregate = AggregateHealthStatus::from_results([
            ("db".to_string(), HealthCheckResult::healthy("db")),
            (
                "cache".to_string(),
                HealthCheckResult::degraded("cache", "slow").with_detail("latency_ms", 250),
            ),
        ]);
        let rendered = TableManager::new().render_health(Some(&aggregate));

        assert!(rendered.contains("(overall DEGRADED)"));
        assert!(rendered.contains("latency_ms=250"));
        assert!(rendered.contains("No details"));
        // rows are aligned: every line of the table body has the same width
        let widths: Vec<_> = rendered.lines().skip(1).map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]), "{rendered}");
    }

    #[test]
    fn test_empty_health_is_not_unavailable() {
        let aggregate = AggregateHealthStatus::from_results(Vec::new());
        let rendered = TableManager::new().render_health(Some(&aggregate));
        assert!(rendered.contains("no services registered"));
        assert!(!rendered.contains(UNAVAILABLE));
        assert_eq!(aggregate.overall, HealthStatus::Healthy);
    }

    #[test]
    fn test_colored_status_cells_keep_alignment() {
        colored::control::set_override(true);
        let aggregate = AggregateHealthStatus::from_results([
            ("db".to_string(), HealthCheckResult::healthy("db")),
            ("queue".to_string(), HealthCheckResult::unhealthy("queue", "refused")),
        ]);
        let plain = TableManager::new().render_health(Some(&aggregate));
        let painted = TableManager::new().with_color(true).render_health(Some(&aggregate));
        colored::control::unset_override();

        assert!(!plain.contains('\u{1b}'));
        assert!(painted.contains(&"HEALTHY".green().to_string()));
        assert!(painted.contains(&"UNHEALTHY".red().to_string()));
        assert_eq!(strip_ansi(&painted), plain);
    }

    fn strip_ansi(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            if c == '\u{1b}' {
                chars.by_ref().find(|c| *c == 'm');
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn test_manager_rows() {
        let tracer = snapshot(ManagerKind::Tracer, ManagerState::Ready, &["jaeger", "zipkin"]);
        let rendered = TableManager::new().render_managers(Some(&tracer), None);
        assert!(rendered.contains("| TracerManager  | READY       | jaeger, zipkin |"), "{rendered}");
        assert!(rendered.contains("MetricsManager"));
        assert!(rendered.contains(UNAVAILABLE));
    }
}
