//! Report rendering for the terminal.

use serde::Serialize;

use lesson_harvest::{EntryRoute, ItemOutcome, RunReport};

const TITLE_WIDTH: usize = 40;

/// Print any serializable value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("  Error: could not serialize output: {e}"),
    }
}

pub fn print_report(report: &RunReport) {
    print!("{}", render_report(report));
}

/// Human-readable table of a run report.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let nav = &report.navigation;
    let route = match nav.route {
        EntryRoute::Link => "link",
        EntryRoute::DeepLink => "deep link",
        EntryRoute::NotEntered => "not entered",
    };
    let elapsed = report.finished_at - report.started_at;

    out.push_str(&format!("Level {} harvest\n", report.level));
    out.push_str(&format!("  Auth:       {:?}\n", report.auth));
    out.push_str(&format!(
        "  Navigation: {route} ({} popups closed, {} sections expanded{})\n",
        nav.popups_closed,
        nav.sections_expanded,
        if nav.reauthenticated { ", re-authenticated" } else { "" }
    ));
    out.push_str(&format!("  Duration:   {}s\n\n", elapsed.num_seconds()));

    if report.items.is_empty() {
        out.push_str("  No lessons found.\n");
        return out;
    }

    out.push_str(&format!(
        "  {:>3}  {:<width$}  {:<18}  {}\n",
        "#",
        "Title",
        "Outcome",
        "Detail",
        width = TITLE_WIDTH
    ));
    for row in &report.items {
        let detail = match row.outcome.detail() {
            Some(error) => first_line(error),
            None => match &row.outcome {
                ItemOutcome::Download(job) => job.filename.clone(),
                _ => String::new(),
            },
        };
        out.push_str(&format!(
            "  {:>3}  {:<width$}  {:<18}  {}\n",
            row.item.ordinal,
            truncate(&row.item.title, TITLE_WIDTH),
            row.outcome.label(),
            detail,
            width = TITLE_WIDTH
        ));
    }

    out.push_str(&format!(
        "\n  {} succeeded, {} skipped, {} failed, {} without media, {} interaction errors\n",
        report.count("succeeded"),
        report.count("skipped-existing"),
        report.count("failed"),
        report.count("no-media-found"),
        report.count("interaction-failed"),
    ));
    out
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}
