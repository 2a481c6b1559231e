//! Plain-text tables for the command-line front end.

use std::{borrow::Cow, fmt::Write as _};

use itertools::Itertools;

use crate::{
    config::format_duration,
    loader::LoadResult,
    schema::ColumnSpec,
};

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h).max(3)).collect_vec();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect_vec();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

/// One line per column: position, original header, sanitized name, type.
pub fn render_schema(columns: &[ColumnSpec]) -> String {
    let headers = ["#", "header", "column", "type", "nullable"]
        .map(String::from)
        .to_vec();
    let rows = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            vec![
                (idx + 1).to_string(),
                column.original_name.clone(),
                column.sanitized_name.clone(),
                column.inferred_type.to_string(),
                if column.nullable { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect_vec();
    render_table(&headers, &rows)
}

pub fn render_load_result(result: &LoadResult) -> String {
    let mut output = String::new();
    let summary = [
        ("table", result.table.clone()),
        ("rows", result.total_rows.to_string()),
        ("attempted", result.rows_attempted.to_string()),
        ("loaded", result.rows_succeeded.to_string()),
        ("batches", result.batches_executed.to_string()),
        ("failed batches", result.batch_failures.len().to_string()),
        (
            "stopped",
            result
                .stopped
                .map_or_else(|| "no".to_string(), |reason| reason.to_string()),
        ),
        ("elapsed", format_duration(&result.elapsed)),
    ];
    let rows = summary
        .into_iter()
        .map(|(key, value)| vec![key.to_string(), value])
        .collect_vec();
    output.push_str(&render_table(&["metric".to_string(), "value".to_string()], &rows));

    if !result.batch_failures.is_empty() {
        output.push('\n');
        let failures = result
            .batch_failures
            .iter()
            .map(|failure| {
                vec![
                    failure.batch_index.to_string(),
                    format!("{}-{}", failure.first_row, failure.first_row + failure.rows - 1),
                    failure.error.clone(),
                ]
            })
            .collect_vec();
        output.push_str(&render_table(
            &["batch".to_string(), "rows".to_string(), "error".to_string()],
            &failures,
        ));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .join("  ");
    line.trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
