//! Plain-text table rendering for the preview and column listings.

use std::{borrow::Cow, fmt::Write as _};

/// Cells wider than this are cut and end with `…`.
pub const MAX_CELL_WIDTH: usize = 40;

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let headers = headers.iter().map(|h| fit_cell(h)).collect::<Vec<_>>();
    let rows = rows
        .iter()
        .map(|row| row.iter().map(|cell| fit_cell(cell)).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let mut widths = headers
        .iter()
        .map(|h| h.chars().count().max(3))
        .collect::<Vec<_>>();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_line(&headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_line(&rule, &widths));
    for row in &rows {
        let _ = writeln!(output, "{}", format_line(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_line<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let line = widths
        .iter()
        .enumerate()
        .map(|(idx, &width)| {
            let cell: &str = cells.get(idx).map_or("", |cell| cell.as_ref());
            format!("{cell:<width$}")
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

/// Flattens control characters and shortens long values.
fn fit_cell(value: &str) -> Cow<'_, str> {
    let flattened = if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    };
    if flattened.chars().count() <= MAX_CELL_WIDTH {
        return flattened;
    }
    let mut cut = flattened
        .chars()
        .take(MAX_CELL_WIDTH - 1)
        .collect::<String>();
    cut.push('…');
    Cow::Owned(cut)
}
