//! Box-drawn tables for listing records.

use colored::Colorize;
use std::fmt::Display;

/// Rows of cells under bold headers. Widths are measured in characters.
pub struct Table {
    headers: Vec<String>,
    right_aligned: Vec<bool>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            right_aligned: vec![false; headers.len()],
            rows: Vec::new(),
        }
    }

    /// Right-align column `col` (counts and sizes). Out-of-range is ignored.
    pub fn numeric(mut self, col: usize) -> Self {
        if let Some(flag) = self.right_aligned.get_mut(col) {
            *flag = true;
        }
        self
    }

    /// Add a row; missing cells render empty, extra cells are dropped.
    pub fn row<I, T>(&mut self, cells: I)
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        let mut row: Vec<String> = cells
            .into_iter()
            .take(self.headers.len())
            .map(|c| c.to_string())
            .collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        widths
    }

    fn pad(text: &str, width: usize, right: bool) -> String {
        let fill = " ".repeat(width.saturating_sub(text.chars().count()));
        if right {
            format!("{fill}{text}")
        } else {
            format!("{text}{fill}")
        }
    }

    fn rule(widths: &[usize], left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(&mid.to_string()))
    }

    fn line(&self, cells: &[String], widths: &[usize], bold: bool) -> String {
        let cells: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let padded = Self::pad(cell, widths[i], self.right_aligned[i] && !bold);
                if bold {
                    format!(" {} ", padded.bold())
                } else {
                    format!(" {padded} ")
                }
            })
            .collect();
        format!("\u{2502}{}\u{2502}", cells.join("\u{2502}"))
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let mut lines = vec![
            Self::rule(&widths, '\u{250c}', '\u{252c}', '\u{2510}'),
            self.line(&self.headers, &widths, true),
            Self::rule(&widths, '\u{251c}', '\u{253c}', '\u{2524}'),
        ];
        for row in &self.rows {
            lines.push(self.line(row, &widths, false));
        }
        lines.push(Self::rule(&widths, '\u{2514}', '\u{2534}', '\u{2518}'));
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_rows_between_rules() {
        let mut t = Table::new(&["Table", "Rows"]).numeric(1);
        t.row(["memories", "12"]);
        t.row(["agents", "1"]);
        let rendered = t.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with('\u{250c}'));
        assert!(lines[5].ends_with('\u{2518}'));
        assert!(lines[1].contains("Rows"));
        assert!(lines[4].contains("agents"));
        assert!(lines[4].contains("    1 "));
    }

    #[test]
    fn pads_missing_and_drops_extra_cells() {
        let mut t = Table::new(&["A", "B", "C"]);
        t.row(["only"]);
        t.row(["1", "2", "3", "4"]);
        let rendered = t.render();
        let data: Vec<&str> = rendered.lines().skip(3).take(2).collect();
        for line in data {
            assert_eq!(line.matches('\u{2502}').count(), 4);
        }
        assert!(!rendered.contains('4'));
    }

    #[test]
    fn width_counts_characters_not_bytes() {
        assert_eq!(Table::pad("é", 3, false), "é  ");
        assert_eq!(Table::pad("42", 4, true), "  42");
        assert_eq!(Table::pad("toolong", 3, false), "toolong");
    }

    #[test]
    fn empty_table_has_header_only() {
        let t = Table::new(&["X"]);
        assert!(t.is_empty());
        assert_eq!(t.render().lines().count(), 4);
    }
}
