use chrono::{DateTime, Utc};
use terminal_size::{terminal_size, Height, Width};

use crate::actor::{Paper, Review, Time, UserProfile};
use crate::context::DashboardSummary;

/// Column names plus stringified rows, ready for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: &[&str]) -> Self {
        Self { columns: columns.iter().map(|c| c.to_string()).collect(), rows: Vec::new() }
    }

    pub fn push(&mut self, row: Vec<String>) { self.rows.push(row); }
}

pub fn papers_table(papers: &[Paper]) -> Table {
    let mut t = Table::new(&["id", "title", "author", "submitted", "reviews", "rating", "citations", "source"]);
    for p in papers {
        let source = match (&p.file_reference, &p.external_link) {
            (Some(blob), _) => blob.filename.clone(),
            (None, Some(link)) => link.clone(),
            (None, None) => String::new(),
        };
        t.push(vec![
            p.id.clone(),
            p.title.clone(),
            p.author.to_string(),
            format_time(p.submission_date),
            p.review_count.to_string(),
            format_rating(p.review_count, p.aggregate_rating),
            p.citations.len().to_string(),
            source,
        ]);
    }
    t
}

pub fn reviews_table(reviews: &[Review]) -> Table {
    let mut t = Table::new(&["id", "reviewer", "rating", "submitted", "feedback"]);
    for r in reviews {
        t.push(vec![r.id.clone(), r.reviewer.to_string(), r.rating.to_string(), format_time(r.submission_date), r.feedback.clone()]);
    }
    t
}

pub fn paper_lines(p: &Paper) -> Vec<String> {
    let mut out = vec![
        format!("{} ({})", p.title, p.id),
        format!("author:    {}", p.author),
        format!("submitted: {}", format_time(p.submission_date)),
        format!("reviews:   {} (rating {})", p.review_count, format_rating(p.review_count, p.aggregate_rating)),
    ];
    if !p.citations.is_empty() {
        out.push(format!("cites:     {}", p.citations.join(", ")));
    }
    if let Some(blob) = &p.file_reference {
        out.push(format!("file:      {} [{}, {} bytes]", blob.filename, blob.mime_type, blob.size));
    }
    if let Some(link) = &p.external_link {
        out.push(format!("link:      {}", link));
    }
    out.push(String::new());
    out.push(p.abstract_text.clone());
    out
}

pub fn profile_lines(profile: &UserProfile) -> Vec<String> {
    vec![
        format!("name:       {}", profile.name),
        format!("reputation: {}", profile.reputation),
        format!("tokens:     {}", profile.token_balance),
    ]
}

pub fn dashboard_lines(d: &DashboardSummary) -> Vec<String> {
    let mut out = vec![format!("principal:     {}", d.principal)];
    if let Some(p) = &d.profile {
        out.extend(profile_lines(p));
    }
    out.push(format!("papers:        {}", d.papers.len()));
    out.push(format!("reviews:       {}", d.total_reviews));
    out.push(format!("avg rating:    {:.1}", d.avg_rating));
    out
}

fn format_rating(count: u64, rating: f64) -> String {
    if count == 0 { "-".to_string() } else { format!("{:.1}", rating) }
}

/// Remote timestamps are nanoseconds since the epoch.
pub fn format_time(t: Time) -> String {
    let secs = t.div_euclid(1_000_000_000);
    let nanos = t.rem_euclid(1_000_000_000) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => t.to_string(),
    }
}

// Render a table as ASCII lines, each fitted to `termw` visible columns.
pub fn render_table(table: &Table, termw: usize) -> Vec<String> {
    let cols = &table.columns;
    let mut widths: Vec<usize> = cols.iter().map(|s| visible_len(s).min(termw)).collect();
    for r in &table.rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            let w = visible_len(cell);
            if w > widths[i] { widths[i] = w.min(termw); }
        }
    }

    let sep = build_separator(&widths);
    let mut out = Vec::with_capacity(table.rows.len() + 5);
    out.push(fit_line_to_width(&sep, termw));
    out.push(fit_line_to_width(&build_row_header_colored(cols, &widths), termw));
    out.push(fit_line_to_width(&sep, termw));
    for r in &table.rows {
        out.push(fit_line_to_width(&build_row(r, &widths), termw));
    }
    out.push(fit_line_to_width(&sep, termw));
    out.push(format!("rows: {}", table.rows.len()));
    out
}

pub fn print_table(table: &Table) {
    if table.rows.is_empty() {
        println!("(none)");
        return;
    }
    let termw = get_terminal_width();
    crate::tprintln!("[cli.outputformatter] detected terminal width={} columns", termw);
    for line in render_table(table, termw) {
        println!("{}", line);
    }
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        let text = truncate(cell, *w);
        let pad = " ".repeat(w.saturating_sub(visible_len(&text)));
        s.push(' ');
        if is_numeric_like(cell) {
            s.push_str(&pad);
            s.push_str(&text);
        } else {
            s.push_str(&text);
            s.push_str(&pad);
        }
        s.push_str(" |");
    }
    s
}

// Header names in green; padding follows the visible width.
fn build_row_header_colored(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        let text = truncate(cell, *w);
        s.push(' ');
        s.push_str(&format!("\x1b[32m{}\x1b[0m", text));
        s.push_str(&" ".repeat(w.saturating_sub(visible_len(&text))));
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    let st = s.trim();
    if st.is_empty() { return false; }
    let mut has_digit = false;
    for ch in st.chars() {
        if ch.is_ascii_digit() { has_digit = true; continue; }
        if ".-+".contains(ch) { continue; }
        return false;
    }
    has_digit
}

fn get_terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), Height(_))) if w > 20 => (w - 4) as usize,
        _ => 80,
    }
}

fn fit_line_to_width(s: &str, maxw: usize) -> String {
    if visible_len(s) <= maxw { return s.to_string(); }
    elide_end_preserving_ansi(s, maxw)
}

// Count visible chars, skipping ANSI CSI sequences.
fn visible_len(s: &str) -> usize {
    let mut count = 0;
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            skip_csi(&mut chars);
            continue;
        }
        count += 1;
    }
    count
}

fn skip_csi(chars: &mut std::str::Chars<'_>) -> String {
    let mut seq = String::from("\x1b");
    if chars.clone().next() == Some('[') {
        for c in chars.by_ref() {
            seq.push(c);
            if c.is_ascii_alphabetic() { break; }
        }
    }
    seq
}

fn elide_end_preserving_ansi(s: &str, maxw: usize) -> String {
    let budget = maxw.saturating_sub(3);
    let mut out = String::new();
    let mut taken = 0;
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            out.push_str(&skip_csi(&mut chars));
            continue;
        }
        if taken >= budget { continue; }
        out.push(ch);
        taken += 1;
    }
    out.push_str("...");
    // reset in case a color was cut
    out.push_str("\x1b[0m");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::memory::sample_paper;
    use crate::identity::Principal;

    #[test]
    fn visible_len_ignores_color() {
        assert_eq!(visible_len("\x1b[32mabc\x1b[0m"), 3);
        assert_eq!(visible_len("héllo"), 5);
    }

    #[test]
    fn table_has_header_rows_and_footer() {
        let mut p = sample_paper("p1", "Graph Theory", &Principal::new("alice"));
        p.review_count = 2;
        p.aggregate_rating = 4.5;
        let lines = render_table(&papers_table(&[p]), 200);
        assert_eq!(lines.len(), 6);
        assert!(lines[1].contains("title"));
        assert!(lines[3].contains("Graph Theory"));
        assert!(lines[3].contains("4.5"));
        assert_eq!(lines[5], "rows: 1");
    }

    #[test]
    fn long_lines_are_fitted() {
        let mut t = Table::new(&["feedback"]);
        t.push(vec!["x".repeat(300)]);
        for line in render_table(&t, 40) {
            assert!(visible_len(&line) <= 40, "{}", line);
        }
    }

    #[test]
    fn unreviewed_rating_is_dash() {
        assert_eq!(format_rating(0, 0.0), "-");
        assert_eq!(format_rating(3, 3.666), "3.7");
    }

    #[test]
    fn nanosecond_time_formats() {
        assert_eq!(format_time(1_700_000_000_000_000_000), "2023-11-14 22:13");
    }
}
