//! PrimeFaces data tables inside a results panel.
//!
//! Scrollable tables render their header and body as two separate `<table>`s, and
//! the month-wise maker report often ships with blank header cells, so headers are
//! inferred from the first data row when the markup has none.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::util::clean_text;

pub const MONTHS: [&str; 12] = ["JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC"];

/// `1..=12` for a month label such as `JAN`, `January` or `01`.
pub fn month_number(label: &str) -> Option<u32> {
    let label = label.trim();
    if let Ok(n) = label.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let prefix = label.get(..3)?.to_ascii_uppercase();
    MONTHS.iter().position(|m| *m == prefix).and_then(|i| u32::try_from(i + 1).ok())
}

static SEL_DATA_BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"tbody[id$="_data"]"#).unwrap());
static SEL_BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tbody").unwrap());
static SEL_HEAD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("thead").unwrap());
static SEL_ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static SEL_CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td, th").unwrap());
static SEL_COLUMN_HEADER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"th[role="columnheader"], td[role="columnheader"]"#).unwrap());

static ROW_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"rowCount:\s*(\d+)").unwrap());
static PAGE_SIZE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\brows:\s*(\d+)").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || b == b',')
}

/// Cell text with whitespace collapsed and thousands separators dropped from plain numbers.
pub fn clean_cell(raw: &str) -> String {
    let text = clean_text([raw]);
    if is_number(&text) { text.replace(',', "") } else { text }
}

fn cells(row: ElementRef) -> Vec<String> {
    row.select(&SEL_CELL).map(|c| clean_cell(&c.text().collect::<String>())).collect()
}

fn rows_of(html: &Html) -> Vec<Vec<String>> {
    let (body, data) = match html.select(&SEL_DATA_BODY).next() {
        Some(body) => (body, true),
        None => match html.select(&SEL_BODY).next() {
            Some(body) => (body, false),
            None => return Vec::new(),
        },
    };

    let all: Vec<ElementRef> = body.select(&SEL_ROW).collect();
    let marked = data && all.iter().any(|tr| tr.attr("role") == Some("row"));
    all.into_iter()
        .filter(|tr| !marked || tr.attr("role") == Some("row"))
        .map(cells)
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect()
}

fn headers_of(html: &Html) -> Vec<String> {
    let Some(head) = html.select(&SEL_HEAD).next() else {
        return Vec::new();
    };
    let marked: Vec<String> = head
        .select(&SEL_COLUMN_HEADER)
        .map(|c| clean_cell(&c.text().collect::<String>()))
        .collect();
    if !marked.is_empty() {
        return marked;
    }
    head.select(&SEL_ROW)
        .max_by_key(|tr| tr.select(&SEL_CELL).count())
        .map(cells)
        .unwrap_or_default()
}

/// `S No, Maker, <months>, TOTAL` when the first row looks like the maker month-wise report.
fn infer_headers(first: &[String]) -> Option<Vec<String>> {
    if first.len() < 5 || !first[0].bytes().all(|b| b.is_ascii_digit()) || is_number(&first[1]) {
        return None;
    }
    let months = if first.len() >= 14 { MONTHS.len() } else { first.len() - 3 };
    let mut headers = vec!["S No".to_owned(), "Maker".to_owned()];
    headers.extend(MONTHS[..months].iter().map(|m| (*m).to_owned()));
    headers.push("TOTAL".to_owned());
    Some(headers)
}

/// Body rows of a (possibly partial) table fragment, as a pagination request returns them.
pub fn body_rows(fragment: &str) -> Vec<Vec<String>> {
    rows_of(&Html::parse_fragment(fragment))
}

impl Table {
    pub fn parse(fragment: &str) -> Self {
        let html = Html::parse_fragment(fragment);
        let rows = rows_of(&html);
        let mut headers = headers_of(&html);
        if headers.iter().all(String::is_empty) {
            headers = rows.first().and_then(|first| infer_headers(first)).unwrap_or_default();
        }

        let mut table = Self { headers, rows: Vec::new() };
        if table.headers.is_empty() {
            let width = rows.iter().map(Vec::len).max().unwrap_or(0);
            table.headers = (0..width).map(|i| format!("col_{i}")).collect();
        }
        table.extend(rows);
        table
    }

    /// Appends rows, padded or cut to the header width.
    pub fn extend(&mut self, rows: impl IntoIterator<Item = Vec<String>>) {
        let width = self.headers.len();
        self.rows.extend(rows.into_iter().map(|mut row| {
            row.resize(width, String::new());
            row
        }));
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Row totals from a data table's widget script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub row_count: Option<usize>,
    pub page_size: Option<usize>,
}

impl PageMeta {
    pub fn parse(fragment: &str) -> Self {
        let number = |re: &Regex| re.captures(fragment).and_then(|c| c[1].parse().ok());
        Self {
            row_count: number(&ROW_COUNT),
            page_size: number(&PAGE_SIZE),
        }
    }

    /// `first` offsets of the pages still to fetch when `have` rows came with the first one.
    pub fn remaining(&self, have: usize) -> Vec<usize> {
        let (Some(total), Some(size)) = (self.row_count, self.page_size) else {
            return Vec::new();
        };
        if size == 0 || total <= have {
            return Vec::new();
        }
        (1..total.div_ceil(size)).map(|page| page * size).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_labels() {
        assert_eq!(month_number("JAN"), Some(1));
        assert_eq!(month_number("September"), Some(9));
        assert_eq!(month_number(" 03 "), Some(3));
        assert_eq!(month_number("13"), None);
        assert_eq!(month_number("TOTAL"), None);
    }

    #[test]
    fn explicit_column_headers() {
        let html = r#"<div id="groupingTable" class="ui-datatable">
            <table><thead id="groupingTable_head"><tr>
                <th role="columnheader"><span>S No</span></th><th role="columnheader">Maker</th><th role="columnheader">TOTAL</th>
            </tr></thead>
            <tbody id="groupingTable_data">
                <tr role="row"><td>1</td><td>HERO&nbsp;MOTOCORP  LTD</td><td>1,23,456</td></tr>
                <tr role="row"><td>2</td><td>HONDA</td><td>98,765</td><td>extra</td></tr>
                <tr class="ui-datatable-empty-message"><td>nothing</td></tr>
            </tbody></table></div>"#;
        let table = Table::parse(html);
        assert_eq!(table.headers, ["S No", "Maker", "TOTAL"]);
        assert_eq!(table.rows, [["1", "HERO MOTOCORP LTD", "123456"], ["2", "HONDA", "98765"]]);
    }

    #[test]
    fn infers_month_wise_headers() {
        let mut row = vec!["<td>1</td>".to_owned(), "<td>BAJAJ AUTO</td>".to_owned()];
        row.extend((1..=13).map(|n| format!("<td>{n},000</td>")));
        let html = format!(
            "<table><thead><tr><th></th><th></th></tr></thead><tbody id=\"t_data\"><tr role=\"row\">{}</tr></tbody></table>",
            row.concat()
        );
        let table = Table::parse(&html);
        assert_eq!(table.headers.len(), 15);
        assert_eq!(table.headers[2], "JAN");
        assert_eq!(table.headers[14], "TOTAL");
        assert_eq!(table.rows[0][2], "1000");

        let partial = "<table><tbody><tr><td>1</td><td>TVS</td><td>5</td><td>6</td><td>11</td></tr></tbody></table>";
        assert_eq!(Table::parse(partial).headers, ["S No", "Maker", "JAN", "FEB", "TOTAL"]);
    }

    #[test]
    fn falls_back_to_positional_names() {
        let table = Table::parse("<table><tbody><tr><td>a</td></tr><tr><td>b</td><td>c</td></tr></tbody></table>");
        assert_eq!(table.headers, ["col_0", "col_1"]);
        assert_eq!(table.rows, [["a", ""], ["b", "c"]]);
        assert!(Table::parse("<div>no table</div>").is_empty());
    }

    #[test]
    fn pagination_meta() {
        let script = "PrimeFaces.cw(\"DataTable\",\"widget_groupingTable\",{id:\"groupingTable\",paginator:{rows:25,rowCount:60,page:0}});";
        let meta = PageMeta::parse(script);
        assert_eq!(meta, PageMeta { row_count: Some(60), page_size: Some(25) });
        assert_eq!(meta.remaining(25), [25, 50]);
        assert!(meta.remaining(60).is_empty());
        assert!(PageMeta::parse("<table/>").remaining(0).is_empty());
    }
}
