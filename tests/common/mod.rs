//! A tiny stand-in for the dashboard: it keeps its own idea of what is selected,
//! rotates the view state on every accepted post and rejects posts that are out
//! of step with it.

#![allow(dead_code)]

use core::time::Duration;
use std::{
    fmt::Write as _,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use vscr::{
    cascade::Navigator,
    error::Result,
    journal::{self, Journal},
    retry::{Backoff, RetryPolicy},
    site::{Field, Layout},
    sink::Store,
    transport::{Reply, Transport},
};

pub const SERVER_SECS: u64 = 1_735_732_800; // 2025-01-01T12:00:00Z

pub type Tree = Vec<(&'static str, Vec<(&'static str, Vec<&'static str>)>)>;

/// Two vehicle types with two makers each, every maker with two years.
/// A label written `NAME#n` is rendered as `NAME` with its own option value.
pub fn tree() -> Tree {
    vec![
        ("2W", vec![("HONDA", vec!["2023", "2024"]), ("TVS", vec!["2023", "2024"])]),
        ("4W", vec![("TATA", vec!["2023", "2024"]), ("MARUTI", vec!["2023", "2024"])]),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    Ok,
    NoViewState,
    Down,
}

pub struct Stub {
    tree: Tree,
    pub landing: Landing,
    /// Leaves whose results refresh always answers 503.
    pub broken: Vec<[&'static str; 3]>,
    /// Leaves whose extra result pages always answer 503.
    pub broken_pages: Vec<[&'static str; 3]>,
    /// `(total rows, page size)` for every results table.
    pub paged: Option<(usize, usize)>,
    /// Offered under every year when non-empty; the year change then renders `monthPnl`.
    pub months: Vec<&'static str>,
    /// Vehicle types whose change renders no manufacturer dropdown.
    pub missing_makers: Vec<&'static str>,
    /// Manufacturers whose change always answers 503.
    pub down_makers: Vec<&'static str>,
    /// The server drops the view when it receives this many posts (1-based).
    pub expire_on_post: Option<usize>,
    pub gets: usize,
    pub posts: Vec<Vec<(String, String)>>,
    token: usize,
    vehicle_type: Option<String>,
    manufacturer: Option<String>,
    year: Option<String>,
    month: Option<String>,
}

pub fn value<'a>(form: &'a [(String, String)], name: &str) -> Option<&'a str> {
    form.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
}

fn code(label: &str) -> String {
    format!("v:{label}")
}

fn label(value: Option<&str>) -> Option<&str> {
    value.and_then(|v| v.strip_prefix("v:"))
}

fn shown(label: &str) -> &str {
    label.split('#').next().unwrap_or(label)
}

fn options(id: &str, labels: impl IntoIterator<Item = &'static str>) -> String {
    let mut html = format!(r#"<select id="{id}" name="{id}"><option value="">-- Select --</option>"#);
    for l in labels {
        let _ = write!(html, r#"<option value="{}">{}</option>"#, code(l), shown(l));
    }
    html.push_str("</select>");
    html
}

impl Stub {
    pub fn new() -> Self {
        Self::with_tree(tree())
    }

    pub fn with_tree(tree: Tree) -> Self {
        Self {
            tree,
            landing: Landing::Ok,
            broken: Vec::new(),
            broken_pages: Vec::new(),
            paged: None,
            months: Vec::new(),
            missing_makers: Vec::new(),
            down_makers: Vec::new(),
            expire_on_post: None,
            gets: 0,
            posts: Vec::new(),
            token: 0,
            vehicle_type: None,
            manufacturer: None,
            year: None,
            month: None,
        }
    }

    pub fn posts_from(&self, source: &str) -> impl Iterator<Item = &Vec<(String, String)>> {
        let source = source.to_owned();
        self.posts
            .iter()
            .filter(move |f| value(f, "javax.faces.source") == Some(source.as_str()))
    }

    fn date() -> Option<SystemTime> {
        Some(UNIX_EPOCH + Duration::from_secs(SERVER_SECS))
    }

    fn reply(&mut self, id: &str, content: &str) -> Reply {
        self.token += 1;
        Reply {
            status: 200,
            date: Self::date(),
            body: format!(
                "<?xml version='1.0' encoding='UTF-8'?>\n<partial-response id=\"j_id1\"><changes>\
                 <update id=\"{id}\"><![CDATA[{content}]]></update>\
                 <update id=\"j_id1:javax.faces.ViewState:0\"><![CDATA[vs-{}]]></update>\
                 </changes></partial-response>",
                self.token
            ),
        }
    }

    fn unavailable() -> Reply {
        Reply { status: 503, date: Self::date(), body: "<html>Service Unavailable</html>".to_owned() }
    }

    fn expired() -> Reply {
        Reply {
            status: 200,
            date: Self::date(),
            body: "<partial-response><error><error-name>javax.faces.application.ViewExpiredException</error-name>\
                   <error-message><![CDATA[out of step]]></error-message></error></partial-response>"
                .to_owned(),
        }
    }

    fn makers(&self, vt: &str) -> Vec<(&'static str, Vec<&'static str>)> {
        self.tree.iter().find(|(v, _)| *v == vt).map(|(_, m)| m.clone()).unwrap_or_default()
    }

    fn leaf(&self) -> Option<Vec<String>> {
        let mut leaf = vec![self.vehicle_type.clone()?, self.manufacturer.clone()?, self.year.clone()?];
        if !self.months.is_empty() {
            leaf.push(self.month.clone()?);
        }
        Some(leaf)
    }

    fn rows(leaf: &[String], range: core::ops::Range<usize>) -> String {
        range
            .map(|i| format!("<tr role=\"row\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>", i + 1, leaf[1], leaf[2], 1000 + i))
            .collect()
    }

    fn table(&self, leaf: &[String]) -> String {
        let (total, size) = self.paged.unwrap_or((1, 0));
        let shown = if size == 0 { total } else { size.min(total) };
        let script = if size == 0 {
            String::new()
        } else {
            format!(
                "<script>PrimeFaces.cw(\"DataTable\",\"widget_groupingTable\",{{id:\"groupingTable\",paginator:{{rows:{size},rowCount:{total},page:0}}}});</script>"
            )
        };
        format!(
            "<div id=\"groupingTable\" class=\"ui-datatable\"><span>{}</span><table><thead><tr>\
             <th role=\"columnheader\">S No</th><th role=\"columnheader\">Maker</th>\
             <th role=\"columnheader\">Year</th><th role=\"columnheader\">TOTAL</th>\
             </tr></thead><tbody id=\"groupingTable_data\">{}</tbody></table>{script}</div>",
            leaf[0],
            Self::rows(leaf, 0..shown)
        )
    }

    fn is_broken(list: &[[&str; 3]], leaf: &[String]) -> bool {
        list.iter().any(|b| b.iter().zip(leaf).all(|(a, b)| *a == b))
    }
}

impl Transport for Stub {
    async fn get(&mut self, _url: &str) -> Result<Reply> {
        self.gets += 1;
        self.token = 0;
        self.vehicle_type = None;
        self.manufacturer = None;
        self.year = None;
        self.month = None;
        let body = match self.landing {
            Landing::Down => return Ok(Self::unavailable()),
            Landing::Ok => format!(
                r#"<html><body><form id="masterLayout_formlogin" method="post">
                <input type="hidden" name="masterLayout_formlogin" value="masterLayout_formlogin"/>
                <div id="yaxisVar" class="ui-selectonemenu">{}</div>
                <input type="hidden" name="javax.faces.ViewState" id="j_id1:javax.faces.ViewState:0" value="vs-0"/>
                </form></body></html>"#,
                options("yaxisVar_input", self.tree.iter().map(|(vt, _)| *vt))
            ),
            Landing::NoViewState => r#"<html><body><form id="f"><select id="yaxisVar_input"></select></form></body></html>"#.to_owned(),
        };
        Ok(Reply { status: 200, date: Self::date(), body })
    }

    async fn post(&mut self, _url: &str, form: &[(String, String)]) -> Result<Reply> {
        self.posts.push(form.to_vec());
        if self.expire_on_post == Some(self.posts.len()) {
            self.token = usize::MAX;
            return Ok(Self::expired());
        }
        if value(form, "javax.faces.ViewState") != Some(&*format!("vs-{}", self.token)) {
            return Ok(Self::expired());
        }

        let vt = label(value(form, "yaxisVar_input")).map(str::to_owned);
        let mf = label(value(form, "xaxisVar_input")).map(str::to_owned);
        let yr = label(value(form, "selectedYear_input")).map(str::to_owned);
        let mo = label(value(form, "selectedMonth_input")).map(str::to_owned);

        match value(form, "javax.faces.source").unwrap_or_default() {
            "yaxisVar" => {
                let Some(vt) = vt else { return Ok(Self::expired()) };
                let makers = self.makers(&vt).into_iter().map(|(m, _)| m).collect::<Vec<_>>();
                let missing = self.missing_makers.iter().any(|m| *m == vt);
                self.vehicle_type = Some(vt);
                self.manufacturer = None;
                self.year = None;
                self.month = None;
                let html = if missing { r#"<div id="xaxisVar"></div>"#.to_owned() } else { options("xaxisVar_input", makers) };
                Ok(self.reply("xaxisVar", &html))
            }
            "xaxisVar" => {
                if vt != self.vehicle_type {
                    return Ok(Self::expired());
                }
                let Some(mf) = mf else { return Ok(Self::expired()) };
                if self.down_makers.iter().any(|m| *m == mf) {
                    return Ok(Self::unavailable());
                }
                let years = self
                    .makers(vt.as_deref().unwrap_or_default())
                    .into_iter()
                    .find(|(m, _)| *m == mf)
                    .map(|(_, y)| y)
                    .unwrap_or_default();
                self.manufacturer = Some(mf);
                self.year = None;
                self.month = None;
                let html = options("selectedYear_input", years);
                Ok(self.reply("multipleYear", &html))
            }
            "selectedYear" => {
                if vt != self.vehicle_type || mf != self.manufacturer {
                    return Ok(Self::expired());
                }
                self.year = yr;
                self.month = None;
                if self.months.is_empty() {
                    return Ok(self.reply("selectedYear", "<span/>"));
                }
                let html = options("selectedMonth_input", self.months.clone());
                Ok(self.reply("monthPnl", &html))
            }
            "selectedMonth" => {
                if vt != self.vehicle_type || mf != self.manufacturer || yr != self.year {
                    return Ok(Self::expired());
                }
                self.month = mo;
                Ok(self.reply("selectedMonth", "<span/>"))
            }
            "j_idt66" => {
                let sent = [&vt, &mf, &yr, &mo];
                let Some(leaf) = self.leaf().filter(|l| l.iter().zip(sent).all(|(b, a)| a.as_deref() == Some(b.as_str())))
                else {
                    return Ok(Self::expired());
                };
                if Self::is_broken(&self.broken, &leaf) {
                    return Ok(Self::unavailable());
                }
                let html = self.table(&leaf);
                Ok(self.reply("combTablePnl", &html))
            }
            "groupingTable" => {
                let Some(leaf) = self.leaf() else { return Ok(Self::expired()) };
                if Self::is_broken(&self.broken_pages, &leaf) {
                    return Ok(Self::unavailable());
                }
                let first: usize = value(form, "groupingTable_first").and_then(|v| v.parse().ok()).unwrap_or(0);
                let rows: usize = value(form, "groupingTable_rows").and_then(|v| v.parse().ok()).unwrap_or(0);
                let total = self.paged.map_or(0, |(t, _)| t);
                let html = format!(
                    "<table><tbody id=\"groupingTable_data\">{}</tbody></table>",
                    Self::rows(&leaf, first.min(total)..(first + rows).min(total))
                );
                Ok(self.reply("groupingTable", &html))
            }
            _ => Ok(Self::expired()),
        }
    }
}

pub fn quick() -> RetryPolicy {
    RetryPolicy { max_attempts: 3, backoff: Backoff::Fixed(Duration::ZERO) }
}

/// The default layout with a month dropdown rendered by the year change.
pub fn monthly() -> Layout {
    let mut layout = Layout::default();
    layout.year = Field::new("selectedYear", "monthPnl");
    layout.month = Some(Field::new("selectedMonth", "selectedMonth"));
    layout
}

pub fn navigator(stub: Stub, dir: &Path) -> Navigator<Stub, Store> {
    navigator_with(stub, Layout::default(), dir)
}

pub fn navigator_with(stub: Stub, layout: Layout, dir: &Path) -> Navigator<Stub, Store> {
    let store = Store::open(dir).unwrap();
    let journal = Journal::open(dir.join(journal::FILE_NAME)).unwrap();
    Navigator::new(stub, layout, store, journal, quick())
}
