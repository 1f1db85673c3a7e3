//! The cascade: land, then select every option of every level in server order.
//!
//! Each selection is a partial-update POST carrying the whole selection so far.
//! The response to selecting level `n` renders the dropdown of level `n + 1`, so
//! dependent options are always read from the response to their parent's change
//! and never reused across siblings. At the last level the results panel is
//! fetched (with any extra pages) and handed to the sink.

use core::time::Duration;
use std::time::SystemTime;

use compact_str::CompactString;
use scraper::Html;

use crate::{
    error::{Error, Result},
    journal::Journal,
    options::{self, Choice},
    partial::PartialResponse,
    path::{Level, SelectionPath},
    retry::{Failure, RetryPolicy},
    site::{Ajax, Field, Layout},
    sink::{ResultRecord, Sink},
    state::Session,
    table::{self, PageMeta},
    transport::{Request, Transport},
    util::stamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    VehicleTypeSelected,
    ManufacturerSelected,
    YearSelected,
    MonthSelected,
    Done,
    /// The last retry round at some level gave up; cleared by the next successful selection.
    Error,
}

impl State {
    pub const fn after(level: Level) -> Self {
        match level {
            Level::VehicleType => Self::VehicleTypeSelected,
            Level::Manufacturer => Self::ManufacturerSelected,
            Level::Year => Self::YearSelected,
            Level::Month => Self::MonthSelected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub written: usize,
    /// Leaves skipped because the sink already had them.
    pub existing: usize,
    pub failures: usize,
    pub state: State,
}

impl Default for RunReport {
    fn default() -> Self {
        Self { written: 0, existing: 0, failures: 0, state: State::Init }
    }
}

type Chosen = [(Level, Choice)];

/// One round trip with the server, keeping the session in step.
struct Exchange<T> {
    transport: T,
    layout: Layout,
    session: Session,
    last: Option<Request>,
    date: Option<SystemTime>,
    /// Set when the server reported the view expired; the next selection lands again first.
    stale: bool,
}

impl<T: Transport> Exchange<T> {
    /// Fetches the landing page and starts a fresh session. Returns the first level's options.
    async fn land(&mut self, first: &str) -> Result<Vec<Choice>> {
        let url = self.layout.endpoint.clone();
        self.last = Some(Request { method: "GET".to_owned(), url: url.clone(), form: Vec::new() });
        let reply = self.transport.get(&url).await?.success()?;
        self.date = reply.date.or(self.date);

        let html = Html::parse_document(&reply.body);
        let session = Session::from_landing(&html)?;
        let choices = options::from_document(&html, first)?;
        self.session = session;
        Ok(choices)
    }

    async fn send(&mut self, form: Vec<(String, String)>) -> Result<PartialResponse> {
        let url = self.layout.endpoint.clone();
        let reply = self.transport.post(&url, &form).await;
        self.last = Some(Request { method: "POST".to_owned(), url, form });
        let reply = reply?.success()?;
        self.date = reply.date.or(self.date);

        let resp = PartialResponse::parse(&reply.body).inspect_err(|e| {
            if matches!(e, Error::ViewExpired(_)) {
                tracing::warn!(target: "cascade", "view expired, the session will be rebuilt");
                self.stale = true;
            }
        })?;
        if let Some(token) = resp.view_state() {
            self.session.update(token);
        }
        Ok(resp)
    }

    /// Lands again and replays every selection of `chosen` but the last.
    async fn rejoin(&mut self, chosen: &Chosen) -> Result<()> {
        let first = self.layout.vehicle_type.input.clone();
        self.land(&first).await?;
        for depth in 1..chosen.len() {
            let Some(field) = self.layout.field(chosen[depth - 1].0).cloned() else {
                continue;
            };
            self.post(&field, &chosen[..depth]).await?;
        }
        tracing::info!(target: "cascade", "session rebuilt, {} selection(s) replayed", chosen.len().saturating_sub(1));
        self.stale = false;
        Ok(())
    }

    async fn rejoin_if_stale(&mut self, chosen: &Chosen) -> Result<()> {
        if self.stale { self.rejoin(chosen).await } else { Ok(()) }
    }

    /// Submits the last entry of `chosen` through `field`.
    async fn select(&mut self, field: &Field, chosen: &Chosen) -> Result<PartialResponse> {
        self.rejoin_if_stale(chosen).await?;
        self.post(field, chosen).await
    }

    async fn post(&mut self, field: &Field, chosen: &Chosen) -> Result<PartialResponse> {
        let ajax = Ajax {
            source: &field.source,
            execute: field.execute.as_deref().unwrap_or(&field.source),
            render: &field.render,
            extra: &[],
        };
        let form = self.layout.form(&self.session, chosen, ajax)?;
        self.send(form).await
    }

    /// Leaf selection, then the results refresh, then the panel.
    async fn results(&mut self, field: &Field, chosen: &Chosen) -> Result<String> {
        let resp = self.select(field, chosen).await?;
        let resp = match &self.layout.refresh {
            Some(refresh) => {
                let ajax = Ajax {
                    source: &refresh.source,
                    execute: &refresh.execute,
                    render: &refresh.render,
                    extra: &refresh.extra,
                };
                let form = self.layout.form(&self.session, chosen, ajax)?;
                self.send(form).await?
            }
            None => resp,
        };
        Ok(resp.panel(&self.layout.panels)?.to_owned())
    }

    async fn page(&mut self, chosen: &Chosen, table: &str, first: usize, rows: usize) -> Result<String> {
        if self.stale {
            // a fresh view is back on page one; the leaf has to be selected again
            self.rejoin(chosen).await?;
            if let Some(field) = chosen.last().and_then(|(level, _)| self.layout.field(*level)).cloned() {
                self.results(&field, chosen).await?;
            }
        }
        let param = |suffix: &str, value: &str| (CompactString::from(format!("{table}_{suffix}")), CompactString::from(value));
        let extra: Vec<(CompactString, CompactString)> = vec![
            (table.into(), table.into()),
            param("pagination", "true"),
            param("first", &first.to_string()),
            param("rows", &rows.to_string()),
            param("skipChildren", "true"),
            param("encodeFeature", "true"),
            param("scrollState", "0,0"),
        ];
        let ajax = Ajax { source: table, execute: table, render: table, extra: &extra };
        let form = self.layout.form(&self.session, chosen, ajax)?;
        let resp = self.send(form).await?;
        Ok(resp.panel(&[table])?.to_owned())
    }
}

pub struct Navigator<T, S> {
    exchange: Exchange<T>,
    levels: Vec<(Level, Field)>,
    sink: S,
    journal: Journal,
    retry: RetryPolicy,
    resume: Option<SelectionPath>,
    page_delay: Duration,
    state: State,
    report: RunReport,
}

impl<T: Transport, S: Sink> Navigator<T, S> {
    pub fn new(transport: T, layout: Layout, sink: S, journal: Journal, retry: RetryPolicy) -> Self {
        Self {
            levels: layout.levels(),
            exchange: Exchange {
                transport,
                layout,
                session: Session::default(),
                last: None,
                date: None,
                stale: false,
            },
            sink,
            journal,
            retry,
            resume: None,
            page_delay: Duration::ZERO,
            state: State::Init,
            report: RunReport::default(),
        }
    }

    /// Skips, along the hinted spine, every option ordered before the hinted one.
    #[must_use]
    pub fn resume_from(mut self, hint: SelectionPath) -> Self {
        self.resume = (hint.depth() > 0).then_some(hint);
        self
    }

    #[must_use]
    pub const fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    #[inline]
    pub const fn state(&self) -> State {
        self.state
    }

    #[inline]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    #[inline]
    pub const fn transport(&self) -> &T {
        &self.exchange.transport
    }

    #[inline]
    pub const fn journal(&self) -> &Journal {
        &self.journal
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        self.state = State::Init;
        self.report = RunReport::default();
        let root = SelectionPath::root();

        let first = self.levels[0].1.input.clone();
        let exchange = &mut self.exchange;
        let landed = self.retry.run(&root, "landing", async |_: u32| exchange.land(&first).await).await;
        let choices = match landed {
            Ok(choices) => choices,
            Err(failure) => {
                let failure = failure.with_request(self.exchange.last.as_ref());
                self.state = State::Error;
                self.journal.record(&failure)?;
                return Err(Error::Fatal(Box::new(failure.cause)));
            }
        };
        tracing::info!(target: "cascade", "session established, {} {} option(s)", choices.len(), Level::VehicleType);

        let resume = self.resume.clone();
        let mut chosen = Vec::with_capacity(self.levels.len());
        self.visit(&mut chosen, &root, choices, resume.as_ref().map(SelectionPath::labels))
            .await?;

        self.state = State::Done;
        self.report.state = State::Done;
        tracing::info!(
            target: "cascade",
            "done: {} written, {} already present, {} failed",
            self.report.written,
            self.report.existing,
            self.report.failures
        );
        Ok(self.report)
    }

    /// Walks `choices`, the options at depth `chosen.len()` under `path`.
    async fn visit(
        &mut self,
        chosen: &mut Vec<(Level, Choice)>,
        path: &SelectionPath,
        choices: Vec<Choice>,
        hint: Option<&[CompactString]>,
    ) -> Result<()> {
        let depth = chosen.len();
        let (level, field) = self.levels[depth].clone();
        let next = self.levels.get(depth + 1).map(|(level, field)| (*level, field.input.clone()));

        let names = options::names(&choices);
        let mut hint = hint.filter(|h| !h.is_empty());
        let mut start = 0;
        if let Some(wanted) = hint.map(|h| &h[0]) {
            let found = choices
                .iter()
                .zip(&names)
                .position(|(c, name)| name.eq_ignore_ascii_case(wanted) || c.matches(wanted));
            if let Some(i) = found {
                if i > 0 {
                    tracing::info!(target: "cascade", "resuming {level} under [{path}] at {wanted:?}, skipping {i}");
                }
                start = i;
            } else {
                tracing::warn!(target: "cascade", "resume hint {wanted:?} not offered for {level} under [{path}], ignoring it");
                hint = None;
            }
        }

        for (i, (choice, name)) in choices.into_iter().zip(names).enumerate().skip(start) {
            let child = path.child(&name);
            let child_hint = hint.filter(|_| i == start).map(|h| &h[1..]);
            chosen.push((level, choice));

            let res = match &next {
                None => self.leaf(&field, chosen, &child).await,
                Some((next_level, input)) => {
                    let exchange = &mut self.exchange;
                    let sel: &Chosen = chosen;
                    let fetched = self
                        .retry
                        .run(&child, "options", async |_: u32| {
                            let resp = exchange.select(&field, sel).await?;
                            options::from_response(&resp, input)
                        })
                        .await;
                    match fetched {
                        Ok(options) => {
                            self.state = State::after(level);
                            if options.is_empty() {
                                tracing::info!(target: "cascade", "[{child}] offers no {next_level} options");
                            }
                            Box::pin(self.visit(chosen, &child, options, child_hint)).await
                        }
                        Err(failure) => self.fail(failure),
                    }
                }
            };

            chosen.pop();
            res?;
        }
        Ok(())
    }

    async fn leaf(&mut self, field: &Field, chosen: &Chosen, path: &SelectionPath) -> Result<()> {
        if self.sink.exists(path) {
            tracing::debug!(target: "cascade", "[{path}] already recorded, skipping");
            self.report.existing += 1;
            return Ok(());
        }

        let exchange = &mut self.exchange;
        let fetched = self
            .retry
            .run(path, "results", async |_: u32| exchange.results(field, chosen).await)
            .await;
        let fragment = match fetched {
            Ok(fragment) => fragment,
            Err(failure) => return self.fail(failure),
        };
        if let Some((level, _)) = chosen.last() {
            self.state = State::after(*level);
        }

        let pages = match self.pages(chosen, path, &fragment).await {
            Ok(pages) => pages,
            Err(failure) => return self.fail(failure),
        };

        let record = ResultRecord::new(path, fragment, pages, stamp(self.exchange.date))?;
        if self.sink.append(record)? {
            self.report.written += 1;
        } else {
            self.report.existing += 1;
        }
        Ok(())
    }

    /// Remaining pages of a paginated results table. Any page failing fails the leaf.
    async fn pages(&mut self, chosen: &Chosen, path: &SelectionPath, fragment: &str) -> Result<Vec<String>, Failure> {
        let Some(paging) = &self.exchange.layout.paging else {
            return Ok(Vec::new());
        };
        let id = paging.table.clone();
        let meta = PageMeta::parse(fragment);
        let offsets = meta.remaining(table::body_rows(fragment).len());
        let Some(size) = meta.page_size.filter(|_| !offsets.is_empty()) else {
            return Ok(Vec::new());
        };
        tracing::debug!(target: "cascade", "[{path}] {} more page(s) of {size}", offsets.len());

        let mut pages = Vec::with_capacity(offsets.len());
        for first in offsets {
            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            let exchange = &mut self.exchange;
            let page = self
                .retry
                .run(path, "page", async |_: u32| exchange.page(chosen, &id, first, size).await)
                .await?;
            if table::body_rows(&page).is_empty() {
                tracing::debug!(target: "cascade", "[{path}] page at row {first} is empty, stopping");
                break;
            }
            pages.push(page);
        }
        Ok(pages)
    }

    fn fail(&mut self, failure: Failure) -> Result<()> {
        let failure = failure.with_request(self.exchange.last.as_ref());
        self.state = State::Error;
        self.report.failures += 1;
        self.journal.record(&failure)
    }
}
