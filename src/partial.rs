//! JSF `<partial-response>` envelopes.
//!
//! A response is a list of `<update id="...">` elements whose content is one or
//! more CDATA sections (or plain escaped text). One of them carries the refreshed
//! view state, the others carry re-rendered components.

use std::sync::LazyLock;

use compact_str::CompactString;
use regex::Regex;

use crate::{
    error::{Error, Result},
    state::VIEW_STATE,
};

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";
const UPDATE_CLOSE: &str = "</update>";

static UPDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<update\s+id\s*=\s*(?:"([^"]*)"|'([^']*)')\s*(/?)>"#).unwrap());
static ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<error>.*?<error-name>(.*?)</error-name>.*?<error-message>(.*?)</error-message>").unwrap()
});
static REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<redirect\s+url\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub id: CompactString,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct PartialResponse {
    updates: Vec<Update>,
}

/// What a results request yields: the panel markup and, if sent, a new view state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub view_state: Option<String>,
    pub fragment: String,
}

impl PartialResponse {
    pub fn parse(body: &str) -> Result<Self> {
        if !body.contains("<partial-response") {
            return Err(Error::NotPartial {
                snippet: body.chars().take(200).collect(),
            });
        }
        if let Some(cap) = ERROR.captures(body) {
            let (name, message) = (text(&cap[1])?, text(&cap[2])?);
            if name.ends_with("ViewExpiredException") {
                return Err(Error::ViewExpired(message));
            }
            return Err(Error::Server { name, message });
        }
        if let Some(cap) = REDIRECT.captures(body) {
            let url = cap.get(1).or_else(|| cap.get(2)).map_or("", |m| m.as_str());
            return Err(Error::Redirected(unescape(url)));
        }

        let mut updates = Vec::new();
        let mut pos = 0;
        while let Some(cap) = UPDATE.captures_at(body, pos) {
            let id = cap.get(1).or_else(|| cap.get(2)).map_or("", |m| m.as_str());
            let end = cap.get(0).map_or(body.len(), |m| m.end());
            if cap.get(3).is_some_and(|m| !m.is_empty()) {
                updates.push(Update { id: unescape(id).into(), content: String::new() });
                pos = end;
                continue;
            }
            let (content, used) = content(&body[end..])?;
            updates.push(Update { id: unescape(id).into(), content });
            pos = end + used;
        }

        Ok(Self { updates })
    }

    #[inline]
    pub fn updates(&self) -> &[Update] {
        &self.updates
    }

    /// Update content for a component id. Ids may come back prefixed by their naming container.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.updates
            .iter()
            .find(|u| u.id == id || u.id.strip_suffix(id).is_some_and(|p| p.ends_with(':')))
            .map(|u| &*u.content)
    }

    pub fn view_state(&self) -> Option<&str> {
        self.updates
            .iter()
            .find(|u| u.id.contains(VIEW_STATE))
            .map(|u| u.content.trim())
            .filter(|t| !t.is_empty())
    }

    /// First non-empty panel among `ids`, in preference order.
    pub fn panel<S: AsRef<str>>(&self, ids: &[S]) -> Result<&str> {
        ids.iter()
            .filter_map(|id| self.get(id.as_ref()))
            .find(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::FragmentNotFound {
                wanted: ids.iter().map(|id| id.as_ref().into()).collect(),
                found: self.updates.iter().map(|u| u.id.clone()).collect(),
            })
    }

    pub fn extract<S: AsRef<str>>(&self, ids: &[S]) -> Result<Extracted> {
        Ok(Extracted {
            view_state: self.view_state().map(str::to_owned),
            fragment: self.panel(ids)?.to_owned(),
        })
    }
}

/// Parses `body` and pulls the named panel out of it.
pub fn extract<S: AsRef<str>>(body: &str, ids: &[S]) -> Result<Extracted> {
    PartialResponse::parse(body)?.extract(ids)
}

/// Reads element content up to and including `</update>`.
fn content(rest: &str) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut i = 0;
    loop {
        let tail = &rest[i..];
        if let Some(inner) = tail.strip_prefix(CDATA_OPEN) {
            let end = inner.find(CDATA_CLOSE).ok_or(Error::Malformed("unterminated CDATA section"))?;
            out.push_str(&inner[..end]);
            i += CDATA_OPEN.len() + end + CDATA_CLOSE.len();
        } else if tail.starts_with(UPDATE_CLOSE) {
            return Ok((out, i + UPDATE_CLOSE.len()));
        } else if let Some(lt) = tail.find('<') {
            if lt == 0 {
                return Err(Error::Malformed("markup inside update element"));
            }
            let chunk = &tail[..lt];
            if !chunk.trim().is_empty() {
                out.push_str(&unescape(chunk));
            }
            i += lt;
        } else {
            return Err(Error::Malformed("unterminated update element"));
        }
    }
}

/// Element text that may itself be CDATA-wrapped.
fn text(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.starts_with(CDATA_OPEN) {
        let mut wrapped = String::with_capacity(raw.len() + UPDATE_CLOSE.len());
        wrapped.push_str(raw);
        wrapped.push_str(UPDATE_CLOSE);
        return content(&wrapped).map(|(s, _)| s);
    }
    Ok(unescape(raw))
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else { break };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        if let Some(c) = decoded {
            out.push(c);
            rest = &rest[semi + 1..];
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}
