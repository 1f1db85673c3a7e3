//! The single live JSF session: view state token, owning form and its hidden inputs.
//!
//! Every AJAX post echoes this back; every partial response may refresh the token.
//! One navigator owns it for the whole run.

use std::sync::LazyLock;

use compact_str::CompactString;
use scraper::{Html, Selector};

use crate::error::{Error, Result};

pub const VIEW_STATE: &str = "javax.faces.ViewState";

static SEL_FORM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form[id]").unwrap());
static SEL_INPUT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("input[name]").unwrap());

#[derive(Debug, Default)]
pub struct Session {
    token: Option<String>,
    form_id: CompactString,
    hidden: Vec<(String, String)>,
}

impl Session {
    /// Parses the landing page's initial render.
    pub fn from_landing(html: &Html) -> Result<Self> {
        let mut fallback = None;
        for form in html.select(&SEL_FORM) {
            let Some(id) = form.attr("id") else { continue };
            if fallback.is_none() {
                fallback = Some(id);
            }

            let mut token = None;
            let mut hidden = Vec::new();
            for input in form.select(&SEL_INPUT) {
                let Some(name) = input.attr("name").filter(|n| !n.is_empty()) else { continue };
                let value = input.attr("value").unwrap_or_default();
                if name == VIEW_STATE {
                    token = Some(value.to_owned());
                } else if input.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
                    hidden.push((name.to_owned(), value.to_owned()));
                }
            }

            if let Some(token) = token {
                tracing::debug!(target: "session", "form {id:?} owns the view state, {} hidden inputs", hidden.len());
                return Ok(Self { token: Some(token), form_id: id.into(), hidden });
            }
        }

        // Some renders put the state input outside the form it belongs to.
        let token = html
            .select(&SEL_INPUT)
            .find(|input| input.attr("name") == Some(VIEW_STATE))
            .and_then(|input| input.attr("value"))
            .ok_or(Error::MissingViewState)?;
        let form_id = fallback.ok_or(Error::MissingForm)?;
        tracing::warn!(target: "session", "view state input outside any form, assuming {form_id:?}");
        Ok(Self {
            token: Some(token.to_owned()),
            form_id: form_id.into(),
            hidden: Vec::new(),
        })
    }

    pub fn current(&self) -> Result<&str> {
        self.token.as_deref().ok_or(Error::UninitializedState)
    }

    pub fn update(&mut self, token: impl Into<String>) {
        let token = token.into();
        if self.token.as_deref() != Some(&*token) {
            tracing::trace!(target: "session", "view state -> {token:?}");
        }
        self.token = Some(token);
    }

    #[inline]
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    #[inline]
    pub fn hidden(&self) -> &[(String, String)] {
        &self.hidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANDING: &str = r#"<html><body>
        <form id="headerForm"><input type="hidden" name="headerForm" value="headerForm"/></form>
        <form id="masterLayout_formlogin" method="post">
            <input type="hidden" name="masterLayout_formlogin" value="masterLayout_formlogin" />
            <input type="text" name="search" value="x" />
            <input type="hidden" name="javax.faces.ViewState" id="j_id1:javax.faces.ViewState:0" value="-4417:8812" />
        </form>
    </body></html>"#;

    #[test]
    fn reads_owning_form() {
        let session = Session::from_landing(&Html::parse_document(LANDING)).unwrap();
        assert_eq!(session.current().unwrap(), "-4417:8812");
        assert_eq!(session.form_id(), "masterLayout_formlogin");
        assert_eq!(
            session.hidden(),
            [("masterLayout_formlogin".to_owned(), "masterLayout_formlogin".to_owned())]
        );
    }

    #[test]
    fn uninitialized_read_fails() {
        let mut session = Session::default();
        assert!(matches!(session.current(), Err(Error::UninitializedState)));
        session.update("1:2");
        assert_eq!(session.current().unwrap(), "1:2");
    }

    #[test]
    fn missing_view_state() {
        let html = Html::parse_document(r#"<form id="f"><input type="hidden" name="a" value="b"></form>"#);
        assert!(matches!(Session::from_landing(&html), Err(Error::MissingViewState)));
    }
}
