use std::{collections::HashMap, sync::LazyLock};

use compact_str::{CompactString, format_compact};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    partial::PartialResponse,
    util::clean_text,
};

static SEL_SELECT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("select[id]").unwrap());
static SEL_OPTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("option").unwrap());

/// One dropdown entry, as rendered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: CompactString,
    pub label: CompactString,
}

impl Choice {
    pub fn new(value: impl Into<CompactString>, label: impl Into<CompactString>) -> Self {
        Self { value: value.into(), label: label.into() }
    }

    /// The label, or the value for an option rendered without text.
    pub fn name(&self) -> &str {
        if self.label.is_empty() { &self.value } else { &self.label }
    }

    /// Matches a user-supplied label or value, ignoring case.
    pub fn matches(&self, needle: &str) -> bool {
        self.label.eq_ignore_ascii_case(needle) || self.value.eq_ignore_ascii_case(needle)
    }
}

fn is_placeholder(value: &str, label: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let label = label.trim_start_matches(['-', ' ']).to_ascii_lowercase();
    label.starts_with("select")
}

fn collect(select: ElementRef) -> Vec<Choice> {
    select
        .select(&SEL_OPTION)
        .filter_map(|opt| {
            let value = opt.attr("value")?.trim();
            let label = clean_text(opt.text());
            (!is_placeholder(value, &label)).then(|| Choice::new(value, label))
        })
        .collect()
}

/// Options of the `<select id=select_id>` in `html`, in document order.
pub fn from_document(html: &Html, select_id: &str) -> Result<Vec<Choice>> {
    html.select(&SEL_SELECT)
        .find(|s| s.attr("id") == Some(select_id))
        .map(collect)
        .ok_or_else(|| Error::OptionParse { field: select_id.into() })
}

/// Path label of each choice. A label offered more than once among siblings
/// is qualified with the option value, `ACME (m2)`, so no two siblings share a path.
pub fn names(choices: &[Choice]) -> Vec<CompactString> {
    let mut seen = HashMap::<&str, usize>::new();
    for choice in choices {
        *seen.entry(choice.name()).or_default() += 1;
    }
    choices
        .iter()
        .map(|choice| {
            let name = choice.name();
            if seen.get(name).copied().unwrap_or_default() > 1 && name != choice.value {
                tracing::warn!(target: "options", "label {name:?} is offered more than once, keeping {:?} apart by value", choice.value);
                format_compact!("{name} ({})", choice.value)
            } else {
                name.into()
            }
        })
        .collect()
}

/// Looks for the dropdown in every re-rendered component of `resp`.
pub fn from_response(resp: &PartialResponse, select_id: &str) -> Result<Vec<Choice>> {
    for update in resp.updates() {
        if !update.content.contains(select_id) {
            continue;
        }
        let fragment = Html::parse_fragment(&update.content);
        if let Ok(choices) = from_document(&fragment, select_id) {
            tracing::debug!(target: "options", "{select_id}: {} choices from {:?}", choices.len(), update.id);
            return Ok(choices);
        }
    }
    Err(Error::OptionParse { field: select_id.into() })
}
