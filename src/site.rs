//! Where the target application keeps its components, and how to talk to them.
//!
//! The built-in layout is the VAHAN dashboard report view. Another deployment of
//! the same report (or a reshuffled component tree) can be described in JSON and
//! loaded with [`Layout::load`].

use std::{fs, path::Path};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    options::Choice,
    path::Level,
    state::{Session, VIEW_STATE},
};

pub const ENDPOINT: &str = "https://vahan.parivahan.gov.in/vahan4dashboard/vahan/view/reportview.xhtml";

/// A dependent dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Component id posted as `javax.faces.source`.
    pub source: CompactString,
    /// Name/id of the `<select>` carrying the value.
    pub input: CompactString,
    /// Components re-rendered by a change; the next level's dropdown lives in one of them.
    pub render: CompactString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<CompactString>,
}

impl Field {
    pub fn new(source: &str, render: &str) -> Self {
        Self {
            source: source.into(),
            input: format!("{source}_input").into(),
            render: render.into(),
            execute: None,
        }
    }
}

/// The button that re-renders the results panel for the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refresh {
    pub source: CompactString,
    pub execute: CompactString,
    pub render: CompactString,
    #[serde(default)]
    pub extra: Vec<(CompactString, CompactString)>,
}

/// A paginated PrimeFaces data table inside the results panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub table: CompactString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub endpoint: String,
    /// Inputs held at one value for the whole run.
    #[serde(default)]
    pub fixed: Vec<(CompactString, CompactString)>,
    pub vehicle_type: Field,
    pub manufacturer: Field,
    pub year: Field,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<Refresh>,
    /// Candidate update ids for the results, in preference order.
    pub panels: Vec<CompactString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
}

/// One `javax.faces.partial` request, minus the session and selections.
#[derive(Debug, Clone, Copy)]
pub struct Ajax<'a> {
    pub source: &'a str,
    pub execute: &'a str,
    pub render: &'a str,
    pub extra: &'a [(CompactString, CompactString)],
}

impl Default for Layout {
    fn default() -> Self {
        let pair = |k: &str, v: &str| (CompactString::from(k), CompactString::from(v));
        Self {
            endpoint: ENDPOINT.to_owned(),
            fixed: vec![
                pair("j_idt26_input", "A"),
                pair("j_idt34_input", "-1"),
                pair("selectedRto_input", "-1"),
                pair("selectedYearType_input", "C"),
            ],
            vehicle_type: Field::new("yaxisVar", "xaxisVar"),
            manufacturer: Field::new("xaxisVar", "multipleYear"),
            year: Field::new("selectedYear", "selectedYear"),
            month: None,
            refresh: Some(Refresh {
                source: "j_idt66".into(),
                execute: "@all".into(),
                render: "combTablePnl groupingTable msg".into(),
                extra: vec![pair("j_idt66", "j_idt66"), pair("groupingTable_scrollState", "0,0")],
            }),
            panels: vec!["combTablePnl".into(), "groupingTable".into()],
            paging: Some(Paging { table: "groupingTable".into() }),
        }
    }
}

impl Layout {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Configured levels, outermost first. Month only when the site has one.
    pub fn levels(&self) -> Vec<(Level, Field)> {
        let mut levels = vec![
            (Level::VehicleType, self.vehicle_type.clone()),
            (Level::Manufacturer, self.manufacturer.clone()),
            (Level::Year, self.year.clone()),
        ];
        if let Some(month) = &self.month {
            levels.push((Level::Month, month.clone()));
        }
        levels
    }

    pub const fn field(&self, level: Level) -> Option<&Field> {
        match level {
            Level::VehicleType => Some(&self.vehicle_type),
            Level::Manufacturer => Some(&self.manufacturer),
            Level::Year => Some(&self.year),
            Level::Month => self.month.as_ref(),
        }
    }

    /// Form body for `ajax`, carrying the session, the fixed inputs and every selection made so far.
    pub fn form(&self, session: &Session, chosen: &[(Level, Choice)], ajax: Ajax) -> Result<Vec<(String, String)>> {
        let form_id = session.form_id();
        let mut params = vec![
            ("javax.faces.partial.ajax".to_owned(), "true".to_owned()),
            ("javax.faces.source".to_owned(), ajax.source.to_owned()),
            ("javax.faces.partial.execute".to_owned(), ajax.execute.to_owned()),
            ("javax.faces.partial.render".to_owned(), ajax.render.to_owned()),
            (form_id.to_owned(), form_id.to_owned()),
        ];
        for (name, value) in session.hidden() {
            set(&mut params, name, value);
        }

        let mut inputs: Vec<(&str, &str)> = self.fixed.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        for (level, choice) in chosen {
            if let Some(field) = self.field(*level) {
                inputs.push((field.input.as_str(), choice.value.as_str()));
            }
        }
        for (name, value) in &inputs {
            set(&mut params, name, value);
        }
        for field in Level::ALL.iter().filter_map(|l| self.field(*l)) {
            if let Some(focus) = field.input.strip_suffix("_input") {
                set(&mut params, &format!("{focus}_focus"), "");
            }
        }
        for (name, _) in &self.fixed {
            if let Some(focus) = name.strip_suffix("_input") {
                set(&mut params, &format!("{focus}_focus"), "");
            }
        }

        for (name, value) in ajax.extra {
            set(&mut params, name, value);
        }
        set(&mut params, VIEW_STATE, session.current()?);
        Ok(params)
    }
}

fn set(params: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(existing) = params.iter_mut().find(|(n, _)| n == name) {
        value.clone_into(&mut existing.1);
    } else {
        params.push((name.to_owned(), value.to_owned()));
    }
}
