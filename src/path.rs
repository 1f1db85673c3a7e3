use core::fmt;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Cascade depth, in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    VehicleType,
    Manufacturer,
    Year,
    Month,
}

impl Level {
    pub const ALL: [Self; 4] = [Self::VehicleType, Self::Manufacturer, Self::Year, Self::Month];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VehicleType => "vehicle type",
            Self::Manufacturer => "manufacturer",
            Self::Year => "year",
            Self::Month => "month",
        })
    }
}

/// Position in the cascade: the labels chosen so far, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionPath(Vec<CompactString>);

impl SelectionPath {
    #[inline]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    /// Parses a `2W/HONDA/2023` style hint. Blank segments are dropped.
    pub fn parse(hint: &str) -> Self {
        Self(
            hint.split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(CompactString::from)
                .collect(),
        )
    }

    #[must_use]
    pub fn child(&self, label: &str) -> Self {
        let mut labels = self.0.clone();
        labels.push(label.into());
        Self(labels)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn labels(&self) -> &[CompactString] {
        &self.0
    }

    pub fn get(&self, level: Level) -> Option<&str> {
        self.0.get(level.index()).map(CompactString::as_str)
    }

    /// Identity used by the sink's index.
    pub fn key(&self) -> String {
        self.0.join("\u{1f}")
    }

    /// `<vehicleType>_<manufacturer>_<year>[_<month>]`, whitespace and path separators as `_`.
    pub fn file_stem(&self) -> String {
        self.0
            .iter()
            .map(|label| {
                label
                    .trim()
                    .chars()
                    .map(|c| {
                        if c.is_whitespace() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                            '_'
                        } else {
                            c
                        }
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for SelectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        f.write_str(&self.0.join(" / "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names() {
        let path = SelectionPath::new(["Two Wheeler", "HERO MOTOCORP LTD", "2023"]);
        assert_eq!(path.file_stem(), "Two_Wheeler_HERO_MOTOCORP_LTD_2023");

        let path = path.child("JAN");
        assert_eq!(path.file_stem(), "Two_Wheeler_HERO_MOTOCORP_LTD_2023_JAN");

        let path = SelectionPath::new(["LMV/HMV", "TATA", "2024"]);
        assert_eq!(path.file_stem(), "LMV_HMV_TATA_2024");
    }

    #[test]
    fn levels_and_hints() {
        let path = SelectionPath::parse(" 2W / HONDA //2023");
        assert_eq!(path.depth(), 3);
        assert_eq!(path.get(Level::Manufacturer), Some("HONDA"));
        assert_eq!(path.get(Level::Month), None);
        assert_eq!(path.to_string(), "2W / HONDA / 2023");
        assert_ne!(path.key(), SelectionPath::new(["2W", "HONDA2023"]).key());
    }
}
