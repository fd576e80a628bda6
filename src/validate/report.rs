use std::collections::BTreeMap;
use std::fmt;

use log::{log, Level};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// The file could not be found or opened.
    FileAccess,
    /// A required keyword is absent.
    Missing,
    /// A keyword holds the wrong value.
    Mismatch,
    /// A keyword was overwritten with the expected value.
    Fixed,
    /// A trailing character was dropped to make the value match.
    Adjusted,
    /// A cube's shape differs from the previous cube's.
    ShapeMismatch,
    /// No HDU carries 3D data.
    NoData,
}

impl FindingKind {
    pub fn level(self) -> Level {
        match self {
            Self::FileAccess | Self::NoData => Level::Error,
            Self::Missing | Self::Mismatch | Self::ShapeMismatch => Level::Warn,
            Self::Fixed | Self::Adjusted => Level::Info,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FileAccess => "file",
            Self::Missing => "missing",
            Self::Mismatch => "mismatch",
            Self::Fixed => "fixed",
            Self::Adjusted => "adjusted",
            Self::ShapeMismatch => "shape",
            Self::NoData => "no data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

/// Findings of one check pass, keyed by extension then by check key.
/// Both levels render in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    front_matter: String,
    extensions: BTreeMap<String, BTreeMap<String, Finding>>,
}

impl ValidationReport {
    pub fn new(filename: &str) -> Self {
        Self {
            front_matter: format!("Checking {filename}"),
            extensions: BTreeMap::new(),
        }
    }

    /// Store a finding and log it at the level its kind implies.
    pub fn record(
        &mut self,
        extension: &str,
        key: &str,
        kind: FindingKind,
        message: impl Into<String>,
    ) {
        let message = message.into();
        log!(kind.level(), "  {extension}: {key} {message}");
        self.extensions
            .entry(extension.to_string())
            .or_default()
            .insert(key.to_string(), Finding { kind, message });
    }

    pub fn front_matter(&self) -> &str {
        &self.front_matter
    }

    pub fn get(&self, extension: &str, key: &str) -> Option<&Finding> {
        self.extensions.get(extension)?.get(key)
    }

    pub fn extensions(&self) -> &BTreeMap<String, BTreeMap<String, Finding>> {
        &self.extensions
    }

    /// Total number of findings.
    pub fn len(&self) -> usize {
        self.extensions.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Multi-line text: front matter, then one section per extension.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.front_matter);
        for (extension, findings) in &self.extensions {
            out.push_str(&format!("{extension}\n"));
            for (key, finding) in findings {
                out.push_str(&format!(
                    "    {key}: [{}] {}\n",
                    finding.kind.label(),
                    finding.message
                ));
            }
        }
        out
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
