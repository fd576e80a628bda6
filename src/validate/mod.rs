//! Header validation for IFU cube files.
//!
//! A [`HeaderValidator`] runs its registered [`Check`]s in order over a
//! [`FitsFile`], optionally repairing what it can in place. Each check
//! records its findings in a [`ValidationReport`] and may clear the
//! validator's `good` flag; once cleared the flag stays cleared.

pub mod checks;
pub mod report;
pub mod state;

use std::path::{Path, PathBuf};

use log::{debug, info};

pub use checks::{AxisRule, Check, ValidatorConfig};
pub use report::{Finding, FindingKind, ValidationReport};
pub use state::ValidationState;

use crate::data::filter::is_cube;
use crate::data::loader::load_file;
use crate::error::FileAccessError;
use crate::fits::{FitsFile, Header, HeaderValue, KeywordProvider};

/// Value materialized for an absent axis keyword.
pub const MISSING_VALUE: &str = "NONE";

// ---------------------------------------------------------------------------
// HeaderValidator
// ---------------------------------------------------------------------------

pub struct HeaderValidator<'a> {
    fits: &'a mut FitsFile,
    filename: String,
    state: ValidationState,
    checks: Vec<Check>,
}

impl<'a> HeaderValidator<'a> {
    pub fn new(fits: &'a mut FitsFile, filename: impl Into<String>) -> Self {
        Self::with_config(fits, filename, &ValidatorConfig::default())
    }

    pub fn with_config(
        fits: &'a mut FitsFile,
        filename: impl Into<String>,
        config: &ValidatorConfig,
    ) -> Self {
        let filename = filename.into();
        Self {
            fits,
            state: ValidationState::new(&filename),
            filename,
            checks: checks::registry(config),
        }
    }

    /// Run every registered check. With `fix` set, repairable problems are
    /// written back into the file's headers.
    pub fn check(&mut self, fix: bool) -> &FitsFile {
        info!("Checking {} (fix: {fix})", self.filename);
        let ids = extension_ids(&*self.fits);
        let checks = std::mem::take(&mut self.checks);
        for check in &checks {
            debug!("running {} check", check.name());
            match check {
                Check::ExtensionName => self.check_extension_names(fix, &ids),
                Check::Data => self.check_data(fix, &ids),
                Check::AxisKeywords(rules) => self.check_axis_keywords(rules, fix, &ids),
            }
        }
        self.checks = checks;
        &*self.fits
    }

    pub fn good_check(&mut self, outcome: bool) {
        self.state.good_check(outcome);
    }

    pub fn is_good(&self) -> bool {
        self.state.is_good()
    }

    pub fn report(&self) -> &ValidationReport {
        self.state.report()
    }

    pub fn into_report(self) -> ValidationReport {
        self.state.into_report()
    }

    // -- checks --------------------------------------------------------------

    fn check_extension_names(&mut self, fix: bool, ids: &[String]) {
        for (index, hdu) in self.fits.hdus_mut().iter_mut().enumerate() {
            if hdu.header().contains("EXTNAME") {
                continue;
            }
            if fix {
                let name = format!("{}_{index}", self.filename);
                hdu.header_mut().set("EXTNAME", name.as_str());
                self.state.record(
                    &ids[index],
                    "EXTNAME",
                    FindingKind::Fixed,
                    format!("was missing, set to '{name}'"),
                );
            } else {
                self.state.good_check(false);
                self.state
                    .record(&ids[index], "EXTNAME", FindingKind::Missing, "is missing");
            }
        }
    }

    /// Cubes must exist; differing shapes are reported but tolerated.
    fn check_data(&mut self, fix: bool, ids: &[String]) {
        let mut previous: Option<Vec<usize>> = None;
        for (index, hdu) in self.fits.iter().enumerate() {
            let Some(shape) = hdu.shape().filter(|_| is_cube(hdu)) else {
                continue;
            };
            match &previous {
                Some(prev) if prev.as_slice() != shape => self.state.record(
                    &ids[index],
                    "data",
                    FindingKind::ShapeMismatch,
                    format!("shape {shape:?} differs from previous cube {prev:?}"),
                ),
                Some(_) => {}
                None => debug!("3D data found in HDU {index} with shape {shape:?}"),
            }
            previous = Some(shape.to_vec());
        }

        if previous.is_none() {
            self.state.good_check(false);
            let message = if fix {
                "no extension carries 3D data, cannot fix"
            } else {
                "no extension carries 3D data"
            };
            let id = ids.first().map(String::as_str).unwrap_or("0");
            self.state.record(id, "data", FindingKind::NoData, message);
        }
    }

    /// The primary HDU is always checked, other HDUs only when they hold a cube.
    fn check_axis_keywords(&mut self, rules: &[AxisRule], fix: bool, ids: &[String]) {
        for (index, hdu) in self.fits.hdus_mut().iter_mut().enumerate() {
            if index != 0 && !is_cube(hdu) {
                continue;
            }
            for rule in rules {
                check_keyword(hdu.header_mut(), rule, fix, &ids[index], &mut self.state);
            }
        }
    }
}

fn check_keyword(
    header: &mut Header,
    rule: &AxisRule,
    fix: bool,
    id: &str,
    state: &mut ValidationState,
) {
    let key = rule.key.as_str();
    let was_missing = !header.contains(key);
    if was_missing {
        header.set(key, MISSING_VALUE);
    }
    let current = header.get(key).map(value_text).unwrap_or_default();
    if rule.matches(&current) {
        return;
    }

    if let Some(trimmed) = drop_last_char(&current).filter(|t| rule.matches(t)) {
        let trimmed = trimmed.to_string();
        header.set(key, trimmed.as_str());
        state.record(
            id,
            key,
            FindingKind::Adjusted,
            format!("was '{current}', adjusted to '{trimmed}'"),
        );
        return;
    }

    state.good_check(false);
    if fix {
        header.set(key, rule.expected());
        state.record(
            id,
            key,
            FindingKind::Fixed,
            format!("was '{current}', set to '{}'", rule.expected()),
        );
    } else {
        let kind = if was_missing {
            FindingKind::Missing
        } else {
            FindingKind::Mismatch
        };
        state.record(
            id,
            key,
            kind,
            format!("was '{current}', should equal {}", rule.describe()),
        );
    }
}

fn value_text(value: &HeaderValue) -> String {
    match value {
        HeaderValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn drop_last_char(value: &str) -> Option<&str> {
    let mut chars = value.chars();
    chars.next_back()?;
    Some(chars.as_str())
}

/// Report section names: EXTNAME as read, or the HDU index. A repeated
/// EXTNAME is qualified by EXTVER (`SCI,2`), or by the HDU index (`SCI[2]`)
/// when EXTVER does not tell the HDUs apart.
fn extension_ids(fits: &FitsFile) -> Vec<String> {
    let names: Vec<Option<&str>> = fits
        .iter()
        .map(|hdu| hdu.extname().map(str::trim).filter(|name| !name.is_empty()))
        .collect();
    let repeated = |name: &str| names.iter().filter(|n| **n == Some(name)).count() > 1;

    let mut ids: Vec<String> = fits
        .iter()
        .zip(&names)
        .enumerate()
        .map(|(index, (hdu, name))| match *name {
            None => index.to_string(),
            Some(name) if repeated(name) => match hdu.header().get_int("EXTVER") {
                Some(version) => format!("{name},{version}"),
                None => format!("{name}[{index}]"),
            },
            Some(name) => name.to_string(),
        })
        .collect();

    let clashing: Vec<usize> = (0..ids.len())
        .filter(|&i| ids.iter().filter(|id| **id == ids[i]).count() > 1)
        .collect();
    for index in clashing {
        ids[index] = format!("{}[{index}]", names[index].unwrap_or("HDU"));
    }
    ids
}

// ---------------------------------------------------------------------------
// File entry point
// ---------------------------------------------------------------------------

/// Result of checking one file on disk.
#[derive(Debug)]
pub struct CheckOutcome {
    pub good: bool,
    pub report: ValidationReport,
    /// The (possibly fixed) file, absent when it could not be opened.
    pub fits: Option<FitsFile>,
}

/// Open `path` and validate it. Access failures become a failed outcome
/// with a `file` finding rather than an error.
pub fn check_file(path: &Path, fix: bool, config: &ValidatorConfig) -> CheckOutcome {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut fits = match open(path) {
        Ok(fits) => fits,
        Err(err) => {
            let mut state = ValidationState::new(&filename);
            state.good_check(false);
            state.record("file", "access", FindingKind::FileAccess, err.to_string());
            return CheckOutcome {
                good: false,
                report: state.into_report(),
                fits: None,
            };
        }
    };
    debug!("File {} exists", path.display());

    let mut validator = HeaderValidator::with_config(&mut fits, filename, config);
    validator.check(fix);
    let good = validator.is_good();
    let report = validator.into_report();

    CheckOutcome {
        good,
        report,
        fits: Some(fits),
    }
}

fn open(path: &Path) -> Result<FitsFile, FileAccessError> {
    if !path.is_file() {
        return Err(FileAccessError::Missing {
            path: PathBuf::from(path),
        });
    }
    load_file(path).map_err(|source| FileAccessError::Unreadable {
        path: PathBuf::from(path),
        source,
    })
}
