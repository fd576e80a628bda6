use super::report::{FindingKind, ValidationReport};

// ---------------------------------------------------------------------------
// Validation state
// ---------------------------------------------------------------------------

/// Outcome of a check pass so far, kept apart from the file being checked.
#[derive(Debug, Clone)]
pub struct ValidationState {
    /// False once any check has failed. Never goes back to true.
    good: bool,
    report: ValidationReport,
}

impl ValidationState {
    pub fn new(filename: &str) -> Self {
        Self {
            good: true,
            report: ValidationReport::new(filename),
        }
    }

    pub fn good_check(&mut self, outcome: bool) {
        self.good &= outcome;
    }

    pub fn is_good(&self) -> bool {
        self.good
    }

    pub fn record(&mut self, extension: &str, key: &str, kind: FindingKind, message: impl Into<String>) {
        self.report.record(extension, key, kind, message);
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn into_report(self) -> ValidationReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_good_is_monotone() {
        let mut state = ValidationState::new("cube.fits");
        assert!(state.is_good());
        state.good_check(true);
        assert!(state.is_good());
        state.good_check(false);
        state.good_check(true);
        assert!(!state.is_good());
    }
}
