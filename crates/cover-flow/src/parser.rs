//! Coverage extraction from runner stdout.
//!
//! `go test -cover` prints one `coverage: NN.N% of statements` line per
//! package. The reported figure is the arithmetic mean of every match, not a
//! statement-weighted total.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static COVERAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"coverage:\s+([0-9]+(?:\.[0-9]+)?)%").expect("coverage regex is valid")
});

/// Summary of the coverage lines found in one output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageSummary {
    /// Number of coverage lines matched.
    pub matches: usize,
    /// Mean of the matched percentages; zero when nothing matched.
    pub mean: f64,
}

impl CoverageSummary {
    /// Returns true if at least one coverage line was found.
    #[must_use]
    pub fn has_coverage(&self) -> bool {
        self.matches > 0
    }

    /// Formats the mean as `NN.NN%`.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{:.2}%", self.mean)
    }
}

/// Scans `stdout` for coverage lines.
#[must_use]
pub fn scan(stdout: &str) -> CoverageSummary {
    let values: Vec<f64> = COVERAGE_LINE
        .captures_iter(stdout)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .collect();

    if values.is_empty() {
        return CoverageSummary {
            matches: 0,
            mean: 0.0,
        };
    }

    #[allow(clippy::cast_precision_loss)] // package counts are tiny
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    CoverageSummary {
        matches: values.len(),
        mean,
    }
}

/// Returns the mean coverage of `stdout` formatted with two decimals.
///
/// Output with no coverage line yields `0.00%`.
#[must_use]
pub fn parse(stdout: &str) -> String {
    scan(stdout).text()
}
