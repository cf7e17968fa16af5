use crate::ConfigError;
use regex::Regex;

/// A set of exclusion patterns applied to URL paths
///
/// A path is excluded when any pattern matches anywhere in it, so anchors
/// (`^`, `$`) must be written explicitly.
///
/// # Examples
///
/// ```
/// use sumi_snap::url::ExclusionSet;
///
/// let set = ExclusionSet::new(&["^/admin".to_string(), r"\.pdf$".to_string()]).unwrap();
///
/// assert!(set.is_excluded("/admin/users"));
/// assert!(set.is_excluded("/files/report.pdf"));
/// assert!(!set.is_excluded("/about"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<Regex>,
}

impl ExclusionSet {
    /// Compiles the given patterns
    ///
    /// # Returns
    ///
    /// * `Ok(ExclusionSet)` - All patterns compiled
    /// * `Err(ConfigError::InvalidPattern)` - The first pattern that failed to compile
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Returns true if any pattern matches the path
    pub fn is_excluded(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }

    /// Number of patterns in the set
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns true if the set has no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
