//! Configuration access port.

use crate::domain::error::PapertrailError;

/// Sectioned key/value settings. Numeric lookups fall back to the given
/// default only when a key is absent; a present value that does not parse
/// is `ConfigInvalid`.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> Result<i64, PapertrailError>;
    fn get_double(&self, section: &str, key: &str, default: f64) -> Result<f64, PapertrailError>;

    /// A non-blank string or `ConfigMissing`.
    fn require_string(&self, section: &str, key: &str) -> Result<String, PapertrailError> {
        self.get_string(section, key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PapertrailError::ConfigMissing {
                section: section.into(),
                key: key.into(),
            })
    }
}
