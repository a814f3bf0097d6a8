//! Behavioral helpers on an already-built [`EngineConfig`].

use super::types::EngineConfig;

impl EngineConfig {
    /// Whether `status` should be treated as a request failure.
    ///
    /// `ignore_http_error_status_codes` wins over the default classification
    /// (e.g. treat 404 as success for a link checker); entries in
    /// `additional_http_error_status_codes` are failures even if the HTTP
    /// status itself is in the 2xx/3xx range.
    #[must_use]
    pub fn is_error_status(&self, status: u16, default_is_error: bool) -> bool {
        if self.ignore_http_error_status_codes.contains(&status) {
            return false;
        }
        if self.additional_http_error_status_codes.contains(&status) {
            return true;
        }
        default_is_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_status_overrides_default_error_classification() {
        let config = EngineConfig::builder()
            .ignore_http_error_status_codes(vec![404])
            .build()
            .unwrap();
        assert!(!config.is_error_status(404, true));
    }

    #[test]
    fn additional_status_is_treated_as_error() {
        let config = EngineConfig::builder()
            .additional_http_error_status_codes(vec![202])
            .build()
            .unwrap();
        assert!(config.is_error_status(202, false));
    }
}
