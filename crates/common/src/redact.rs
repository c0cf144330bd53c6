//! Log redaction for user-supplied pathnames.

/// Replacement text used when redaction is enabled.
const PLACEHOLDER: &str = "(redacted)";

/// Substitutes archive filenames and entry pathnames in log messages.
///
/// When `--redact` is in effect, every user-supplied pathname rendered
/// into a log line is replaced by a placeholder. This keeps personally
/// identifiable information such as archive filenames out of logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redactor {
    enabled: bool,
}

impl Redactor {
    /// Create a redactor.
    ///
    /// # Arguments
    /// * `enabled` - Whether pathnames should be replaced
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// The pathname text to render into a log message.
    pub fn path<'a>(&self, path: &'a str) -> &'a str {
        if self.enabled {
            PLACEHOLDER
        } else {
            path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction_disabled_passes_through() {
        let redactor: Redactor = Redactor::new(false);
        assert_eq!(redactor.path("/secret/archive.zip"), "/secret/archive.zip");
    }

    #[test]
    fn test_redaction_enabled_substitutes() {
        let redactor: Redactor = Redactor::new(true);
        assert_eq!(redactor.path("/secret/archive.zip"), "(redacted)");
    }
}
