//! Passphrase acquisition for encrypted entries.

use std::sync::{Arc, Mutex};

/// A passphrase provider shared between every reader opened over one
/// archive, so the user is prompted at most once per process.
pub type SharedPassphrase = Arc<Mutex<PassphraseProvider>>;

/// Lazily acquires and caches the archive passphrase.
///
/// The prompt callback runs on the first request only. An empty or
/// failed prompt is remembered as "no passphrase", so a wrong-password
/// loop can never re-prompt.
pub struct PassphraseProvider {
    prompt: Option<Box<dyn FnMut() -> Option<String> + Send>>,
    cached: Option<String>,
    prompted: bool,
}

impl PassphraseProvider {
    /// A provider with no passphrase and no way to get one.
    pub fn none() -> Self {
        Self {
            prompt: None,
            cached: None,
            prompted: false,
        }
    }

    /// A provider with a known passphrase (no prompting).
    pub fn fixed(passphrase: impl Into<String>) -> Self {
        let passphrase: String = passphrase.into();
        Self {
            prompt: None,
            cached: if passphrase.is_empty() {
                None
            } else {
                Some(passphrase)
            },
            prompted: false,
        }
    }

    /// A provider that asks the given callback once, on first request.
    ///
    /// # Arguments
    /// * `prompt` - Callback returning the passphrase, or `None` when
    ///   nothing could be read
    pub fn with_prompt(prompt: impl FnMut() -> Option<String> + Send + 'static) -> Self {
        Self {
            prompt: Some(Box::new(prompt)),
            cached: None,
            prompted: false,
        }
    }

    /// Wrap a provider for sharing across readers.
    pub fn shared(self) -> SharedPassphrase {
        Arc::new(Mutex::new(self))
    }

    /// Request the passphrase.
    ///
    /// # Returns
    /// The cached passphrase, prompting on the very first request.
    /// Trailing newlines are stripped; an empty line counts as none.
    pub fn request(&mut self) -> Option<String> {
        if self.cached.is_some() {
            return self.cached.clone();
        }

        if self.prompted {
            // Never re-prompt: a second request means the first answer
            // was empty or wrong, and looping would hang the mount.
            return None;
        }
        self.prompted = true;

        let answer: Option<String> = self.prompt.as_mut().and_then(|prompt| prompt());
        if let Some(mut passphrase) = answer {
            while passphrase.ends_with('\n') || passphrase.ends_with('\r') {
                passphrase.pop();
            }
            if passphrase.is_empty() {
                tracing::debug!("got an empty passphrase");
            } else {
                tracing::debug!("got a passphrase of {} bytes", passphrase.len());
                self.cached = Some(passphrase);
            }
        }

        self.cached.clone()
    }

    /// The passphrase captured so far, if any.
    pub fn captured(&self) -> Option<&str> {
        self.cached.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_runs_once() {
        let mut calls: u32 = 0;
        let mut provider = PassphraseProvider::with_prompt(move || {
            calls += 1;
            assert_eq!(calls, 1);
            Some("sekrit\n".to_string())
        });

        assert_eq!(provider.request().as_deref(), Some("sekrit"));
        // Second request serves the cache, not the callback.
        assert_eq!(provider.request().as_deref(), Some("sekrit"));
        assert_eq!(provider.captured(), Some("sekrit"));
    }

    #[test]
    fn test_empty_answer_is_none_and_never_reprompts() {
        let mut calls: u32 = 0;
        let mut provider = PassphraseProvider::with_prompt(move || {
            calls += 1;
            assert_eq!(calls, 1);
            Some("\n".to_string())
        });

        assert_eq!(provider.request(), None);
        assert_eq!(provider.request(), None);
        assert_eq!(provider.captured(), None);
    }

    #[test]
    fn test_fixed_provider() {
        let mut provider = PassphraseProvider::fixed("pw");
        assert_eq!(provider.request().as_deref(), Some("pw"));

        let mut empty = PassphraseProvider::fixed("");
        assert_eq!(empty.request(), None);
    }

    #[test]
    fn test_none_provider() {
        let mut provider = PassphraseProvider::none();
        assert_eq!(provider.request(), None);
    }
}
