//! Content change detection by freshness token

use log::{debug, info, warn};

/// Length of a valid freshness token
pub const TOKEN_LEN: usize = 16;

/// Opaque content token as served by `/hash`
pub type Token = heapless::String<TOKEN_LEN>;

/// Result of comparing a remote token with the committed one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Unchanged,
    Changed,
}

/// Parse a token, rejecting anything that is not exactly [`TOKEN_LEN`] bytes
pub fn parse_token(raw: &str) -> Option<Token> {
    let raw = raw.trim();
    if raw.len() != TOKEN_LEN {
        warn!("Invalid token length: {}", raw.len());
        return None;
    }
    Token::try_from(raw).ok()
}

/// Tracks the committed token and the one staged by the last check
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    committed: Option<Token>,
    pending: Option<Token>,
}

impl ChangeDetector {
    /// Start from the token retained across sleep. The pending slot is always empty.
    pub fn new(committed: Option<Token>) -> Self {
        Self {
            committed,
            pending: None,
        }
    }

    /// Compare a token from the remote source with the committed one.
    ///
    /// `None` (missing or malformed token) is treated as changed without staging.
    pub fn check(&mut self, remote: Option<&str>) -> Freshness {
        self.pending = None;

        let Some(token) = remote.and_then(parse_token) else {
            info!("No valid token, assuming content changed");
            return Freshness::Changed;
        };

        if self.committed.as_ref() == Some(&token) {
            debug!("Token {} unchanged", token);
            return Freshness::Unchanged;
        }

        info!(
            "Token changed: {} -> {}",
            self.committed.as_deref().unwrap_or("(none)"),
            token
        );
        self.pending = Some(token);
        Freshness::Changed
    }

    /// Commit after a display attempt. An authoritative token from the content
    /// response wins over the staged one. Returns the committed token.
    pub fn commit(&mut self, authoritative: Option<&str>) -> Option<&Token> {
        let authoritative = authoritative.and_then(parse_token);
        let pending = self.pending.take();

        if let (Some(a), Some(p)) = (&authoritative, &pending) {
            if a != p {
                warn!("Content token {} differs from checked token {}", a, p);
            }
        }

        match authoritative.or(pending) {
            Some(token) => {
                self.committed = Some(token);
            }
            None => debug!("Nothing to commit"),
        }
        self.committed.as_ref()
    }

    pub fn committed(&self) -> Option<&Token> {
        self.committed.as_ref()
    }

    pub fn pending(&self) -> Option<&Token> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "abcdef0123456789";
    const B: &str = "0123456789abcdef";
    const C: &str = "ffffffffffffffff";

    fn token(s: &str) -> Token {
        Token::try_from(s).unwrap()
    }

    #[test]
    fn test_same_token_is_unchanged() {
        let mut detector = ChangeDetector::new(Some(token(A)));
        assert_eq!(detector.check(Some(A)), Freshness::Unchanged);
        assert_eq!(detector.pending(), None);
    }

    #[test]
    fn test_new_token_is_staged() {
        let mut detector = ChangeDetector::new(Some(token(A)));
        assert_eq!(detector.check(Some(B)), Freshness::Changed);
        assert_eq!(detector.pending(), Some(&token(B)));
        assert_eq!(detector.committed(), Some(&token(A)));

        assert_eq!(detector.commit(None), Some(&token(B)));
        assert_eq!(detector.pending(), None);
    }

    #[test]
    fn test_first_boot_is_changed() {
        let mut detector = ChangeDetector::new(None);
        assert_eq!(detector.check(Some(A)), Freshness::Changed);
        assert_eq!(detector.pending(), Some(&token(A)));
    }

    #[test]
    fn test_malformed_token_assumes_changed() {
        let mut detector = ChangeDetector::new(Some(token(A)));
        assert_eq!(detector.check(Some("short")), Freshness::Changed);
        assert_eq!(detector.check(Some("abcdef01234567890")), Freshness::Changed);
        assert_eq!(detector.check(None), Freshness::Changed);
        assert_eq!(detector.pending(), None);

        // Nothing staged, nothing to commit
        assert_eq!(detector.commit(None), Some(&token(A)));
    }

    #[test]
    fn test_trailing_newline_accepted() {
        assert_eq!(parse_token("abcdef0123456789\n"), Some(token(A)));
    }

    #[test]
    fn test_authoritative_token_wins() {
        let mut detector = ChangeDetector::new(Some(token(A)));
        detector.check(Some(B));
        assert_eq!(detector.commit(Some(C)), Some(&token(C)));
    }

    #[test]
    fn test_authoritative_without_check() {
        let mut detector = ChangeDetector::new(None);
        detector.check(None);
        assert_eq!(detector.commit(Some(B)), Some(&token(B)));
    }
}
