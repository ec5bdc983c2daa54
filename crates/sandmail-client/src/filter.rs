//! Email matching and partial-result types.

use std::{fmt, sync::Arc};

use sandmail_crypto::CryptoError;
use sandmail_proto::{DecryptedEmail, EmailId, ProtocolError};

type Predicate = Arc<dyn Fn(&DecryptedEmail) -> bool + Send + Sync>;

/// Criteria for [`Inbox::wait_for_email`](crate::Inbox::wait_for_email).
///
/// Every criterion that is set must match. The empty filter matches any
/// email. Substring checks are case-sensitive.
#[derive(Clone, Default)]
pub struct EmailFilter {
    subject: Option<String>,
    from: Option<String>,
    predicate: Option<Predicate>,
}

impl EmailFilter {
    /// Filter that matches everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Require the subject to contain `needle`.
    #[must_use]
    pub fn subject_contains(mut self, needle: impl Into<String>) -> Self {
        self.subject = Some(needle.into());
        self
    }

    /// Require the sender to contain `needle`.
    #[must_use]
    pub fn from_contains(mut self, needle: impl Into<String>) -> Self {
        self.from = Some(needle.into());
        self
    }

    /// Require `predicate` to return true.
    #[must_use]
    pub fn matching(
        mut self,
        predicate: impl Fn(&DecryptedEmail) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether `email` satisfies every criterion.
    pub fn matches(&self, email: &DecryptedEmail) -> bool {
        self.subject.as_deref().is_none_or(|s| email.subject.contains(s))
            && self.from.as_deref().is_none_or(|f| email.from.contains(f))
            && self.predicate.as_ref().is_none_or(|p| p(email))
    }
}

impl fmt::Debug for EmailFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailFilter")
            .field("subject", &self.subject)
            .field("from", &self.from)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Why an email was left out of a listing.
#[derive(Debug, thiserror::Error)]
pub enum WithheldReason {
    /// Signature or decryption check failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Envelope or body could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// An email that failed verification and was not returned as content.
#[derive(Debug)]
pub struct WithheldEmail {
    /// Email identifier
    pub id: EmailId,
    /// What went wrong
    pub reason: WithheldReason,
}

/// Result of listing an inbox.
///
/// Verification failures are per item and never fail the whole listing.
#[derive(Debug, Default)]
pub struct EmailBatch {
    /// Emails that verified and decrypted, in server order
    pub emails: Vec<DecryptedEmail>,
    /// Emails that did not
    pub withheld: Vec<WithheldEmail>,
}

impl EmailBatch {
    /// Whether any email was withheld.
    pub fn has_withheld(&self) -> bool {
        !self.withheld.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::DateTime;

    use super::*;

    fn email(subject: &str, from: &str) -> DecryptedEmail {
        DecryptedEmail {
            id: EmailId::from("e1"),
            inbox_hash: "inbox".into(),
            received_at: DateTime::UNIX_EPOCH,
            is_read: false,
            subject: subject.to_string(),
            from: from.to_string(),
            to: vec!["user@sandbox.test".to_string()],
            text: Some("hello".to_string()),
            html: None,
            attachments: Vec::new(),
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_filter_matches_anything() {
        assert!(EmailFilter::any().matches(&email("", "")));
    }

    #[test]
    fn all_criteria_must_match() {
        let filter = EmailFilter::any()
            .subject_contains("Reset")
            .from_contains("noreply@")
            .matching(|e| e.text.as_deref() == Some("hello"));

        assert!(filter.matches(&email("Password Reset", "noreply@example.com")));
        assert!(!filter.matches(&email("Welcome", "noreply@example.com")));
        assert!(!filter.matches(&email("Password Reset", "support@example.com")));
    }

    #[test]
    fn substring_match_is_case_sensitive() {
        let filter = EmailFilter::any().subject_contains("reset");
        assert!(!filter.matches(&email("Password Reset", "a@b.c")));
    }

    #[test]
    fn debug_hides_predicate() {
        let filter = EmailFilter::any().matching(|_| true);
        assert!(format!("{filter:?}").contains("<fn>"));
    }
}
