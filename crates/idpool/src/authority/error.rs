/// Failures reported by an [`IdAuthority`].
///
/// The pool maps `Temporary`, `Permanent` and `Interrupted` to a retryable
/// [`Error::TransientAllocation`], and `Exhausted` to the terminal
/// [`Error::PoolExhausted`].
///
/// [`IdAuthority`]: crate::IdAuthority
/// [`Error::TransientAllocation`]: crate::Error::TransientAllocation
/// [`Error::PoolExhausted`]: crate::Error::PoolExhausted
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthorityError {
    /// A backend hiccup; the same request may succeed later.
    #[error("temporary backend failure: {reason}")]
    Temporary { reason: String },

    /// The backend rejected the request outright.
    #[error("permanent backend failure: {reason}")]
    Permanent { reason: String },

    /// The namespace has no more IDs to grant.
    #[error("no ids left for partition({partition})-namespace({namespace})")]
    Exhausted { partition: u32, namespace: u32 },

    /// The call observed its cancellation token and gave up.
    #[error("block request was interrupted")]
    Interrupted,
}

impl AuthorityError {
    /// Shorthand for [`AuthorityError::Temporary`].
    pub fn temporary(reason: impl Into<String>) -> Self {
        Self::Temporary {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`AuthorityError::Permanent`].
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    /// Whether the namespace has run out of IDs.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
