//! Opaque identifiers shared across every component.
//!
//! Both [`CallId`] and [`TenantId`] wrap `Arc<str>` rather than `String` so
//! that passing one into a `DashMap` key, a tracing span, or a cloned closure
//! never re-allocates the backing bytes.

use std::fmt;
use std::sync::Arc;

use crate::error::VoiceError;

/// Identifier assigned by the telephony switch to one in-progress call.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CallId(Arc<str>);

/// Identifier isolating configuration and mutable state between tenants.
///
/// Every operation that reads or writes state for a call must carry one;
/// cross-tenant access without it is a bug, not a recoverable error.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TenantId(Arc<str>);

macro_rules! opaque_id {
    ($ty:ident) => {
        impl $ty {
            /// Parse an identifier, rejecting empty or all-whitespace input.
            pub fn new(value: impl Into<Arc<str>>) -> Result<Self, VoiceError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(VoiceError::Internal {
                        detail: concat!(stringify!($ty), " must not be empty").into(),
                    });
                }
                Ok(Self(value))
            }

            /// Borrow the underlying string without cloning.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(CallId);
opaque_id!(TenantId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_ids() {
        assert!(CallId::new("").is_err());
        assert!(CallId::new("   ").is_err());
        assert!(TenantId::new("").is_err());
    }

    #[test]
    fn accepts_and_displays() {
        let id = CallId::new("call-123").unwrap();
        assert_eq!(id.as_str(), "call-123");
        assert_eq!(id.to_string(), "call-123");
    }

    #[test]
    fn cloning_is_cheap_arc_share() {
        let a = TenantId::new("tenant-a").unwrap();
        let b = a.clone();
        assert_eq!(a, b);
    }
}
