//! Per-thread error slot for the C boundary.
//!
//! Each failing call records its error here; `coffer_last_error` and
//! `coffer_last_error_kind` read it back on the same thread.

use std::cell::RefCell;

use coffer_common::{Error, ErrorKind};

/// Error recorded for the calling thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// Record an error for the current thread.
pub fn set_last_error(error: &Error) {
    let kind = error.kind();
    tracing::error!(kind = %kind, "FFI call failed: {}", error);
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some(LastError {
            kind,
            message: format!("{}: {}", kind, error),
        });
    });
}

/// Take the last error, leaving the slot empty.
pub fn take_last_error() -> Option<LastError> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

/// Kind of the last error without consuming it.
pub fn last_error_kind() -> Option<ErrorKind> {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map(|e| e.kind))
}

/// Clear the slot for the current thread.
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_roundtrip() {
        clear_last_error();
        assert!(last_error_kind().is_none());

        set_last_error(&Error::NotFound("/missing".to_string()));
        assert_eq!(last_error_kind(), Some(ErrorKind::NotFound));
        // Reading the kind does not consume the slot.
        assert_eq!(last_error_kind(), Some(ErrorKind::NotFound));

        let taken = take_last_error().unwrap();
        assert!(taken.message.starts_with("NotFound"));
        assert!(taken.message.contains("/missing"));
        assert!(take_last_error().is_none());
    }

    #[test]
    fn test_slot_is_per_thread() {
        set_last_error(&Error::AuthenticationFailed);
        let other = std::thread::spawn(last_error_kind).join().unwrap();
        assert!(other.is_none());
        assert_eq!(last_error_kind(), Some(ErrorKind::AuthenticationFailed));
        clear_last_error();
    }
}
