//! Panic isolation at the capability boundary.
//!
//! Capabilities are third-party code running on a shared worker thread. An
//! unwind escaping one of them would take every sibling instance of the
//! worker down with it, so each call is made through [`catch_panic`] and a
//! panic comes back as [`MsuError::Panic`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use weave_api::MsuError;

/// Runs `f`, reporting a panic inside it as [`MsuError::Panic`].
pub(crate) fn catch_panic<T>(capability: &'static str, f: impl FnOnce() -> T) -> Result<T, MsuError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| MsuError::Panic {
        capability,
        message: panic_message(payload.as_ref()),
    })
}

/// Text of a panic payload, when it carries one.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_becomes_error() {
        let err = catch_panic("receive", || -> u32 { panic!("bad input {}", 7) }).unwrap_err();
        match err {
            MsuError::Panic { capability, message } => {
                assert_eq!(capability, "receive");
                assert_eq!(message, "bad input 7");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_value_passes_through() {
        assert_eq!(catch_panic("init", || 5).unwrap(), 5);
    }

    #[test]
    fn test_static_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
