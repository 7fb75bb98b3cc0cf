//! Failpoint injection for crash and error-path tests.
//!
//! Active in unit tests and with `--features failpoints`; otherwise the
//! `fp!()` macro expands to `Ok(())`.
//!
//! The registry is per thread so concurrently running tests never see each
//! other's failpoints.

use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static REGISTRY: RefCell<HashMap<&'static str, String>> = RefCell::new(HashMap::new());
}

/// Make failpoint `name` fail with `message` on this thread.
pub fn set(name: &'static str, message: impl Into<String>) {
    REGISTRY.with(|r| r.borrow_mut().insert(name, message.into()));
}

/// Disarm failpoint `name` on this thread.
pub fn clear(name: &'static str) {
    REGISTRY.with(|r| r.borrow_mut().remove(name));
}

/// `Err(message)` if `name` is armed on this thread.
///
/// # Errors
/// The message the failpoint was armed with.
pub fn check(name: &str) -> Result<(), String> {
    REGISTRY.with(|r| match r.borrow().get(name) {
        Some(message) => Err(message.clone()),
        None => Ok(()),
    })
}

/// Failpoint injection point.
///
/// Usage: `fp!("FP_REF_BEFORE_RENAME").map_err(...)?;`
#[cfg(any(test, feature = "failpoints"))]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        $crate::failpoints::check($name)
    };
}

#[cfg(not(any(test, feature = "failpoints")))]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        Ok::<(), String>(())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_failpoint_is_noop() {
        assert!(fp!("FP_TEST_NOOP").is_ok());
    }

    #[test]
    fn armed_failpoint_errors_until_cleared() {
        set("FP_TEST_ERROR", "injected");
        assert_eq!(fp!("FP_TEST_ERROR"), Err("injected".to_owned()));
        clear("FP_TEST_ERROR");
        assert!(fp!("FP_TEST_ERROR").is_ok());
    }

    #[test]
    fn failpoints_are_thread_local() {
        set("FP_TEST_LOCAL", "here only");
        let elsewhere = std::thread::spawn(|| fp!("FP_TEST_LOCAL")).join().unwrap();
        assert!(elsewhere.is_ok());
        clear("FP_TEST_LOCAL");
    }
}
