//! Shared setup for tests across the courier workspace.
//!
//! Invoke [`setup!`] first in every test. Logs of the crate under test are then captured by the
//! test runner and shown for failing tests or with `--nocapture`.
//!
//! ```no_run
//! #[test]
//! fn test_flush() {
//!     courier_test::setup!();
//!
//!     courier_log::debug!("flushing");
//! }
//! ```

#[doc(hidden)]
pub use courier_log as __log;

/// Prepares logging for a test. Safe to invoke repeatedly.
///
/// This is a macro so that the crate invoking it is the one logging at `TRACE`.
#[macro_export]
macro_rules! setup {
    () => {
        $crate::__log::init_test!()
    };
}
