use std::error::Error;
use std::fmt;

/// A wrapper around an [`Error`] that prints its causes.
///
/// # Example
///
/// ```
/// use courier_log::LogError;
///
/// if let Err(error) = std::env::var("FOO") {
///     courier_log::error!("env failed: {}", LogError(&error));
/// }
/// ```
pub struct LogError<'a, E: Error + ?Sized>(pub &'a E);

impl<E: Error + ?Sized> fmt::Display for LogError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(s) = source {
            write!(f, "\n  caused by: {s}")?;
            source = s.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug)]
    struct Outer(io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "upstream request failed")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_log_error_prints_causes() {
        let error = Outer(io::Error::other("connection reset"));
        assert_eq!(
            LogError(&error).to_string(),
            "upstream request failed\n  caused by: connection reset"
        );
    }
}
