use std::error::Error;
use std::fmt;

/// Logs an error to the configured logger or `stderr` if not yet configured.
///
/// Intended for startup and shutdown, where the logger may not be initialized. Prefer
/// [`error!`](crate::error) everywhere else.
///
/// # Example
///
/// ```
/// let error: Box<dyn std::error::Error> = "no configuration found".into();
/// meter_log::ensure_error(&error);
/// ```
pub fn ensure_error<E: AsRef<dyn Error>>(error: E) {
    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!("{}", LogError(error.as_ref()));
    } else {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("error: {}", LogError(error.as_ref()));
        }
    }
}

/// Displays an error together with all of its causes.
///
/// # Example
///
/// ```
/// use meter_log::LogError;
///
/// if let Err(error) = std::env::var("FOO") {
///     meter_log::error!("env failed: {}", LogError(&error));
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
