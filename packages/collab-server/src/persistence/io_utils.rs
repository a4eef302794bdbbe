//! I/O helpers for persistence operations.

use std::io::ErrorKind;

use collab_core::CollabError;

/// Maps an I/O error onto the storage variants of `CollabError`.
pub fn classify_io_error(error: std::io::Error, context: &str) -> CollabError {
    match error.kind() {
        ErrorKind::StorageFull | ErrorKind::OutOfMemory => {
            CollabError::DiskFull(format!("{}: {}", context, error))
        }
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            CollabError::TransientIoError(format!("{}: {}", context, error))
        }
        _ => CollabError::IoError(format!("{}: {}", context, error)),
    }
}

/// Runs `operation`, retrying only transient I/O failures.
pub fn retry_io_operation<F, T>(
    mut operation: F,
    max_retries: u32,
    retry_delay_ms: u64,
    context: &str,
) -> Result<T, CollabError>
where
    F: FnMut() -> Result<T, CollabError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(CollabError::TransientIoError(msg)) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    "Transient I/O error in {} (attempt {}/{}): {}",
                    context,
                    attempt,
                    max_retries,
                    msg
                );
                if retry_delay_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(retry_delay_ms));
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_classification() {
        let err = classify_io_error(std::io::Error::from(ErrorKind::Interrupted), "append");
        assert!(matches!(err, CollabError::TransientIoError(_)));
        let err = classify_io_error(std::io::Error::from(ErrorKind::NotFound), "open");
        assert!(matches!(err, CollabError::IoError(_)));
    }

    #[test]
    fn test_retries_transient_then_succeeds() {
        let calls = Cell::new(0);
        let result = retry_io_operation(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(CollabError::TransientIoError("busy".into()))
                } else {
                    Ok(42)
                }
            },
            3,
            0,
            "test",
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_does_not_retry_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_io_operation(
            || {
                calls.set(calls.get() + 1);
                Err(CollabError::DiskFull("full".into()))
            },
            5,
            0,
            "test",
        );
        assert!(matches!(result, Err(CollabError::DiskFull(_))));
        assert_eq!(calls.get(), 1);
    }
}
