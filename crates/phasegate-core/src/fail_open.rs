//! Fail-open helper for bookkeeping side effects
//!
//! The audit trail and similar infrastructure must never stop the scheduler.
//! Transition persistence, executor dispatch and state parsing are NOT fail-open.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Await `fut`, logging and swallowing its error.
///
/// Returns `None` when the operation failed.
///
/// ```no_run
/// use phasegate_core::fail_open::fail_open;
///
/// async fn append_record() -> phasegate_core::Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("audit::append", append_record()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<T, Fut>(operation_name: &str, fut: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!(operation = operation_name, error = %e, "operation failed (fail-open)");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhaseGateError;

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let value = fail_open("test", async { Ok::<_, PhaseGateError>(7) }).await;
        assert_eq!(value, Some(7));
    }

    #[tokio::test]
    async fn test_error_is_swallowed() {
        let value: Option<()> = fail_open("test", async {
            Err(PhaseGateError::Store("disk full".to_string()))
        })
        .await;
        assert!(value.is_none());
    }
}
