use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::EventStoreError;

// ============================================================================
// Request Context - cancellation and deadline for outbound requests
// ============================================================================
//
// Every backend round trip issued by the store runs through `RequestContext::run`,
// so a caller's cancellation or deadline covers each individual request
// (version lookups, every global version allocation, the batch commit, and
// every query page), not only the top-level call.
//
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Keeps the earlier of the existing and the new deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> Result<(), EventStoreError> {
        if self.token.is_cancelled() {
            return Err(EventStoreError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EventStoreError::Timeout),
            _ => Ok(()),
        }
    }

    /// Run one outbound request under this context.
    pub async fn run<F, T, E>(&self, request: F) -> Result<T, EventStoreError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<EventStoreError>,
    {
        self.check()?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(EventStoreError::Cancelled),
                result = request => result.map_err(Into::into),
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(EventStoreError::Timeout)),
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::BackendError;

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = RequestContext::new();
        let value = ctx.run(async { Ok::<_, BackendError>(7u64) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_context_rejects_before_request() {
        let ctx = RequestContext::new();
        ctx.cancel();

        let result = ctx
            .run(async { Ok::<_, BackendError>(()) })
            .await;
        assert!(matches!(result, Err(EventStoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_in_flight_request() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BackendError>(())
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(EventStoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(20));

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BackendError>(())
            })
            .await;
        assert!(matches!(result, Err(EventStoreError::Timeout)));
    }

    #[test]
    fn test_earliest_deadline_wins() {
        let now = Instant::now();
        let ctx = RequestContext::new()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
