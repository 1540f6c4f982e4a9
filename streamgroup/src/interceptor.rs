//! Cross-cutting hooks run before the handler sees an entry.

use crate::entry::Entry;
use crate::errors::HandlerError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// A hook observing every entry before it reaches the handler.
///
/// Interceptors typically read the entry's interceptor-data bucket to restore
/// context such as trace ids or tenant information.
#[async_trait]
pub trait ConsumerInterceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called once per consume attempt, before the handler.
    async fn on_consume(&self, entry: &Entry) -> Result<(), HandlerError>;
}

/// Runs `interceptors` in registration order. Failures are logged and skipped.
pub(crate) async fn run_interceptors(interceptors: &[Arc<dyn ConsumerInterceptor>], entry: &Entry) {
    for interceptor in interceptors {
        if let Err(error) = interceptor.on_consume(entry).await {
            warn!(
                interceptor = interceptor.name(),
                entry = %entry.id,
                error = %error,
                "interceptor failed, continuing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Bucket, EntryMetadata};
    use crate::types::{EntryId, Environment, StreamUri};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    struct Recording {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl ConsumerInterceptor for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_consume(&self, _entry: &Entry) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(self.name);
            if self.fail {
                Err(HandlerError::new("interceptor exploded"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn runs_in_order_and_survives_failures() {
        // Given
        let seen = Arc::new(Mutex::new(Vec::new()));
        let interceptors: Vec<Arc<dyn ConsumerInterceptor>> = vec![
            Arc::new(Recording {
                name: "first",
                seen: Arc::clone(&seen),
                fail: true,
            }),
            Arc::new(Recording {
                name: "second",
                seen: Arc::clone(&seen),
                fail: false,
            }),
        ];
        let entry = Entry::new(
            EntryId::new(1, 0),
            EntryMetadata::new(
                "op",
                Environment::default(),
                StreamUri::try_new("s").unwrap(),
            ),
            Bucket::new(),
            Bucket::new(),
        );

        // When
        run_interceptors(&interceptors, &entry).await;

        // Then
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert!(logs_contain("interceptor failed, continuing"));
    }
}
