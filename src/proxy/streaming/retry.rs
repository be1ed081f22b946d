// Whole-attempt retry on first-token timeout.
//
// The generator's very first item is probed before the HTTP response is
// committed; a FirstTokenTimeout there throws the entire upstream attempt
// away and re-issues it, so the client never sees duplicate frames.

use std::future::Future;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::warn;

use crate::proxy::common::errors::GatewayError;

use super::StreamError;

pub type SseStream = BoxStream<'static, Result<String, StreamError>>;

pub async fn stream_with_retry<F, Fut>(
    make_stream: F,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<impl Stream<Item = Result<String, StreamError>>, GatewayError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<SseStream, GatewayError>>,
{
    let attempts = max_retries.max(1);
    let mut attempt: u32 = 0;

    loop {
        let mut stream = make_stream().await?;
        match stream.next().await {
            Some(Err(StreamError::FirstTokenTimeout)) => {
                if attempt + 1 < attempts {
                    attempt += 1;
                    warn!(
                        "First token timeout, retrying upstream attempt {}/{}",
                        attempt + 1,
                        attempts
                    );
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
                return Err(GatewayError::Timeout(
                    "no data received within the first-token timeout after retries".into(),
                ));
            }
            first => return Ok(futures::stream::iter(first).chain(stream)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ok_stream(frames: Vec<&str>) -> SseStream {
        futures::stream::iter(
            frames
                .into_iter()
                .map(|f| Ok(f.to_string()))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    fn timeout_stream() -> SseStream {
        futures::stream::iter(vec![Err(StreamError::FirstTokenTimeout)]).boxed()
    }

    #[tokio::test]
    async fn test_success_passes_through_all_frames() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let stream = stream_with_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ok_stream(vec!["a", "b", "c"]))
                }
            },
            3,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        let frames: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(frames, vec!["a", "b", "c"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Scenario: the first attempt yields nothing within the first-token
    /// window, the second succeeds — two upstream attempts, one frame set.
    #[tokio::test]
    async fn test_retry_after_first_token_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let stream = stream_with_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Ok(timeout_stream())
                    } else {
                        Ok(ok_stream(vec!["data", "done"]))
                    }
                }
            },
            3,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        let frames: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(frames, vec!["data", "done"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result = stream_with_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(timeout_stream())
                }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert!(matches!(result.err().unwrap(), GatewayError::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_request_error_propagates_immediately() {
        let result = stream_with_retry(
            || async {
                Err::<SseStream, _>(GatewayError::Upstream {
                    status: 400,
                    message: "bad".into(),
                })
            },
            3,
            Duration::from_millis(1),
        )
        .await;
        assert!(matches!(
            result.err().unwrap(),
            GatewayError::Upstream { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn test_mid_stream_error_not_retried() {
        // A non-first-token error on the first item flows into the stream.
        let stream = stream_with_retry(
            || async {
                Ok(futures::stream::iter(vec![
                    Err(StreamError::Transport("broken pipe".into())),
                ])
                .boxed())
            },
            3,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(StreamError::Transport(_))));
    }
}
