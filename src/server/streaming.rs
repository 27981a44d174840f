//! Response body streaming for generate requests.
//!
//! Wraps a relay [`FragmentStream`] with the overall request deadline and
//! per-stream accounting. Each fragment becomes one body chunk.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TakeUntil};
use tokio::time::{Instant, Sleep};
use tracing::{info, warn, Span};

use crate::metrics::{RelayMetrics, StreamOutcome};
use crate::relay::{FragmentStream, RelayError};

struct RelayedBody {
    inner: Pin<Box<TakeUntil<FragmentStream, Sleep>>>,
    metrics: Arc<RelayMetrics>,
    span: Span,
    started: Instant,
    fragments: usize,
    finished: bool,
}

impl RelayedBody {
    fn finish(&mut self, outcome: StreamOutcome) {
        self.finished = true;
        self.metrics.record_stream(outcome);
        let _entered = self.span.enter();
        info!(
            fragments = self.fragments,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            outcome = ?outcome,
            "Generation stream finished"
        );
    }
}

impl Drop for RelayedBody {
    // The client went away before the stream ended. Dropping `inner` here
    // closes the backend connection.
    fn drop(&mut self) {
        if !self.finished {
            self.finish(StreamOutcome::Cancelled);
        }
    }
}

/// Turn relayed fragments into a response body that ends at `deadline`.
///
/// `deadline` is the instant the whole request must finish by, so time spent
/// waiting for the backend's headers already counts against it. When it
/// passes the body ends cleanly and the backend stream is dropped. A relay
/// error is passed through as the body's last item, which aborts the HTTP
/// response. Log lines are emitted inside `span`.
pub fn fragments_to_body(
    fragments: FragmentStream,
    deadline: Instant,
    metrics: Arc<RelayMetrics>,
    span: Span,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static {
    let state = RelayedBody {
        inner: Box::pin(fragments.take_until(tokio::time::sleep_until(deadline))),
        metrics,
        span,
        started: Instant::now(),
        fragments: 0,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        match st.inner.next().await {
            Some(Ok(text)) => {
                st.fragments += 1;
                st.metrics.record_fragment();
                Some((Ok(Bytes::from(text)), st))
            }
            Some(Err(e)) => {
                st.span.in_scope(|| {
                    warn!(fragments = st.fragments, error = %e, "Generation stream failed");
                });
                st.finish(StreamOutcome::Interrupted);
                Some((Err(e), st))
            }
            None => {
                let outcome = if st.inner.is_stopped() {
                    StreamOutcome::TimedOut
                } else {
                    StreamOutcome::Completed
                };
                st.finish(outcome);
                None
            }
        }
    })
}
