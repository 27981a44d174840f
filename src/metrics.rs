//! Prometheus metrics for the generate endpoint.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// How a generate request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Accepted,
    Rejected,
    Unavailable,
}

impl RequestOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Unavailable => "unavailable",
        }
    }
}

/// How an accepted stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Interrupted,
    TimedOut,
    Cancelled,
}

impl StreamOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

pub struct RelayMetrics {
    registry: Registry,
    requests: IntCounterVec,
    fragments: IntCounter,
    streams: IntCounterVec,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("generate_requests_total", "Generate requests by outcome"),
            &["outcome"],
        )?;
        let fragments = IntCounter::new(
            "generate_fragments_total",
            "Text fragments relayed to callers",
        )?;
        let streams = IntCounterVec::new(
            Opts::new("generate_streams_total", "Accepted generate streams by how they ended"),
            &["outcome"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(fragments.clone()))?;
        registry.register(Box::new(streams.clone()))?;

        Ok(Self {
            registry,
            requests,
            fragments,
            streams,
        })
    }

    pub fn record_request(&self, outcome: RequestOutcome) {
        self.requests.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn record_fragment(&self) {
        self.fragments.inc();
    }

    pub fn record_stream(&self, outcome: StreamOutcome) {
        self.streams.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn requests(&self, outcome: RequestOutcome) -> u64 {
        self.requests.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn streams(&self, outcome: StreamOutcome) -> u64 {
        self.streams.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn fragments(&self) -> u64 {
        self.fragments.get()
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
