//! Single-worker scan pipeline.
//!
//! Every connection submits into one unbounded intake queue. One worker pulls
//! requests in submission order, drives the engine through [`ScanDriver`],
//! and routes each result back through the [`ConnectionRegistry`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use cameradar_core::engine::{AttackOptions, Dictionaries, Dictionary, DiscoverOptions, Engine};
use cameradar_core::errors::EngineError;
use cameradar_core::scan::{ScanMode, ScanRequest, ScanResult};
use cameradar_core::stream::Stream;
use cameradar_telemetry::MetricsRecorder;

use crate::codec;
use crate::connection::Delivery;
use crate::errors::{DeliveryDrop, PipelineClosed};
use crate::registry::ConnectionRegistry;

/// Streams found for one target; `Err` only when discovery itself failed.
pub type ScanOutcome = Result<Vec<Stream>, EngineError>;

/// Discover, then attack routes and credentials, for one target.
pub struct ScanDriver {
    engine: Arc<dyn Engine>,
    dictionaries: Arc<Dictionaries>,
    discover: DiscoverOptions,
    attack: AttackOptions,
    metrics: Arc<MetricsRecorder>,
}

impl ScanDriver {
    pub fn new(
        engine: Arc<dyn Engine>,
        dictionaries: Arc<Dictionaries>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            engine,
            dictionaries,
            discover: DiscoverOptions::default(),
            attack: AttackOptions::default(),
            metrics,
        }
    }

    #[must_use]
    pub fn with_discover_options(mut self, options: DiscoverOptions) -> Self {
        self.discover = options;
        self
    }

    #[must_use]
    pub fn with_attack_options(mut self, options: AttackOptions) -> Self {
        self.attack = options;
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn run(&self, target: &str, ports: &[u16], mode: ScanMode) -> ScanOutcome {
        self.metrics
            .counter_inc("engine.calls.total", &[("operation", "discover")], 1);
        let streams = self.engine.discover(target, ports, &self.discover).await?;
        tracing::debug!(found = streams.len(), "discovery finished");

        if streams.is_empty() || !mode.requires_attack() {
            return Ok(streams);
        }

        let streams = self.attack_pass(streams, &self.dictionaries.routes).await;
        let streams = self.attack_pass(streams, &self.dictionaries.credentials).await;

        // Some cameras answer 401 before 404, so a route can only be confirmed
        // once credentials are known. One more route pass covers the batch.
        if streams.iter().any(|s| !s.route_found || !s.credentials_found) {
            tracing::debug!("re-attacking routes with credentials known");
            return Ok(self.attack_pass(streams, &self.dictionaries.routes).await);
        }
        Ok(streams)
    }

    /// A failed pass keeps the streams it was given.
    async fn attack_pass(&self, streams: Vec<Stream>, dictionary: &Dictionary) -> Vec<Stream> {
        let kind = dictionary.kind.as_str();
        self.metrics.counter_inc(
            "engine.calls.total",
            &[("operation", "attack"), ("dictionary", kind)],
            1,
        );
        match self
            .engine
            .attack(streams.clone(), dictionary, &self.attack)
            .await
        {
            Ok(attacked) => attacked,
            Err(e) => {
                tracing::warn!(dictionary = kind, error = %e, "attack pass failed, keeping previous streams");
                streams
            }
        }
    }
}

/// Submission side of the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct DispatchPipeline {
    intake: mpsc::UnboundedSender<ScanRequest>,
    depth: Arc<AtomicUsize>,
    metrics: Arc<MetricsRecorder>,
}

struct Worker {
    driver: ScanDriver,
    registry: Arc<ConnectionRegistry>,
    depth: Arc<AtomicUsize>,
    metrics: Arc<MetricsRecorder>,
}

impl DispatchPipeline {
    /// Start the worker. It stops once every sender is dropped or `shutdown`
    /// fires, finishing the request in hand first.
    pub fn spawn(
        driver: ScanDriver,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<MetricsRecorder>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (intake, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let worker = Worker {
            driver,
            registry,
            depth: Arc::clone(&depth),
            metrics: Arc::clone(&metrics),
        };
        let join = tokio::spawn(worker.run(rx, shutdown));
        (
            Self {
                intake,
                depth,
                metrics,
            },
            join,
        )
    }

    /// Queue a request. Never waits.
    pub fn submit(&self, request: ScanRequest) -> Result<(), PipelineClosed> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.intake.send(request).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(PipelineClosed);
        }
        self.metrics
            .gauge_set("pipeline.queue_depth", &[], depth as f64);
        Ok(())
    }

    /// Requests waiting for the worker, not counting the one in progress.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<ScanRequest>, shutdown: CancellationToken) {
        tracing::info!(engine = self.driver.engine_name(), "dispatch pipeline started");
        loop {
            let request = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            let depth = self.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            self.metrics
                .gauge_set("pipeline.queue_depth", &[], depth as f64);

            let span = tracing::info_span!(
                "scan",
                connection_id = %request.connection_id,
                target = %request.target,
                mode = request.mode.as_str(),
            );
            let result = self.process(request).instrument(span.clone()).await;
            span.in_scope(|| {
                if let Err(dropped) = self.deliver(&result) {
                    tracing::info!(reason = dropped.reason(), "result not delivered: {dropped}");
                    self.metrics
                        .counter_inc("delivery.dropped.total", &[("reason", dropped.reason())], 1);
                }
            });
        }
        tracing::info!(pending = self.depth.load(Ordering::SeqCst), "dispatch pipeline stopped");
    }

    async fn process(&self, request: ScanRequest) -> ScanResult {
        let started = Instant::now();
        let ports = request.ports_vec();
        let outcome = AssertUnwindSafe(self.driver.run(&request.target, &ports, request.mode))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(streams)) => {
                tracing::info!(streams = streams.len(), "scan finished");
                ScanResult::success(request.connection_id, request.target, streams)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "scan failed");
                ScanResult::failed(request.connection_id, request.target, &e)
            }
            Err(panic) => {
                let e = EngineError::Panicked(panic_message(panic.as_ref()));
                tracing::error!(error = %e, "engine panicked during scan");
                ScanResult::failed(request.connection_id, request.target, &e)
            }
        };

        let outcome_label = match &result.error {
            None => "success",
            Some(info) => match info.kind.as_str() {
                "panicked" => "panicked",
                _ => "error",
            },
        };
        self.metrics
            .counter_inc("scan.requests.total", &[("outcome", outcome_label)], 1);
        self.metrics.histogram_observe(
            "scan.duration_ms",
            &[],
            started.elapsed().as_secs_f64() * 1000.0,
        );
        result
    }

    fn deliver(&self, result: &ScanResult) -> Result<(), DeliveryDrop> {
        let handle = self
            .registry
            .resolve(&result.connection_id)
            .ok_or(DeliveryDrop::UnknownConnection)?;
        match handle.enqueue(codec::encode(result)) {
            Delivery::Queued => Ok(()),
            Delivery::QueueFull => Err(DeliveryDrop::QueueFull),
            Delivery::NotOpen => Err(DeliveryDrop::NotOpen),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
