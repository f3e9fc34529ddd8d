//! Upload event loop
//!
//! The single background worker of the manager. It runs a current-thread
//! tokio runtime and waits in one place on three sources:
//!
//! - the terminate channel (manager shutdown)
//! - the job channel (new submissions)
//! - the set of in-flight operations (transfers and backoff timers)
//!
//! Everything the loop touches (the handle pool, bound jobs, the backlog, the
//! jitter generator) is owned by this thread. Producers only see the two
//! channel ends and the per-job completion signals.
//!
//! ```text
//! Queued -> Bound -> InFlight -> Finalized
//!                      ^   |
//!                      |   v
//!                     Retrying
//! ```

use super::classify::Classification;
use super::job::{JobPhase, RequestKind, Tracked};
use super::pool::{Acquire, HandlePool, SlotId};
use super::request;
use super::Shared;
use crate::metrics;
use crate::s3::{http_date, UrlConstructor};
use crate::transport::{TransferOutcome, Transport};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::Method;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Completion of something the loop is waiting on
enum Event {
    Transferred {
        slot: SlotId,
        outcome: TransferOutcome,
    },
    BackoffElapsed {
        slot: SlotId,
    },
}

/// What to do with a job after one of its attempts completed
enum Next {
    Finalize(Classification),
    Retry(Duration),
    /// Probe found nothing; upload on the same handle
    SwitchToPut,
}

pub(crate) type Pool<T> = HandlePool<<T as Transport>::Connection, Tracked>;

pub(crate) struct UploadLoop<T: Transport> {
    transport: Arc<T>,
    urls: UrlConstructor,
    shared: Arc<Shared>,
    pool: Pool<T>,
    backlog: VecDeque<Tracked>,
    in_flight: FuturesUnordered<BoxFuture<'static, Event>>,
    rng: StdRng,
    jobs: mpsc::UnboundedReceiver<Tracked>,
    terminate: oneshot::Receiver<()>,
    shutdown_grace: Duration,
    /// This loop's share of the process-wide handles gauge
    published_handles: usize,
}

impl<T: Transport> UploadLoop<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Arc<T>,
        urls: UrlConstructor,
        shared: Arc<Shared>,
        pool: Pool<T>,
        jobs: mpsc::UnboundedReceiver<Tracked>,
        terminate: oneshot::Receiver<()>,
        jitter_seed: u64,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            transport,
            urls,
            shared,
            pool,
            backlog: VecDeque::new(),
            in_flight: FuturesUnordered::new(),
            rng: StdRng::seed_from_u64(jitter_seed),
            jobs,
            terminate,
            shutdown_grace,
            published_handles: 0,
        }
    }

    /// Thread entry point. Returns the pool so the manager can release it.
    pub(crate) fn run(mut self) -> Pool<T> {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start upload event loop runtime");
                self.jobs.close();
                while let Ok(tracked) = self.jobs.try_recv() {
                    self.finalize(tracked, Classification::LocalIo);
                }
                return self.pool;
            }
        };

        tracing::debug!(max_handles = self.pool.capacity(), "Upload event loop started");
        runtime.block_on(self.drive());
        tracing::debug!(
            peak_handles_in_use = self.pool.peak_in_use(),
            connections = self.pool.connected(),
            "Upload event loop stopped"
        );
        self.pool
    }

    async fn drive(&mut self) {
        loop {
            tokio::select! {
                biased;

                _ = &mut self.terminate => break,

                received = self.jobs.recv() => match received {
                    Some(tracked) => {
                        self.admit(tracked);
                        while let Ok(tracked) = self.jobs.try_recv() {
                            self.admit(tracked);
                        }
                    }
                    // Every sender is gone, treat it like a stop request
                    None => break,
                },

                Some(event) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.handle(event);
                }
            }

            self.bind_backlog();
        }

        self.shutdown().await;
    }

    fn admit(&mut self, tracked: Tracked) {
        if self.backlog.is_empty() {
            self.bind(tracked);
        } else {
            self.backlog.push_back(tracked);
        }
    }

    fn bind_backlog(&mut self) {
        while self.pool.has_idle() {
            let Some(tracked) = self.backlog.pop_front() else {
                break;
            };
            self.bind(tracked);
        }
    }

    fn bind(&mut self, tracked: Tracked) {
        let transport = &self.transport;
        match self.pool.acquire(tracked, || transport.connect()) {
            Acquire::Bound(slot) => {
                self.publish_handles_in_use();
                if let Some((_, tracked)) = self.pool.get_mut(slot) {
                    tracked.job.state.phase = JobPhase::Bound;
                }
                self.launch(slot);
            }
            Acquire::Full(mut tracked) => {
                tracked.job.state.phase = JobPhase::Queued;
                tracing::trace!(
                    key = %tracked.job.destination.object_key,
                    backlog = self.backlog.len() + 1,
                    "All handles busy, job waits in backlog"
                );
                self.backlog.push_back(tracked);
            }
            Acquire::Failed(tracked, e) => {
                tracing::error!(error = %e, "Failed to create transfer handle");
                self.finalize(tracked, Classification::LocalIo);
            }
        }
    }

    /// Build a fresh request for the job bound to `slot` and start it.
    fn launch(&mut self, slot: SlotId) {
        let timeout = self.shared.options.lock().timeout;
        let date = http_date(chrono::Utc::now());
        let Some((connection, tracked)) = self.pool.get_mut(slot) else {
            tracing::warn!(slot, "Launch requested for an idle handle");
            return;
        };

        let prepared = match request::prepare(&mut tracked.job, &self.urls, timeout, &date) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(
                    key = %tracked.job.destination.object_key,
                    error = %e,
                    "Failed to read payload"
                );
                if let Some(tracked) = self.pool.release(slot) {
                    self.publish_handles_in_use();
                    self.finalize(tracked, Classification::LocalIo);
                }
                return;
            }
        };

        let state = &mut tracked.job.state;
        if state.phase == JobPhase::Retrying {
            state.retries += 1;
            self.shared.stats.record_retry();
            metrics::record_retry();
        }
        state.phase = JobPhase::InFlight;
        state.attempts += 1;
        self.shared.stats.record_request();
        metrics::record_request(prepared.method.as_str());

        tracing::debug!(
            slot,
            method = %prepared.method,
            bucket = %tracked.job.destination.bucket,
            key = %tracked.job.destination.object_key,
            attempt = state.attempts,
            "Launching request"
        );

        let connection = connection.clone();
        let transport = Arc::clone(&self.transport);
        self.in_flight.push(Box::pin(async move {
            let outcome = transport.perform(&connection, prepared).await;
            Event::Transferred { slot, outcome }
        }));
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::BackoffElapsed { slot } => self.launch(slot),
            Event::Transferred { slot, outcome } => self.complete(slot, outcome),
        }
    }

    fn complete(&mut self, slot: SlotId, outcome: TransferOutcome) {
        let retry = self.shared.options.lock().retry;
        let Some((_, tracked)) = self.pool.get_mut(slot) else {
            tracing::warn!(slot, "Transfer finished on an idle handle");
            return;
        };

        let method = tracked.job.state.method.clone();
        self.shared
            .stats
            .record_transfer(outcome.bytes_sent, outcome.elapsed);
        metrics::record_transfer(
            method.as_str(),
            outcome.bytes_sent,
            outcome.elapsed.as_secs_f64(),
        );

        let job = &mut tracked.job;
        job.state.bytes_sent += outcome.bytes_sent;
        let classification = probe_result(
            job.kind,
            job.conditional,
            &method,
            Classification::from_outcome(&outcome),
        );

        if let Err(failure) = &outcome.result {
            tracing::debug!(
                key = %job.destination.object_key,
                error = %failure,
                "Transfer failed"
            );
        }

        let next = match classification {
            None => Next::SwitchToPut,
            Some(c) if retry.should_retry(c, job.state.retries) => {
                Next::Retry(retry.next_backoff(job.state.backoff, &mut self.rng))
            }
            Some(c) => Next::Finalize(c),
        };

        match next {
            Next::SwitchToPut => {
                job.state.method = Method::PUT;
                job.state.phase = JobPhase::Bound;
                self.launch(slot);
            }
            Next::Retry(backoff) => {
                // The retry is counted once its attempt is launched
                job.state.backoff = backoff;
                job.state.backoffs.push(backoff);
                job.state.phase = JobPhase::Retrying;

                tracing::info!(
                    key = %job.destination.object_key,
                    retry = job.state.retries + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying request"
                );

                self.in_flight.push(Box::pin(async move {
                    tokio::time::sleep(backoff).await;
                    Event::BackoffElapsed { slot }
                }));
            }
            Next::Finalize(classification) => {
                if let Some(tracked) = self.pool.release(slot) {
                    self.publish_handles_in_use();
                    self.finalize(tracked, classification);
                }
            }
        }
    }

    fn finalize(&self, tracked: Tracked, classification: Classification) {
        let report = tracked.finalize(classification);
        metrics::record_job(classification);

        if report.is_success() {
            tracing::debug!(
                bucket = %report.bucket,
                key = %report.object_key,
                attempts = report.attempts,
                "Job finished"
            );
        } else {
            tracing::warn!(
                bucket = %report.bucket,
                key = %report.object_key,
                outcome = %classification,
                attempts = report.attempts,
                retries = report.retries,
                "Job failed"
            );
        }
    }

    fn publish_handles_in_use(&mut self) {
        let in_use = self.pool.in_use();
        self.shared.stats.set_handles_in_use(in_use);
        if in_use > self.published_handles {
            metrics::handles_bound(in_use - self.published_handles);
        } else {
            metrics::handles_released(self.published_handles - in_use);
        }
        self.published_handles = in_use;
    }

    /// Fail queued and waiting jobs, give running transfers a short grace
    /// period, then fail whatever is left.
    async fn shutdown(&mut self) {
        self.jobs.close();
        while let Ok(tracked) = self.jobs.try_recv() {
            self.backlog.push_back(tracked);
        }

        let queued: Vec<Tracked> = self.backlog.drain(..).collect();
        let waiting = self
            .pool
            .release_matching(|tracked| tracked.job.state.phase == JobPhase::Retrying);
        let pending = queued.len() + waiting.len();
        for tracked in queued.into_iter().chain(waiting) {
            self.finalize(tracked, Classification::LocalIo);
        }

        let deadline = Instant::now() + self.shutdown_grace;
        while self.pool.in_use() > 0 {
            match tokio::time::timeout_at(deadline, self.in_flight.next()).await {
                Ok(Some(Event::Transferred { slot, outcome })) => {
                    self.shared
                        .stats
                        .record_transfer(outcome.bytes_sent, outcome.elapsed);
                    if let Some(mut tracked) = self.pool.release(slot) {
                        metrics::record_transfer(
                            tracked.job.state.method.as_str(),
                            outcome.bytes_sent,
                            outcome.elapsed.as_secs_f64(),
                        );
                        tracked.job.state.bytes_sent += outcome.bytes_sent;
                        let job = &tracked.job;
                        // A probe that wanted to continue as an upload is unfinished
                        let classification = probe_result(
                            job.kind,
                            job.conditional,
                            &job.state.method,
                            Classification::from_outcome(&outcome),
                        )
                        .unwrap_or(Classification::LocalIo);
                        self.finalize(tracked, classification);
                    }
                }
                // Handle already released above
                Ok(Some(Event::BackoffElapsed { .. })) => {}
                Ok(None) | Err(_) => break,
            }
        }
        self.in_flight.clear();

        let unfinished = self.pool.release_matching(|_| true);
        let aborted = unfinished.len();
        for tracked in unfinished {
            self.finalize(tracked, Classification::LocalIo);
        }
        self.publish_handles_in_use();

        if pending + aborted > 0 {
            tracing::warn!(
                pending,
                aborted,
                "Upload event loop shut down with outstanding jobs"
            );
        }
    }
}

/// Apply probe semantics to an attempt's classification.
///
/// Returns `None` when a probe-then-put job should continue with the upload.
fn probe_result(
    kind: RequestKind,
    conditional: bool,
    method: &Method,
    classification: Classification,
) -> Option<Classification> {
    if *method != Method::HEAD {
        return Some(classification);
    }
    match classification {
        Classification::NotFound if kind == RequestKind::HeadThenPut => None,
        // The object exists, which a conditional write must not overwrite
        Classification::Success if conditional => Some(Classification::AccessDenied),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_of_missing_object_switches_to_put() {
        assert_eq!(
            probe_result(
                RequestKind::HeadThenPut,
                false,
                &Method::HEAD,
                Classification::NotFound
            ),
            None
        );
    }

    #[test]
    fn test_plain_probe_reports_not_found() {
        assert_eq!(
            probe_result(
                RequestKind::Head,
                false,
                &Method::HEAD,
                Classification::NotFound
            ),
            Some(Classification::NotFound)
        );
    }

    #[test]
    fn test_conditional_probe_of_existing_object_is_denied() {
        for kind in [RequestKind::Head, RequestKind::HeadThenPut] {
            assert_eq!(
                probe_result(kind, true, &Method::HEAD, Classification::Success),
                Some(Classification::AccessDenied)
            );
        }
    }

    #[test]
    fn test_unconditional_probe_of_existing_object_succeeds() {
        assert_eq!(
            probe_result(
                RequestKind::HeadThenPut,
                false,
                &Method::HEAD,
                Classification::Success
            ),
            Some(Classification::Success)
        );
    }

    #[test]
    fn test_put_results_pass_through() {
        assert_eq!(
            probe_result(
                RequestKind::HeadThenPut,
                true,
                &Method::PUT,
                Classification::NotFound
            ),
            Some(Classification::NotFound)
        );
    }
}
