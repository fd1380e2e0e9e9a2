//! Core functionality for actual scanning behaviour.
use crate::address::AddressSweep;
use crate::input::OverflowPolicy;
use crate::probe::Probe;
use log::debug;

mod results;
pub use results::ResultQueue;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// One unit of work: probe a single port on a single address.
///
/// Created by the dispatch loop and consumed exactly once by exactly one
/// worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanJob {
    /// Address under test.
    pub address: Ipv4Addr,
    /// Port under test.
    pub port: u16,
}

impl ScanJob {
    fn target(self) -> SocketAddr {
        SocketAddr::from((self.address, self.port))
    }

    fn result_line(self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Sizing and flow-control knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of probe workers. Also the capacity of the job queue, so
    /// the dispatch loop can run at most one queue depth ahead of the
    /// pool.
    pub workers: usize,
    /// Capacity of the results channel.
    pub result_buffer: usize,
    /// What happens to new results while the results channel is full.
    pub overflow: OverflowPolicy,
}

/// The scan engine: a fixed worker pool fed by an unbounded address
/// sweep.
///
/// The dispatch loop walks the sweep in address-then-port order and
/// blocks once the job queue is full; the infinite sequence can never
/// outrun the pool by more than one queue depth. Completion order is
/// whatever the network makes it, so results surface on the
/// [`ResultQueue`] out of dispatch order.
#[derive(Debug)]
pub struct ScanEngine<P> {
    probe: Arc<P>,
    config: EngineConfig,
}

impl<P: Probe> ScanEngine<P> {
    /// Pairs a probe implementation with the engine configuration.
    pub fn new(probe: P, config: EngineConfig) -> Self {
        Self {
            probe: Arc::new(probe),
            config,
        }
    }

    /// Spawns the dispatch loop and the worker pool.
    ///
    /// The sweep runs until `cancel` fires; cancellation is observed
    /// between jobs, never mid-probe. Jobs already queued at that point
    /// are still probed, so the in-flight counter always drains to zero.
    ///
    /// # Panics
    ///
    /// Panics when the worker count is zero or the port list is empty;
    /// both would make the sweep a no-op that still spins forever.
    pub fn spawn(&self, start: Ipv4Addr, ports: Vec<u16>, cancel: CancellationToken) -> ScanHandle {
        assert!(self.config.workers > 0, "worker count must be non-zero");
        assert!(!ports.is_empty(), "port list must be non-empty");

        let (jobs_tx, jobs_rx) = mpsc::channel::<ScanJob>(self.config.workers);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let (cursor_tx, cursor_rx) = watch::channel(start);
        let results = Arc::new(ResultQueue::new(
            self.config.result_buffer,
            self.config.overflow,
        ));
        let in_flight = Arc::new(AtomicU64::new(0));

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            workers.spawn(worker_loop(
                id,
                Arc::clone(&jobs_rx),
                Arc::clone(&self.probe),
                Arc::clone(&results),
                Arc::clone(&in_flight),
                cancel.clone(),
            ));
        }

        let dispatch = tokio::spawn(dispatch_loop(
            start,
            ports,
            jobs_tx,
            cursor_tx,
            Arc::clone(&in_flight),
            cancel.clone(),
        ));

        let driver = tokio::spawn({
            let results = Arc::clone(&results);
            async move {
                if let Err(e) = dispatch.await {
                    debug!("Dispatch loop aborted: {e}");
                }
                while let Some(joined) = workers.join_next().await {
                    if let Err(e) = joined {
                        debug!("Worker aborted: {e}");
                    }
                }
                // Only now is the results channel certain to stay empty.
                results.close();
            }
        });

        ScanHandle {
            results,
            cursor: cursor_rx,
            cancel,
            in_flight,
            driver,
        }
    }
}

/// Feeds the job queue from the infinite sweep, publishing the cursor as
/// it goes. Blocks on a full queue; that is the backpressure path.
async fn dispatch_loop(
    start: Ipv4Addr,
    ports: Vec<u16>,
    jobs: mpsc::Sender<ScanJob>,
    cursor: watch::Sender<Ipv4Addr>,
    in_flight: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    for address in AddressSweep::new(start) {
        if cancel.is_cancelled() {
            break;
        }
        // Published before the ports are queued so the reporter never
        // trails the queue by more than one address.
        cursor.send_replace(address);

        for &port in &ports {
            let job = ScanJob { address, port };
            in_flight.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = cancel.cancelled() => {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
                sent = jobs.send(job) => {
                    if sent.is_err() {
                        debug!("Job queue closed under the dispatch loop");
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }
    }
}

/// Pulls jobs until the queue closes and probes each exactly once.
async fn worker_loop<P: Probe>(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<ScanJob>>>,
    probe: Arc<P>,
    results: Arc<ResultQueue>,
    in_flight: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            debug!("Worker {id} exiting, job queue closed");
            break;
        };

        if probe.probe(job.target()).await {
            // A push stuck behind a full channel is abandoned once the
            // sweep is cancelled, so shutdown cannot wedge on a stalled
            // sink. The biased order tries the push first.
            tokio::select! {
                biased;
                () = results.push(job.result_line()) => {}
                () = cancel.cancelled() => {}
            }
        }
        in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Live handle onto a running sweep.
#[derive(Debug)]
pub struct ScanHandle {
    results: Arc<ResultQueue>,
    cursor: watch::Receiver<Ipv4Addr>,
    cancel: CancellationToken,
    in_flight: Arc<AtomicU64>,
    driver: JoinHandle<()>,
}

impl ScanHandle {
    /// Queue the positive results arrive on, in completion order.
    #[must_use]
    pub fn results(&self) -> Arc<ResultQueue> {
        Arc::clone(&self.results)
    }

    /// The address the dispatch loop is currently queueing jobs for.
    #[must_use]
    pub fn current_address(&self) -> Ipv4Addr {
        *self.cursor.borrow()
    }

    /// Watch channel carrying dispatch-cursor snapshots.
    #[must_use]
    pub fn cursor(&self) -> watch::Receiver<Ipv4Addr> {
        self.cursor.clone()
    }

    /// Jobs dispatched but not yet finished probing.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Requests a graceful stop. The dispatch loop exits between jobs
    /// and the pool drains whatever is still queued.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the sweep and waits for the dispatch loop and every
    /// worker to exit. The results channel is closed on the way out.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.driver.await {
            debug!("Engine driver aborted: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, ScanEngine, ScanHandle};
    use crate::input::OverflowPolicy;
    use crate::probe::Probe;
    use async_trait::async_trait;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    /// Answers positively for exactly one socket address.
    struct SingleHit {
        hit: SocketAddr,
        probed: AtomicU64,
    }

    impl SingleHit {
        fn new(hit: SocketAddr) -> Self {
            Self {
                hit,
                probed: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl Probe for Arc<SingleHit> {
        async fn probe(&self, target: SocketAddr) -> bool {
            self.probed.fetch_add(1, Ordering::SeqCst);
            target == self.hit
        }
    }

    /// Every probe is positive; used to exercise the results channel.
    struct AlwaysOpen;

    #[async_trait]
    impl Probe for AlwaysOpen {
        async fn probe(&self, _target: SocketAddr) -> bool {
            true
        }
    }

    /// Records every probed target, never reporting a hit.
    #[derive(Default)]
    struct Recording {
        seen: std::sync::Mutex<Vec<SocketAddr>>,
    }

    #[async_trait]
    impl Probe for Arc<Recording> {
        async fn probe(&self, target: SocketAddr) -> bool {
            self.seen.lock().unwrap().push(target);
            false
        }
    }

    /// Waits until the dispatch cursor has reached `stop` or further.
    async fn sweep_until(handle: &ScanHandle, stop: Ipv4Addr) {
        let mut cursor = handle.cursor();
        while *cursor.borrow_and_update() < stop {
            if cursor.changed().await.is_err() {
                break;
            }
        }
    }

    async fn drain(handle: ScanHandle) -> Vec<String> {
        let results = handle.results();
        handle.shutdown().await;

        let mut lines = Vec::new();
        while let Some(line) = results.pop().await {
            lines.push(line);
        }
        lines
    }

    fn config(workers: usize) -> EngineConfig {
        EngineConfig {
            workers,
            result_buffer: workers,
            overflow: OverflowPolicy::Block,
        }
    }

    #[tokio::test]
    async fn single_responder_is_reported_exactly_once() {
        let probe = Arc::new(SingleHit::new("10.0.0.5:3389".parse().unwrap()));
        let engine = ScanEngine::new(Arc::clone(&probe), config(4));
        let handle = engine.spawn(
            Ipv4Addr::new(10, 0, 0, 0),
            vec![3389],
            CancellationToken::new(),
        );

        sweep_until(&handle, Ipv4Addr::new(10, 0, 0, 10)).await;
        handle.cancel();

        let lines = drain(handle).await;
        assert_eq!(lines, vec!["10.0.0.5:3389".to_owned()]);
        // Everything up to the address before the observed cursor was
        // dispatched, and dispatched jobs are probed even after cancel.
        assert!(probe.probed.load(Ordering::SeqCst) >= 10);
    }

    #[tokio::test]
    async fn worker_count_does_not_change_the_outcome() {
        for workers in [1, 16, 1000] {
            let probe = Arc::new(SingleHit::new("10.0.0.5:3389".parse().unwrap()));
            let engine = ScanEngine::new(Arc::clone(&probe), config(workers));
            let handle = engine.spawn(
                Ipv4Addr::new(10, 0, 0, 0),
                vec![3389],
                CancellationToken::new(),
            );

            sweep_until(&handle, Ipv4Addr::new(10, 0, 0, 10)).await;
            handle.cancel();

            let lines = drain(handle).await;
            assert_eq!(lines, vec!["10.0.0.5:3389".to_owned()], "workers = {workers}");
        }
    }

    #[tokio::test]
    async fn jobs_follow_address_then_port_order() {
        let probe = Arc::new(Recording::default());
        let engine = ScanEngine::new(Arc::clone(&probe), config(1));
        let handle = engine.spawn(
            Ipv4Addr::new(10, 1, 0, 0),
            vec![80, 443],
            CancellationToken::new(),
        );

        sweep_until(&handle, Ipv4Addr::new(10, 1, 0, 3)).await;
        handle.cancel();
        drain(handle).await;

        // One worker probes in dispatch order: every port of an address
        // before the next address.
        let seen = probe.seen.lock().unwrap();
        let expected: Vec<SocketAddr> = ["10.1.0.0:80", "10.1.0.0:443", "10.1.0.1:80", "10.1.0.1:443"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert!(seen.len() >= expected.len());
        assert_eq!(seen[..expected.len()], expected[..]);
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_to_zero() {
        let probe = Arc::new(SingleHit::new("192.0.2.1:1".parse().unwrap()));
        let engine = ScanEngine::new(Arc::clone(&probe), config(2));
        let handle = engine.spawn(
            Ipv4Addr::new(10, 0, 0, 0),
            vec![3389, 3390],
            CancellationToken::new(),
        );

        sweep_until(&handle, Ipv4Addr::new(10, 0, 0, 50)).await;
        handle.cancel();

        let in_flight = Arc::clone(&handle.in_flight);
        timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown must not deadlock");
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn full_block_channel_throttles_the_dispatch_loop() {
        let engine = ScanEngine::new(
            AlwaysOpen,
            EngineConfig {
                workers: 2,
                result_buffer: 1,
                overflow: OverflowPolicy::Block,
            },
        );
        let handle = engine.spawn(
            Ipv4Addr::new(10, 0, 0, 0),
            vec![3389],
            CancellationToken::new(),
        );

        // With nobody draining results, the whole pipeline must stall.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stalled_at = handle.current_address();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.current_address(), stalled_at);

        handle.cancel();
        let lines = drain(handle).await;
        assert!(!lines.is_empty());
    }

    #[tokio::test]
    async fn drop_oldest_keeps_sweeping_and_counts_drops() {
        let engine = ScanEngine::new(
            AlwaysOpen,
            EngineConfig {
                workers: 2,
                result_buffer: 2,
                overflow: OverflowPolicy::DropOldest,
            },
        );
        let handle = engine.spawn(
            Ipv4Addr::new(10, 0, 0, 0),
            vec![3389],
            CancellationToken::new(),
        );

        sweep_until(&handle, Ipv4Addr::new(10, 0, 0, 20)).await;
        handle.cancel();

        let results = handle.results();
        handle.shutdown().await;
        assert!(results.len() <= 2);
        assert!(results.dropped() > 0);
    }
}
