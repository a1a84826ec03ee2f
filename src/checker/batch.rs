//! Bounded-concurrency probing with attempt-based stability scoring

use futures::future::join_all;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::probe::ProxyProbe;
use crate::error::{Result, SieveError};
use crate::models::{Endpoint, ProbeOutcome, StabilityRecord};

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Timeout handed to every single probe
    pub timeout: Duration,
    /// Upper bound on concurrently running probes
    pub batch_size: usize,
    /// Full sweeps per run; 1 degrades to a plain availability check
    pub attempts: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(4000),
            batch_size: 25,
            attempts: 1,
        }
    }
}

/// Split into `ceil(len / batch_size)` ordered chunks
pub fn divide_into_batches<T>(items: &[T], batch_size: usize) -> Vec<&[T]> {
    items.chunks(batch_size.max(1)).collect()
}

/// Endpoints whose stability meets `threshold` (inclusive)
pub fn passing(records: &[StabilityRecord], threshold: f64) -> Vec<Endpoint> {
    records
        .iter()
        .filter(|r| r.passes(threshold))
        .map(|r| r.proxy.clone())
        .collect()
}

/// Runs a probe strategy over candidate endpoints batch by batch
///
/// Members of a batch are probed concurrently and the batch fully settles
/// before the next one starts, so at most `batch_size` probes are in flight.
/// Probes run inside this future rather than as detached tasks, so dropping
/// a run tears down everything it started.
pub struct BatchOrchestrator {
    probe: Arc<dyn ProxyProbe>,
    settings: BatchSettings,
}

impl BatchOrchestrator {
    pub fn new(probe: Arc<dyn ProxyProbe>, settings: BatchSettings) -> Self {
        Self { probe, settings }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Same orchestration with a single attempt, regardless of settings
    pub fn single_attempt(&self) -> Self {
        Self {
            probe: self.probe.clone(),
            settings: BatchSettings {
                attempts: 1,
                ..self.settings.clone()
            },
        }
    }

    /// One stability record per candidate, in input order
    pub async fn run(&self, candidates: &[Endpoint]) -> Vec<StabilityRecord> {
        match self.execute(candidates, &mut Unstoppable).await {
            Ok(records) => records,
            Err(never) => match never {},
        }
    }

    /// Like [`BatchOrchestrator::run`], aborting with `Cancelled` once
    /// `cancel` turns true
    pub async fn run_until(
        &self,
        candidates: &[Endpoint],
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Vec<StabilityRecord>> {
        self.execute(candidates, &mut cancel).await
    }

    async fn execute<S: StopSignal + Send>(
        &self,
        candidates: &[Endpoint],
        stop: &mut S,
    ) -> std::result::Result<Vec<StabilityRecord>, S::Stopped> {
        let attempts = self.settings.attempts.max(1);
        let batches = divide_into_batches(candidates, self.settings.batch_size);
        let mut successes = vec![0u32; candidates.len()];
        let mut metas: Vec<Option<HashMap<String, String>>> = vec![None; candidates.len()];

        info!(
            "Probing {} candidates with {} in {} batches x {} attempts",
            candidates.len(),
            self.probe.name(),
            batches.len(),
            attempts
        );

        for attempt in 1..=attempts {
            let mut offset = 0;

            for (index, batch) in batches.iter().enumerate() {
                stop.check()?;

                let sweep = join_all(batch.iter().map(|proxy| self.attempt(proxy)));
                let results = tokio::select! {
                    results = sweep => results,
                    reason = stop.stopped() => return Err(reason),
                };

                let passed = results.iter().filter(|r| r.is_some()).count();
                let slots = offset..offset + batch.len();
                for ((count, meta), result) in successes[slots.clone()]
                    .iter_mut()
                    .zip(&mut metas[slots])
                    .zip(results)
                {
                    if let Some(outcome) = result {
                        *count += 1;
                        if outcome.response_meta.is_some() {
                            *meta = outcome.response_meta;
                        }
                    }
                }
                offset += batch.len();

                debug!(
                    "Attempt {}/{} batch {}/{}: {}/{} available",
                    attempt,
                    attempts,
                    index + 1,
                    batches.len(),
                    passed,
                    batch.len()
                );
            }
        }

        Ok(candidates
            .iter()
            .zip(successes)
            .zip(metas)
            .map(|((proxy, count), meta)| {
                StabilityRecord::new(proxy.clone(), count, attempts).with_meta(meta)
            })
            .collect())
    }

    /// The outcome of a successful probe; a failure is a non-success, never an abort
    async fn attempt(&self, proxy: &Endpoint) -> Option<ProbeOutcome> {
        let timeout = self.settings.timeout;
        match self.probe.probe(proxy, timeout).await {
            Ok(outcome) if outcome.available => {
                debug!(
                    proxy = %proxy,
                    headers = ?outcome.response_meta,
                    "Probe succeeded"
                );
                Some(outcome)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(
                    proxy = %proxy,
                    timeout_ms = timeout.as_millis() as u64,
                    "Probe failed: {}",
                    e
                );
                None
            }
        }
    }
}

/// Stop condition checked before each batch and raced against it
trait StopSignal {
    type Stopped;

    fn check(&self) -> std::result::Result<(), Self::Stopped>;

    fn stopped(&mut self) -> impl Future<Output = Self::Stopped> + Send;
}

/// Plain runs cannot be stopped from outside
struct Unstoppable;

impl StopSignal for Unstoppable {
    type Stopped = Infallible;

    fn check(&self) -> std::result::Result<(), Infallible> {
        Ok(())
    }

    fn stopped(&mut self) -> impl Future<Output = Infallible> + Send {
        std::future::pending()
    }
}

impl StopSignal for watch::Receiver<bool> {
    type Stopped = SieveError;

    fn check(&self) -> Result<()> {
        if *self.borrow() {
            Err(SieveError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn stopped(&mut self) -> impl Future<Output = SieveError> + Send {
        async move {
            cancelled(self).await;
            SieveError::Cancelled
        }
    }
}

/// Resolves once the flag is true; never if the sender goes away first
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::checker::probe::ProxyProbe;
    use crate::error::{Result, SieveError};
    use crate::models::{Endpoint, ProbeOutcome};

    /// Deterministic probe: per-endpoint scripted answers, counted calls
    ///
    /// Endpoints without a script succeed when listed in `always_up`.
    #[derive(Default)]
    pub struct ScriptedProbe {
        scripts: Mutex<HashMap<Endpoint, Vec<bool>>>,
        always_up: HashSet<Endpoint>,
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub meta: Option<HashMap<String, String>>,
    }

    impl ScriptedProbe {
        pub fn up(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
            Self {
                always_up: endpoints.into_iter().collect(),
                ..Default::default()
            }
        }

        pub fn script(self, endpoint: Endpoint, answers: Vec<bool>) -> Self {
            self.scripts.lock().insert(endpoint, answers);
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Headers reported with every successful answer
        pub fn with_meta(mut self, meta: HashMap<String, String>) -> Self {
            self.meta = Some(meta);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProxyProbe for ScriptedProbe {
        async fn probe(&self, proxy: &Endpoint, timeout: Duration) -> Result<ProbeOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let scripted = {
                let mut scripts = self.scripts.lock();
                scripts.get_mut(proxy).and_then(|answers| {
                    if answers.is_empty() {
                        None
                    } else {
                        Some(answers.remove(0))
                    }
                })
            };

            let up = scripted.unwrap_or_else(|| self.always_up.contains(proxy));
            if up {
                Ok(ProbeOutcome::available(proxy.clone(), self.meta.clone()))
            } else {
                Err(SieveError::ProbeTimeout {
                    proxy: proxy.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProbe;
    use super::*;
    use crate::models::{ProbeOutcome, Protocol};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn endpoints(n: u16) -> Vec<Endpoint> {
        (1..=n)
            .map(|i| Endpoint::new(Protocol::Http, "10.0.0.1", 8000 + i))
            .collect()
    }

    fn settings(batch_size: usize, attempts: u32) -> BatchSettings {
        BatchSettings {
            timeout: Duration::from_millis(100),
            batch_size,
            attempts,
        }
    }

    /// Records start/end events and the peak number of in-flight probes
    #[derive(Default)]
    struct TracingProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProxyProbe for TracingProbe {
        async fn probe(&self, proxy: &Endpoint, _timeout: Duration) -> Result<ProbeOutcome> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.events.lock().push(format!("start:{}", proxy.port));

            // The first endpoint hangs far longer than its siblings
            let delay = if proxy.port == 8001 { 500 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.events.lock().push(format!("end:{}", proxy.port));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ProbeOutcome::available(proxy.clone(), None))
        }

        fn name(&self) -> &'static str {
            "tracing"
        }
    }

    #[test]
    fn test_divide_into_batches_sizes() {
        let items = endpoints(5);
        let batches = divide_into_batches(&items, 2);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[2][0], items[4]);

        assert!(divide_into_batches::<Endpoint>(&[], 3).is_empty());
        assert_eq!(divide_into_batches(&items, 0).len(), 5);
    }

    #[tokio::test]
    async fn test_all_records_returned_despite_failures() {
        let items = endpoints(5);
        let probe = Arc::new(ScriptedProbe::up([items[1].clone(), items[3].clone()]));
        let orchestrator = BatchOrchestrator::new(probe.clone(), settings(2, 1));

        let records = orchestrator.run(&items).await;

        assert_eq!(records.len(), 5);
        let proxies: Vec<Endpoint> = records.iter().map(|r| r.proxy.clone()).collect();
        assert_eq!(proxies, items);
        assert_eq!(
            passing(&records, 1.0),
            vec![items[1].clone(), items[3].clone()]
        );
        assert_eq!(probe.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_run_sequentially_with_bounded_concurrency() {
        let items = endpoints(5);
        let probe = Arc::new(TracingProbe::default());
        let orchestrator = BatchOrchestrator::new(probe.clone(), settings(2, 1));

        orchestrator.run(&items).await;

        assert_eq!(probe.peak.load(Ordering::SeqCst), 2);

        let events = probe.events.lock().clone();
        let pos = |e: &str| events.iter().position(|x| x == e).unwrap();

        // The sibling of the slow probe is not held up by it
        assert!(pos("end:8002") < pos("end:8001"));
        // The next batch waits for the slow probe to settle
        assert!(pos("end:8001") < pos("start:8003"));
        assert!(pos("end:8004") < pos("start:8005"));
    }

    #[tokio::test]
    async fn test_stability_accumulates_across_attempts() {
        let items = endpoints(2);
        let probe = Arc::new(
            ScriptedProbe::default()
                .script(items[0].clone(), vec![true, false, true, true])
                .script(items[1].clone(), vec![false, false, true, false]),
        );
        let orchestrator = BatchOrchestrator::new(probe.clone(), settings(25, 4));

        let records = orchestrator.run(&items).await;

        assert_eq!(records[0].success_count, 3);
        assert_eq!(records[0].attempts, 4);
        assert_eq!(records[0].stability, 0.75);
        assert_eq!(records[1].stability, 0.25);

        assert_eq!(passing(&records, 0.6), vec![items[0].clone()]);
        assert!(passing(&records, 0.8).is_empty());
        assert_eq!(probe.call_count(), 8);
    }

    #[tokio::test]
    async fn test_single_attempt_overrides_attempts() {
        let items = endpoints(3);
        let probe = Arc::new(ScriptedProbe::up(items.clone()));
        let orchestrator = BatchOrchestrator::new(probe.clone(), settings(2, 5)).single_attempt();

        let records = orchestrator.run(&items).await;
        assert!(records.iter().all(|r| r.attempts == 1 && r.stability == 1.0));
        assert_eq!(probe.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancels_outstanding_probes() {
        let items = endpoints(6);
        let probe = Arc::new(ScriptedProbe::up(items.clone()).with_delay(Duration::from_secs(10)));
        let orchestrator = BatchOrchestrator::new(probe.clone(), settings(2, 1));

        let (tx, rx) = watch::channel(false);
        let run = orchestrator.run_until(&items, rx);
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("run finished before cancel"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        tx.send(true).unwrap();

        assert!(matches!(run.await, Err(SieveError::Cancelled)));
        // Only the first batch was ever started
        assert_eq!(probe.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let orchestrator =
            BatchOrchestrator::new(Arc::new(ScriptedProbe::default()), settings(2, 3));
        assert!(orchestrator.run(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_records_carry_echoed_headers_of_successes() {
        let items = endpoints(2);
        let meta = HashMap::from([("user-agent".to_string(), "proxy-sieve".to_string())]);
        let probe = Arc::new(
            ScriptedProbe::default()
                .script(items[0].clone(), vec![false, true])
                .script(items[1].clone(), vec![false, false])
                .with_meta(meta.clone()),
        );
        let orchestrator = BatchOrchestrator::new(probe, settings(2, 2));

        let records = orchestrator.run(&items).await;

        assert_eq!(records[0].success_count, 1);
        assert_eq!(records[0].response_meta, Some(meta));
        assert_eq!(records[1].response_meta, None);
    }

    #[tokio::test]
    async fn test_run_until_with_raised_flag_probes_nothing() {
        let items = endpoints(3);
        let probe = Arc::new(ScriptedProbe::up(items.clone()));
        let orchestrator = BatchOrchestrator::new(probe.clone(), settings(2, 1));

        let (tx, rx) = watch::channel(true);
        let result = orchestrator.run_until(&items, rx).await;
        drop(tx);

        assert!(matches!(result, Err(SieveError::Cancelled)));
        assert_eq!(probe.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_until_completes_when_sender_is_gone() {
        let items = endpoints(3);
        let probe = Arc::new(ScriptedProbe::up(items.clone()));
        let orchestrator = BatchOrchestrator::new(probe.clone(), settings(2, 1));

        let (tx, rx) = watch::channel(false);
        drop(tx);

        let records = orchestrator.run_until(&items, rx).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.stability == 1.0));
    }
}
