//! Time-boxed profiling sessions

use crate::leaks::{detect_leaks, DetectedLeak, LeakSignals, LeakThresholds, DOM_STATS_SCRIPT};
use crate::report::{AllocationProfile, HeapSnapshot, MemoryProfile, ProfileSummary};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use pressure_types::{now_millis, MemoryError, PlatformProbe, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Options of a profiling session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilingOptions {
    /// Session length before it stops on its own
    pub duration_ms: u64,
    /// Time between allocation samples
    pub interval_ms: u64,
    /// Capture a heap snapshot with every sample and at the end
    pub take_snapshots: bool,
    /// Upper bound on snapshots kept per session
    pub max_snapshots: usize,
    /// Run leak heuristics when the session ends
    pub detect_leaks: bool,
    /// Target whose DOM is inspected and whose renderer is snapshotted
    pub target_id: Option<u64>,
}

impl Default for ProfilingOptions {
    fn default() -> Self {
        Self {
            duration_ms: 60_000,
            interval_ms: 5_000,
            take_snapshots: false,
            max_snapshots: 10,
            detect_leaks: true,
            target_id: None,
        }
    }
}

impl ProfilingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_snapshots(mut self, take_snapshots: bool) -> Self {
        self.take_snapshots = take_snapshots;
        self
    }

    pub fn with_target(mut self, target_id: u64) -> Self {
        self.target_id = Some(target_id);
        self
    }
}

/// Mutable state of a running session
#[derive(Debug)]
struct SessionData {
    snapshots: Vec<HeapSnapshot>,
    samples: Vec<AllocationProfile>,
    initial_memory: u64,
    peak_memory: u64,
    last_heap_used: u64,
    stopped: bool,
}

impl SessionData {
    fn can_snapshot(&self, options: &ProfilingOptions) -> bool {
        options.take_snapshots && !self.stopped && self.snapshots.len() < options.max_snapshots
    }
}

struct Session {
    id: String,
    options: ProfilingOptions,
    start_time: u64,
    data: Mutex<SessionData>,
    sampler: Mutex<Option<JoinHandle<()>>>,
    deadline: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Record one allocation sample; returns false once the session stopped
    fn record_sample(&self, probe: &dyn PlatformProbe) -> bool {
        let heap = probe.heap_usage();
        let mut data = self.data.lock();
        if data.stopped {
            return false;
        }
        let delta = heap.heap_used as i64 - data.last_heap_used as i64;
        data.last_heap_used = heap.heap_used;
        data.peak_memory = data.peak_memory.max(heap.heap_used);
        data.samples.push(AllocationProfile {
            timestamp: now_millis(),
            heap_used: heap.heap_used,
            heap_total: heap.heap_total,
            delta,
            net_allocations: heap.heap_used,
            fragmentation_ratio: heap.fragmentation_ratio(),
        });
        true
    }

    /// Capture a snapshot if the session still wants one; failures are logged
    async fn capture_snapshot(&self, probe: &dyn PlatformProbe) {
        if !self.data.lock().can_snapshot(&self.options) {
            return;
        }
        match probe.capture_heap_snapshot(self.options.target_id).await {
            Ok(captured) => {
                let mut data = self.data.lock();
                // the session may have stopped while the capture was in flight
                if data.can_snapshot(&self.options) {
                    data.snapshots
                        .push(HeapSnapshot::from_captured(captured, now_millis()));
                }
            }
            Err(e) => warn!(session = %self.id, error = %e, "Heap snapshot failed"),
        }
    }
}

/// Reports of auto-stopped sessions kept for a later stop call
const MAX_COMPLETED: usize = 16;

struct ProfilerInner {
    probe: Arc<dyn PlatformProbe>,
    sessions: DashMap<String, Arc<Session>>,
    /// Sessions whose report is being built; the flag flips once it is published
    finishing: DashMap<String, watch::Receiver<bool>>,
    completed: Mutex<VecDeque<MemoryProfile>>,
    thresholds: LeakThresholds,
}

/// Outcome of trying to stop a session
enum Claim<'a> {
    /// This caller stops the session and builds the report
    Owner(Arc<Session>, FinishGuard<'a>),
    /// Another caller is building the report
    Waiter(watch::Receiver<bool>),
}

/// Publishes a finished session to its waiters when dropped
struct FinishGuard<'a> {
    inner: &'a ProfilerInner,
    id: String,
    done: watch::Sender<bool>,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.done.send_replace(true);
        self.inner.finishing.remove(&self.id);
    }
}

/// Runs profiling sessions against a [`PlatformProbe`]
///
/// Sessions sample on a tokio interval, so every method that starts one must
/// be called from within a runtime.
#[derive(Clone)]
pub struct Profiler {
    inner: Arc<ProfilerInner>,
}

impl Profiler {
    pub fn new(probe: Arc<dyn PlatformProbe>) -> Self {
        Self::with_thresholds(probe, LeakThresholds::default())
    }

    pub fn with_thresholds(probe: Arc<dyn PlatformProbe>, thresholds: LeakThresholds) -> Self {
        Self {
            inner: Arc::new(ProfilerInner {
                probe,
                sessions: DashMap::new(),
                finishing: DashMap::new(),
                completed: Mutex::new(VecDeque::new()),
                thresholds,
            }),
        }
    }

    /// Start a session and return its id
    pub fn start_profiling(&self, options: ProfilingOptions) -> String {
        let id = Uuid::new_v4().to_string();
        let heap = self.inner.probe.heap_usage();
        let interval = Duration::from_millis(options.interval_ms.max(1));
        let duration = Duration::from_millis(options.duration_ms);

        let session = Arc::new(Session {
            id: id.clone(),
            options,
            start_time: now_millis(),
            data: Mutex::new(SessionData {
                snapshots: Vec::new(),
                samples: Vec::new(),
                initial_memory: heap.heap_used,
                peak_memory: heap.heap_used,
                last_heap_used: heap.heap_used,
                stopped: false,
            }),
            sampler: Mutex::new(None),
            deadline: Mutex::new(None),
        });

        let sampler = {
            let session = Arc::clone(&session);
            let probe = Arc::clone(&self.inner.probe);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !session.record_sample(probe.as_ref()) {
                        break;
                    }
                    session.capture_snapshot(probe.as_ref()).await;
                }
            })
        };

        let deadline = {
            let inner = Arc::clone(&self.inner);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Some(Claim::Owner(session, _guard)) = inner.claim(&id) {
                    let profile = inner.finish(&session, false).await;
                    info!(session = %id, "Profiling session reached its duration");
                    inner.retain(profile);
                }
            })
        };

        *session.sampler.lock() = Some(sampler);
        *session.deadline.lock() = Some(deadline);
        self.inner.sessions.insert(id.clone(), session);
        info!(session = %id, "Profiling session started");
        id
    }

    /// Stop a session and return its report
    ///
    /// A session that stopped on its own hands back its retained report once,
    /// including while that report is still being built.
    pub async fn stop_profiling(&self, session_id: &str) -> Result<MemoryProfile> {
        match self.inner.claim(session_id) {
            Some(Claim::Owner(session, _guard)) => {
                let profile = self.inner.finish(&session, true).await;
                info!(session = session_id, "Profiling session stopped");
                return Ok(profile);
            }
            Some(Claim::Waiter(mut done)) => {
                debug!(session = session_id, "Waiting for session report");
                // a dropped sender also means the report is settled
                let _ = done.wait_for(|finished| *finished).await;
            }
            None => {}
        }
        self.take_completed(session_id)
            .ok_or_else(|| MemoryError::SessionNotFound(session_id.to_string()))
    }

    /// Report of a session that stopped when its duration elapsed
    pub fn take_completed(&self, session_id: &str) -> Option<MemoryProfile> {
        let mut completed = self.inner.completed.lock();
        let pos = completed.iter().position(|p| p.session_id == session_id)?;
        completed.remove(pos)
    }

    /// Ids of running sessions
    pub fn active_sessions(&self) -> Vec<String> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of samples recorded so far by a running session
    pub fn sample_count(&self, session_id: &str) -> Option<usize> {
        self.inner
            .sessions
            .get(session_id)
            .map(|session| session.data.lock().samples.len())
    }

    /// Stop every running session, discarding their reports
    pub async fn stop_all(&self) {
        for id in self.active_sessions() {
            if let Some(Claim::Owner(session, _guard)) = self.inner.claim(&id) {
                self.inner.finish(&session, true).await;
                debug!(session = %id, "Profiling session discarded");
            }
        }
    }
}

impl ProfilerInner {
    /// Decide who stops `session_id`
    ///
    /// A session enters `finishing` before it leaves `sessions`, and its report
    /// is retained before it leaves `finishing`, so a known id is always found
    /// in one of the three places.
    fn claim(&self, session_id: &str) -> Option<Claim<'_>> {
        let running = self
            .sessions
            .get(session_id)
            .map(|session| Arc::clone(session.value()));

        let Some(session) = running else {
            return self
                .finishing
                .get(session_id)
                .map(|done| Claim::Waiter(done.value().clone()));
        };

        match self.finishing.entry(session_id.to_string()) {
            Entry::Occupied(entry) => Some(Claim::Waiter(entry.get().clone())),
            Entry::Vacant(entry) => {
                let (done, waiting) = watch::channel(false);
                entry.insert(waiting);
                self.sessions.remove(session_id);
                Some(Claim::Owner(
                    session,
                    FinishGuard {
                        inner: self,
                        id: session_id.to_string(),
                        done,
                    },
                ))
            }
        }
    }

    /// Keep an auto-stopped report, dropping the oldest past the cap
    fn retain(&self, profile: MemoryProfile) {
        let mut completed = self.completed.lock();
        completed.push_back(profile);
        while completed.len() > MAX_COMPLETED {
            if let Some(dropped) = completed.pop_front() {
                debug!(session = %dropped.session_id, "Uncollected profiling report dropped");
            }
        }
    }

    /// Stop a claimed session and build its report
    async fn finish(&self, session: &Session, abort_deadline: bool) -> MemoryProfile {
        if let Some(sampler) = session.sampler.lock().take() {
            sampler.abort();
        }
        let deadline = session.deadline.lock().take();
        if abort_deadline {
            if let Some(deadline) = deadline {
                deadline.abort();
            }
        }

        // final snapshot, taken before the session is sealed
        session.capture_snapshot(self.probe.as_ref()).await;
        let final_heap = self.probe.heap_usage();

        let (snapshots, samples, initial_memory, peak_memory) = {
            let mut data = session.data.lock();
            data.stopped = true;
            (
                std::mem::take(&mut data.snapshots),
                std::mem::take(&mut data.samples),
                data.initial_memory,
                data.peak_memory,
            )
        };

        let leaks = if session.options.detect_leaks {
            self.collect_leaks(session).await
        } else {
            Vec::new()
        };

        let summary = ProfileSummary::compute(
            initial_memory,
            final_heap.heap_used,
            peak_memory,
            &samples,
            leaks.len(),
        );
        let end_time = now_millis();

        MemoryProfile {
            session_id: session.id.clone(),
            start_time: session.start_time,
            end_time,
            duration_ms: end_time.saturating_sub(session.start_time),
            recommendation: summary.recommendation(),
            snapshots,
            allocation_profiles: samples,
            leaks,
            summary,
        }
    }

    async fn collect_leaks(&self, session: &Session) -> Vec<DetectedLeak> {
        let mut signals = LeakSignals {
            active_handles: Some(self.probe.active_handles() as u64),
            ..Default::default()
        };

        if let Some(target_id) = session.options.target_id {
            match self.probe.evaluate(target_id, DOM_STATS_SCRIPT).await {
                Ok(stats) => signals = signals.with_dom_stats(&stats),
                Err(e) => warn!(session = %session.id, error = %e, "DOM statistics unavailable"),
            }
        }

        detect_leaks(&signals, &self.thresholds)
    }
}
