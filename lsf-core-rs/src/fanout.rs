//! LampClients: lamp sessions and aggregate call fan-out
//!
//! One aggregate call (e.g. "turn these 12 lamps on") becomes one task per
//! connected lamp. All tasks share a [`ResponseCounter`] behind a single
//! lock; whichever task brings `num_waiting` to zero sends the one reply.
//!
//! Aggregate calls wait in a bounded queue. The drainer only performs the
//! enqueue phase (look up sessions, spawn lamp tasks), so it never waits on
//! lamp replies.
//!
//! Lamp sessions:
//!
//! ```text
//! Disconnected -> JoinInProgress -> Connected
//!                       |
//!                       +-> Retry -> (alarm) -> JoinInProgress
//!                       +-> Blacklisted -> (alarm, backoff) -> JoinInProgress
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::FanoutConfig;
use crate::error::{LsfError, LsfResult, ResponseCode};
use crate::lamp::{LampEndpoint, LampLink, LampReply, LampRequest, SessionId};
use crate::notify::{EventKind, Notification, NotificationHub};
use crate::types::{EntityKind, LampId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    JoinInProgress,
    Connected,
    Retry,
    Blacklisted,
}

struct LampConnection {
    endpoint: LampEndpoint,
    state: ConnectionState,
    session: Option<SessionId>,
    pending_calls: usize,
    join_failures: u32,
    /// Bumped (or dropped) when the session goes away; in-flight calls watch it
    generation: watch::Sender<u64>,
    retry_alarm: Option<JoinHandle<()>>,
}

impl LampConnection {
    fn new(endpoint: LampEndpoint) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            endpoint,
            state: ConnectionState::Disconnected,
            session: None,
            pending_calls: 0,
            join_failures: 0,
            generation,
            retry_alarm: None,
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(alarm) = self.retry_alarm.take() {
            alarm.abort();
        }
    }

    /// Fail in-flight calls and forget the session
    fn drop_session(&mut self) {
        self.session = None;
        self.generation.send_modify(|g| *g += 1);
    }
}

/// One lamp-level call of an aggregate
#[derive(Debug, Clone)]
pub struct LampCall {
    pub lamp_id: LampId,
    pub request: LampRequest,
}

impl LampCall {
    pub fn new(lamp_id: impl Into<LampId>, request: LampRequest) -> Self {
        Self {
            lamp_id: lamp_id.into(),
            request,
        }
    }
}

/// Result of one lamp within an aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LampOutcome {
    Success(LampReply),
    Failed(ResponseCode),
    NotFound,
}

/// Reduction state of one aggregate call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCounter {
    pub num_waiting: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub not_found_count: usize,
    pub total: usize,
}

impl ResponseCounter {
    fn new(total: usize) -> Self {
        Self {
            num_waiting: total,
            total,
            ..Default::default()
        }
    }

    /// Aggregate response code once every lamp is accounted for
    pub fn code(&self, single_lamp_code: Option<ResponseCode>) -> ResponseCode {
        if self.success_count == self.total {
            ResponseCode::Ok
        } else if self.success_count > 0 {
            ResponseCode::PartialSuccess
        } else if self.fail_count > 0 {
            match (self.total, single_lamp_code) {
                (1, Some(code)) => code,
                _ => ResponseCode::Failure,
            }
        } else {
            ResponseCode::NotFound
        }
    }
}

/// The single reply of an aggregate call
#[derive(Debug, Clone)]
pub struct AggregateReply {
    pub code: ResponseCode,
    pub counter: ResponseCounter,
    /// Outcome per lamp, in call order
    pub results: Vec<(LampId, LampOutcome)>,
}

/// Queue entry for one inbound aggregate request
pub struct QueuedAggregateCall {
    calls: Vec<LampCall>,
    on_success: Option<Notification>,
    reply: oneshot::Sender<AggregateReply>,
}

/// Receiver half of the aggregate call queue
pub type CallQueue = mpsc::Receiver<QueuedAggregateCall>;

/// Handle on a reply that arrives once all lamps are accounted for
pub struct PendingReply {
    rx: oneshot::Receiver<AggregateReply>,
}

impl PendingReply {
    pub async fn wait(self) -> LsfResult<AggregateReply> {
        self.rx.await.map_err(|_| LsfError::ChannelClosed)
    }
}

/// Reduction shared by every lamp task of one aggregate
struct Reduction {
    counter: ResponseCounter,
    outcomes: Vec<Option<LampOutcome>>,
    lamp_ids: Vec<LampId>,
    last_failure: Option<ResponseCode>,
    on_success: Option<Notification>,
    reply: Option<oneshot::Sender<AggregateReply>>,
}

type SharedReduction = Arc<Mutex<Reduction>>;

struct Inner {
    link: Arc<dyn LampLink>,
    config: FanoutConfig,
    lamps: Mutex<HashMap<LampId, LampConnection>>,
    queue: mpsc::Sender<QueuedAggregateCall>,
    notifications: NotificationHub,
}

/// Lamp session table and aggregate call dispatcher
#[derive(Clone)]
pub struct LampClients {
    inner: Arc<Inner>,
}

impl LampClients {
    /// Create the dispatcher; drive the returned queue with [`run_dispatch_loop`]
    pub fn new(
        link: Arc<dyn LampLink>,
        config: FanoutConfig,
        notifications: NotificationHub,
    ) -> (Self, CallQueue) {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let clients = Self {
            inner: Arc::new(Inner {
                link,
                config,
                lamps: Mutex::new(HashMap::new()),
                queue,
                notifications,
            }),
        };
        (clients, rx)
    }

    /// Create the dispatcher and spawn its drainer
    pub fn spawn(
        link: Arc<dyn LampLink>,
        config: FanoutConfig,
        notifications: NotificationHub,
    ) -> Self {
        let (clients, queue) = Self::new(link, config, notifications);
        tokio::spawn(run_dispatch_loop(clients.clone(), queue));
        clients
    }

    // ----- Session table -----

    /// A lamp was announced. Starts a join unless one is under way; a
    /// connected lamp announced at a new address is joined again.
    pub fn lamp_found(&self, endpoint: LampEndpoint) {
        let lamp_id = endpoint.lamp_id.clone();
        let start = {
            let mut lamps = self.inner.lamps.lock();
            let conn = lamps
                .entry(lamp_id.clone())
                .or_insert_with(|| LampConnection::new(endpoint.clone()));
            let moved = conn.endpoint.address != endpoint.address;
            conn.endpoint = endpoint;
            match conn.state {
                ConnectionState::Disconnected => true,
                ConnectionState::Connected if moved => {
                    info!(
                        "LampClients: Lamp {} moved to {}, rejoining",
                        lamp_id, conn.endpoint.address
                    );
                    conn.drop_session();
                    true
                }
                // Backoff alarms own retries
                ConnectionState::Retry | ConnectionState::Blacklisted => false,
                ConnectionState::JoinInProgress | ConnectionState::Connected => false,
            }
        };

        if start {
            debug!("LampClients: Lamp {} announced", lamp_id);
            Self::start_join(&self.inner, &lamp_id);
        }
    }

    /// The lamp's session dropped. In-flight calls fail immediately.
    pub fn session_lost(&self, lamp_id: &str) {
        let mut lamps = self.inner.lamps.lock();
        if let Some(conn) = lamps.get_mut(lamp_id) {
            info!("LampClients: Session to {} lost", lamp_id);
            conn.cancel_retry();
            conn.drop_session();
            conn.state = ConnectionState::Disconnected;
        }
    }

    /// The lamp is gone from discovery
    pub fn lamp_lost(&self, lamp_id: &str) {
        let removed = self.inner.lamps.lock().remove(lamp_id);
        if let Some(mut conn) = removed {
            conn.cancel_retry();
            conn.drop_session();
            info!("LampClients: Lamp {} removed", lamp_id);
            self.inner.notifications.emit(Notification::new(
                EntityKind::Lamp,
                EventKind::Lost,
                vec![lamp_id.to_string()],
            ));
        }
    }

    /// Every known lamp, sorted
    pub fn lamp_ids(&self) -> Vec<LampId> {
        let mut ids: Vec<LampId> = self.inner.lamps.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn connection_state(&self, lamp_id: &str) -> Option<ConnectionState> {
        self.inner.lamps.lock().get(lamp_id).map(|c| c.state)
    }

    pub fn pending_calls(&self, lamp_id: &str) -> usize {
        self.inner
            .lamps
            .lock()
            .get(lamp_id)
            .map(|c| c.pending_calls)
            .unwrap_or(0)
    }

    fn start_join(inner: &Arc<Inner>, lamp_id: &str) {
        let endpoint = {
            let mut lamps = inner.lamps.lock();
            let conn = match lamps.get_mut(lamp_id) {
                Some(conn) => conn,
                None => return,
            };
            conn.retry_alarm = None;
            conn.state = ConnectionState::JoinInProgress;
            conn.endpoint.clone()
        };

        let weak = Arc::downgrade(inner);
        let link = inner.link.clone();
        tokio::spawn(async move {
            let result = link.join(&endpoint).await;
            if let Some(inner) = weak.upgrade() {
                Self::join_finished(&inner, &endpoint, result);
            }
        });
    }

    fn join_finished(inner: &Arc<Inner>, endpoint: &LampEndpoint, result: LsfResult<SessionId>) {
        let lamp_id = &endpoint.lamp_id;
        let mut lamps = inner.lamps.lock();
        let conn = match lamps.get_mut(lamp_id) {
            Some(conn) if conn.state == ConnectionState::JoinInProgress => conn,
            // Removed or reset while joining
            _ => return,
        };

        match result {
            Ok(session) => {
                conn.state = ConnectionState::Connected;
                conn.session = Some(session);
                conn.join_failures = 0;
                drop(lamps);
                info!("LampClients: Joined lamp {} (session {})", lamp_id, session);
                inner.notifications.emit(Notification::new(
                    EntityKind::Lamp,
                    EventKind::Found,
                    vec![lamp_id.clone()],
                ));
            }
            Err(e) => {
                conn.join_failures += 1;
                conn.state = if conn.join_failures >= inner.config.max_join_attempts {
                    ConnectionState::Blacklisted
                } else {
                    ConnectionState::Retry
                };
                let delay = inner.config.retry_delay(conn.join_failures);
                warn!(
                    "LampClients: Join of {} failed ({}), {:?} after {} attempts, retry in {:?}",
                    lamp_id, e, conn.state, conn.join_failures, delay
                );

                let weak: Weak<Inner> = Arc::downgrade(inner);
                let id = lamp_id.clone();
                conn.retry_alarm = Some(tokio::spawn(async move {
                    sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        Self::start_join(&inner, &id);
                    }
                }));
            }
        }
    }

    // ----- Aggregate calls -----

    /// Queue an aggregate call. `on_success` is emitted once if the call
    /// completes with `Ok` or `PartialSuccess`.
    pub fn submit(
        &self,
        calls: Vec<LampCall>,
        on_success: Option<Notification>,
    ) -> LsfResult<PendingReply> {
        let (reply, rx) = oneshot::channel();
        let queued = QueuedAggregateCall {
            calls,
            on_success,
            reply,
        };

        match self.inner.queue.try_send(queued) {
            Ok(()) => Ok(PendingReply { rx }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("LampClients: Call queue full, rejecting");
                Err(LsfError::Busy("lamp call queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(LsfError::ChannelClosed),
        }
    }

    /// Send the same request to every listed lamp
    pub fn change_lamp_state(
        &self,
        lamp_ids: &[LampId],
        request: LampRequest,
        on_success: Option<Notification>,
    ) -> LsfResult<PendingReply> {
        let calls = lamp_ids
            .iter()
            .map(|id| LampCall::new(id.clone(), request.clone()))
            .collect();
        self.submit(calls, on_success)
    }

    /// Aggregate of size one; unwraps the lamp's reply
    pub async fn call_lamp(&self, lamp_id: &str, request: LampRequest) -> LsfResult<LampReply> {
        let reply = self
            .submit(vec![LampCall::new(lamp_id, request)], None)?
            .wait()
            .await?;

        match reply.results.into_iter().next().map(|(_, outcome)| outcome) {
            Some(LampOutcome::Success(reply)) => Ok(reply),
            Some(LampOutcome::Failed(code)) => Err(LsfError::Lamp(code)),
            Some(LampOutcome::NotFound) | None => Err(LsfError::NotFound(lamp_id.to_string())),
        }
    }

    /// Enqueue phase of one aggregate: spawn a task per connected lamp
    fn dispatch(&self, queued: QueuedAggregateCall) {
        let QueuedAggregateCall {
            calls,
            on_success,
            reply,
        } = queued;

        let total = calls.len();
        let reduction: SharedReduction = Arc::new(Mutex::new(Reduction {
            counter: ResponseCounter::new(total),
            outcomes: vec![None; total],
            lamp_ids: calls.iter().map(|c| c.lamp_id.clone()).collect(),
            last_failure: None,
            on_success,
            reply: Some(reply),
        }));

        if total == 0 {
            self.finish(&reduction);
            return;
        }

        for (index, call) in calls.into_iter().enumerate() {
            let target = {
                let mut lamps = self.inner.lamps.lock();
                match lamps.get_mut(&call.lamp_id) {
                    Some(conn) if conn.state == ConnectionState::Connected => {
                        conn.session.map(|session| {
                            conn.pending_calls += 1;
                            (conn.endpoint.clone(), session, conn.generation.subscribe())
                        })
                    }
                    _ => None,
                }
            };

            match target {
                Some((endpoint, session, lost)) => {
                    let clients = self.clone();
                    let reduction = reduction.clone();
                    tokio::spawn(async move {
                        let outcome = clients
                            .run_lamp_call(&endpoint, session, call.request, lost)
                            .await;
                        clients.lamp_call_done(&endpoint.lamp_id);
                        clients.record(&reduction, index, outcome);
                    });
                }
                None => {
                    debug!("LampClients: Lamp {} not connected", call.lamp_id);
                    self.record(&reduction, index, LampOutcome::NotFound);
                }
            }
        }
    }

    async fn run_lamp_call(
        &self,
        endpoint: &LampEndpoint,
        session: SessionId,
        request: LampRequest,
        mut lost: watch::Receiver<u64>,
    ) -> LampOutcome {
        let method_timeout = self.inner.config.method_timeout();
        let call = timeout(
            method_timeout,
            self.inner.link.call(endpoint, session, request),
        );

        tokio::select! {
            result = call => match result {
                Ok(Ok(reply)) => LampOutcome::Success(reply),
                Ok(Err(e)) => {
                    debug!("LampClients: Call to {} failed: {}", endpoint.lamp_id, e);
                    LampOutcome::Failed(e.code())
                }
                Err(_) => {
                    warn!("LampClients: Call to {} timed out", endpoint.lamp_id);
                    LampOutcome::Failed(ResponseCode::Failure)
                }
            },
            _ = lost.changed() => {
                debug!("LampClients: Call to {} cancelled by session loss", endpoint.lamp_id);
                LampOutcome::Failed(ResponseCode::Failure)
            }
        }
    }

    fn lamp_call_done(&self, lamp_id: &str) {
        if let Some(conn) = self.inner.lamps.lock().get_mut(lamp_id) {
            conn.pending_calls = conn.pending_calls.saturating_sub(1);
        }
    }

    /// Account for one lamp; the last one sends the reply
    fn record(&self, reduction: &SharedReduction, index: usize, outcome: LampOutcome) {
        {
            let mut r = reduction.lock();
            match &outcome {
                LampOutcome::Success(_) => r.counter.success_count += 1,
                LampOutcome::Failed(code) => {
                    r.counter.fail_count += 1;
                    r.last_failure = Some(*code);
                }
                LampOutcome::NotFound => r.counter.not_found_count += 1,
            }
            r.outcomes[index] = Some(outcome);
            r.counter.num_waiting -= 1;
            if r.counter.num_waiting > 0 {
                return;
            }
        }
        self.finish(reduction);
    }

    fn finish(&self, reduction: &SharedReduction) {
        let (reply_tx, reply, on_success) = {
            let mut guard = reduction.lock();
            let r = &mut *guard;
            let reply_tx = match r.reply.take() {
                Some(tx) => tx,
                None => return,
            };
            let code = r.counter.code(r.last_failure);
            let results = r
                .lamp_ids
                .iter()
                .cloned()
                .zip(r.outcomes.iter_mut().map(|o| o.take().unwrap_or(LampOutcome::NotFound)))
                .collect();
            let reply = AggregateReply {
                code,
                counter: r.counter,
                results,
            };
            (reply_tx, reply, r.on_success.take())
        };

        debug!(
            "LampClients: Aggregate done: {} ({}/{} ok, {} failed, {} not found)",
            reply.code,
            reply.counter.success_count,
            reply.counter.total,
            reply.counter.fail_count,
            reply.counter.not_found_count
        );

        if matches!(reply.code, ResponseCode::Ok | ResponseCode::PartialSuccess) {
            if let Some(notification) = on_success {
                self.inner.notifications.emit(notification);
            }
        }
        // Caller may have gone away
        let _ = reply_tx.send(reply);
    }
}

/// Drain the aggregate call queue
pub async fn run_dispatch_loop(clients: LampClients, mut queue: CallQueue) {
    info!("LampClients: Dispatcher started");
    while let Some(queued) = queue.recv().await {
        clients.dispatch(queued);
    }
    info!("LampClients: Dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimLampLink;
    use crate::types::LampState;
    use std::time::Duration;

    async fn wait_state(clients: &LampClients, lamp_id: &str, state: ConnectionState) {
        for _ in 0..1000 {
            if clients.connection_state(lamp_id) == Some(state) {
                return;
            }
            sleep(Duration::from_millis(1)).await;
        }
        panic!("lamp {} never reached {:?}", lamp_id, state);
    }

    fn transition() -> LampRequest {
        LampRequest::TransitionState {
            state: LampState::new(true, 0, 0, 2700, 100),
            period: 0,
        }
    }

    #[test]
    fn test_reduction_codes() {
        let counter = |s, f, n| ResponseCounter {
            num_waiting: 0,
            success_count: s,
            fail_count: f,
            not_found_count: n,
            total: s + f + n,
        };
        assert_eq!(counter(3, 0, 0).code(None), ResponseCode::Ok);
        assert_eq!(counter(0, 0, 0).code(None), ResponseCode::Ok);
        assert_eq!(counter(1, 1, 1).code(None), ResponseCode::PartialSuccess);
        assert_eq!(counter(0, 2, 1).code(None), ResponseCode::Failure);
        assert_eq!(counter(0, 0, 2).code(None), ResponseCode::NotFound);
        assert_eq!(
            counter(0, 1, 0).code(Some(ResponseCode::InvalidField)),
            ResponseCode::InvalidField
        );
    }

    #[tokio::test]
    async fn test_empty_aggregate_is_ok() -> LsfResult<()> {
        let sim = Arc::new(SimLampLink::new());
        let clients = LampClients::spawn(sim, FanoutConfig::default(), NotificationHub::default());
        let reply = clients.submit(vec![], None)?.wait().await?;
        assert_eq!(reply.code, ResponseCode::Ok);
        assert_eq!(reply.counter.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_lamp_is_not_found() {
        let sim = Arc::new(SimLampLink::new());
        let clients = LampClients::spawn(sim, FanoutConfig::default(), NotificationHub::default());
        let result = clients.call_lamp("ghost", LampRequest::GetState).await;
        assert!(matches!(result, Err(LsfError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_join_emits_found_and_call_succeeds() -> LsfResult<()> {
        let sim = Arc::new(SimLampLink::new());
        let hub = NotificationHub::default();
        let mut events = hub.subscribe();
        let clients = LampClients::spawn(sim.clone(), FanoutConfig::default(), hub);

        clients.lamp_found(sim.add_lamp("l1", "Desk"));
        wait_state(&clients, "l1", ConnectionState::Connected).await;
        let found = events.recv().await.expect("notification");
        assert_eq!(found.signal_name(), "LampsFound");

        let reply = clients.call_lamp("l1", LampRequest::GetName { language: "en".into() }).await?;
        assert_eq!(reply, LampReply::Name("Desk".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_join_failures_blacklist() {
        let sim = Arc::new(SimLampLink::new());
        let config = FanoutConfig {
            max_join_attempts: 2,
            retry_base_ms: 5,
            retry_max_ms: 20,
            ..Default::default()
        };
        let clients = LampClients::spawn(sim.clone(), config, NotificationHub::default());

        let endpoint = sim.add_lamp("l1", "Flaky");
        sim.fail_joins("l1", 3);
        clients.lamp_found(endpoint);

        wait_state(&clients, "l1", ConnectionState::Blacklisted).await;
        // The backoff alarm keeps retrying until the lamp accepts
        wait_state(&clients, "l1", ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_session_loss_fails_in_flight_calls() -> LsfResult<()> {
        let sim = Arc::new(SimLampLink::new());
        let clients = LampClients::spawn(sim.clone(), FanoutConfig::default(), NotificationHub::default());
        clients.lamp_found(sim.add_lamp("l1", "Desk"));
        wait_state(&clients, "l1", ConnectionState::Connected).await;

        sim.set_hold(true);
        let pending = clients.change_lamp_state(&["l1".to_string()], transition(), None)?;
        sim.wait_held(1).await;
        assert_eq!(clients.pending_calls("l1"), 1);

        clients.session_lost("l1");
        let reply = tokio::time::timeout(Duration::from_secs(1), pending.wait())
            .await
            .expect("reply before method timeout")?;
        assert_eq!(reply.code, ResponseCode::Failure);
        assert_eq!(clients.connection_state("l1"), Some(ConnectionState::Disconnected));
        sim.release_all();
        Ok(())
    }

    #[tokio::test]
    async fn test_reannounced_lamp_at_new_address_rejoins() -> LsfResult<()> {
        let sim = Arc::new(SimLampLink::new());
        let clients = LampClients::spawn(sim.clone(), FanoutConfig::default(), NotificationHub::default());
        let endpoint = sim.add_lamp("l1", "Desk");
        clients.lamp_found(endpoint.clone());
        wait_state(&clients, "l1", ConnectionState::Connected).await;

        sim.set_hold(true);
        let pending = clients.change_lamp_state(&["l1".to_string()], transition(), None)?;
        sim.wait_held(1).await;

        // Same address: the session and its call survive
        clients.lamp_found(endpoint);
        assert_eq!(clients.connection_state("l1"), Some(ConnectionState::Connected));
        assert_eq!(clients.pending_calls("l1"), 1);

        // Rebooted at a new address: old calls fail, a new session is joined
        clients.lamp_found(LampEndpoint::new("l1", "sim://l1-rebooted"));
        let reply = tokio::time::timeout(Duration::from_secs(1), pending.wait())
            .await
            .expect("reply before method timeout")?;
        assert_eq!(reply.code, ResponseCode::Failure);
        wait_state(&clients, "l1", ConnectionState::Connected).await;
        sim.release_all();
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_lamp_times_out_as_failure() -> LsfResult<()> {
        let sim = Arc::new(SimLampLink::new());
        let clients = LampClients::spawn(sim.clone(), FanoutConfig::default(), NotificationHub::default());
        clients.lamp_found(sim.add_lamp("l1", "Desk"));
        wait_state(&clients, "l1", ConnectionState::Connected).await;

        sim.set_hold(true);
        let reply = clients
            .change_lamp_state(&["l1".to_string()], transition(), None)?
            .wait()
            .await?;
        assert_eq!(reply.code, ResponseCode::Failure);
        assert_eq!(reply.counter.fail_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_overflow_is_busy() {
        let sim = Arc::new(SimLampLink::new());
        let config = FanoutConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        // No drainer: the queue only fills
        let (clients, _queue) = LampClients::new(sim, config, NotificationHub::default());
        assert!(clients.submit(vec![], None).is_ok());
        assert!(clients.submit(vec![], None).is_ok());
        assert!(matches!(clients.submit(vec![], None), Err(LsfError::Busy(_))));
    }
}
