use std::time::Duration;

use tokio::time::sleep;

use crate::tags::{
    ChangeSink, ConnectionError, NodeHandle, SubscriptionHandle, TagRoles, TagService, TagSession,
};

/// Doubling reconnect delay, bounded by a maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    /// Delay to wait now; the following one is doubled up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub endpoint: String,
    pub roles: TagRoles,
    pub heartbeat: Duration,
    pub subscription_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

/// Keeps one subscription to the tag server alive for the life of the process.
///
/// Every cycle connects, resolves the watched tags, subscribes and then
/// reads the step tag on each heartbeat. The heartbeat also fails once the
/// subscription stopped delivering changes. Any failure tears the session
/// down and the next cycle starts from scratch after the backoff delay.
pub struct ConnectionSupervisor<T: TagService> {
    service: T,
    settings: SupervisorSettings,
    sink: ChangeSink,
    backoff: Backoff,
    subscription: Option<<T::Session as TagSession>::Subscription>,
}

impl<T: TagService> ConnectionSupervisor<T> {
    pub fn new(service: T, settings: SupervisorSettings, sink: ChangeSink) -> Self {
        let backoff = Backoff::new(settings.backoff_initial, settings.backoff_max);
        Self {
            service,
            settings,
            sink,
            backoff,
            subscription: None,
        }
    }

    /// Reconnect forever. Returns only once the dispatcher stopped listening.
    pub async fn run(&mut self) {
        loop {
            match self.run_cycle().await {
                Ok(()) => {
                    tracing::info!("dispatcher gone, supervisor stopping");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "lost connection to tag server");
                }
            }

            let delay = self.backoff.next_delay();
            important!(delay_secs = delay.as_secs(), "trying to reconnect");
            sleep(delay).await;
        }
    }

    async fn run_cycle(&mut self) -> Result<(), ConnectionError> {
        let endpoint = self.settings.endpoint.clone();
        let mut session = self.service.connect(&endpoint).await?;
        important!(%endpoint, "connected to tag server");

        let result = self.serve(&mut session).await;

        if let Some(subscription) = self.subscription.take()
            && let Err(e) = session.unsubscribe(subscription).await
        {
            tracing::debug!(error = %e, "unsubscribe failed during teardown");
        }
        session.disconnect().await;
        important!("client disconnected");
        result
    }

    async fn serve(&mut self, session: &mut T::Session) -> Result<(), ConnectionError> {
        let mut nodes = Vec::new();
        for id in self.settings.roles.watched() {
            nodes.push(session.resolve_node(id).await?);
        }
        // `watched` lists the step tag first.
        let step = nodes[0].clone();

        // The new subscription replays current values; they must only set baselines.
        if !self.sink.reset().await {
            return Ok(());
        }
        let subscription = session
            .subscribe(&nodes, self.settings.subscription_interval, self.sink.clone())
            .await?;
        self.subscription = Some(subscription);
        self.backoff.reset();
        important!(tags = nodes.len(), "subscription created, waiting for events");

        self.heartbeat(session, &step).await
    }

    async fn heartbeat(
        &mut self,
        session: &mut T::Session,
        step: &NodeHandle,
    ) -> Result<(), ConnectionError> {
        loop {
            let value = session.read_value(step).await?;
            tracing::trace!(value, "heartbeat");
            if self.sink.is_closed() {
                return Ok(());
            }
            if !self.subscription.as_ref().is_some_and(|s| s.is_active()) {
                return Err(ConnectionError::SubscriptionEnded);
            }
            sleep(self.settings.heartbeat).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagEvent;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[derive(Default)]
    struct World {
        /// Outcome of each connect attempt; attempts past the end fail.
        connects: VecDeque<bool>,
        connect_times: Vec<Instant>,
        /// Successful heartbeat reads per session before the link "drops".
        reads_before_failure: usize,
        live_subscriptions: i32,
        subscriptions_created: usize,
        disconnects: usize,
        /// Values replayed into the sink right after subscribing.
        initial_values: Vec<(&'static str, f64)>,
        /// Heartbeat reads after which the subscription stream dies.
        stream_dies_after_reads: Option<usize>,
        stream_alive: bool,
    }

    #[derive(Clone)]
    struct MockService {
        world: Arc<Mutex<World>>,
    }

    struct MockSession {
        world: Arc<Mutex<World>>,
        reads: usize,
    }

    struct MockSubscription {
        world: Arc<Mutex<World>>,
    }

    impl SubscriptionHandle for MockSubscription {
        fn is_active(&self) -> bool {
            self.world.lock().unwrap().stream_alive
        }
    }

    impl TagService for MockService {
        type Session = MockSession;

        async fn connect(&self, endpoint: &str) -> Result<MockSession, ConnectionError> {
            let mut world = self.world.lock().unwrap();
            world.connect_times.push(Instant::now());
            if world.connects.pop_front().unwrap_or(false) {
                Ok(MockSession {
                    world: self.world.clone(),
                    reads: 0,
                })
            } else {
                Err(ConnectionError::Connect {
                    endpoint: endpoint.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                })
            }
        }
    }

    impl TagSession for MockSession {
        type Subscription = MockSubscription;

        async fn resolve_node(&mut self, id: &str) -> Result<NodeHandle, ConnectionError> {
            Ok(NodeHandle::new(id))
        }

        async fn subscribe(
            &mut self,
            _nodes: &[NodeHandle],
            _interval: Duration,
            sink: ChangeSink,
        ) -> Result<MockSubscription, ConnectionError> {
            let initial = {
                let mut world = self.world.lock().unwrap();
                world.live_subscriptions += 1;
                world.subscriptions_created += 1;
                world.stream_alive = true;
                world.initial_values.clone()
            };
            for (node, value) in initial {
                sink.deliver(node, value).await;
            }
            Ok(MockSubscription {
                world: self.world.clone(),
            })
        }

        async fn unsubscribe(&mut self, _subscription: MockSubscription) -> Result<(), ConnectionError> {
            self.world.lock().unwrap().live_subscriptions -= 1;
            Ok(())
        }

        async fn read_value(&mut self, _node: &NodeHandle) -> Result<f64, ConnectionError> {
            let mut world = self.world.lock().unwrap();
            if self.reads >= world.reads_before_failure {
                return Err(ConnectionError::Closed);
            }
            self.reads += 1;
            if world.stream_dies_after_reads == Some(self.reads) {
                world.stream_alive = false;
            }
            Ok(1.0)
        }

        async fn disconnect(&mut self) {
            self.world.lock().unwrap().disconnects += 1;
        }
    }

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            endpoint: "tcp://plc:4841".into(),
            roles: TagRoles {
                step: "PASSO".into(),
                gate: Some("STATUS".into()),
                product: None,
            },
            heartbeat: Duration::from_secs(1),
            subscription_interval: Duration::from_millis(500),
            backoff_initial: Duration::from_secs(15),
            backoff_max: Duration::from_secs(300),
        }
    }

    fn supervisor(
        world: World,
    ) -> (
        ConnectionSupervisor<MockService>,
        Arc<Mutex<World>>,
        mpsc::Receiver<TagEvent>,
    ) {
        let world = Arc::new(Mutex::new(world));
        let (tx, rx) = mpsc::channel(64);
        let settings = settings();
        let sink = ChangeSink::new(settings.roles.clone(), tx);
        let sup = ConnectionSupervisor::new(
            MockService {
                world: world.clone(),
            },
            settings,
            sink,
        );
        (sup, world, rx)
    }

    fn gaps(times: &[Instant]) -> Vec<u64> {
        times
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs_f64().round() as u64)
            .collect()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(15), Duration::from_secs(300));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![15, 30, 60, 120, 240, 300, 300]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_back_off_and_success_resets() {
        let (mut sup, world, _rx) = supervisor(World {
            connects: VecDeque::from([false, false, false, true]),
            reads_before_failure: 0,
            ..World::default()
        });

        let task = tokio::spawn(async move { sup.run().await });
        tokio::time::sleep(Duration::from_secs(200)).await;
        task.abort();

        let world = world.lock().unwrap();
        // Three failures wait 15, 30, 60; the successful cycle resets to 15.
        assert_eq!(gaps(&world.connect_times[..5]), vec![15, 30, 60, 15]);
        assert_eq!(world.subscriptions_created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_failure_tears_down_and_resubscribes() {
        let (mut sup, world, _rx) = supervisor(World {
            connects: VecDeque::from([true, true]),
            reads_before_failure: 3,
            ..World::default()
        });

        let task = tokio::spawn(async move { sup.run().await });
        // First session: 3 reads (t=0,1,2), fails at t=3, reconnects at t=18.
        tokio::time::sleep(Duration::from_secs(19)).await;
        {
            let world = world.lock().unwrap();
            assert_eq!(world.subscriptions_created, 2);
            assert_eq!(world.live_subscriptions, 1);
            assert_eq!(world.disconnects, 1);
            assert_eq!(gaps(&world.connect_times), vec![18]);
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn dead_subscription_stream_forces_reconnect() {
        let (mut sup, world, _rx) = supervisor(World {
            connects: VecDeque::from([true, true]),
            reads_before_failure: usize::MAX,
            stream_dies_after_reads: Some(2),
            ..World::default()
        });

        let task = tokio::spawn(async move { sup.run().await });
        // Reads at t=0 and t=1 succeed on the control link, but the stream is
        // gone after the second one: teardown at t=1, reconnect at t=16.
        tokio::time::sleep(Duration::from_millis(16_500)).await;
        {
            let world = world.lock().unwrap();
            assert_eq!(gaps(&world.connect_times), vec![16]);
            assert_eq!(world.subscriptions_created, 2);
            assert_eq!(world.live_subscriptions, 1);
            assert_eq!(world.disconnects, 1);
            assert!(world.stream_alive);
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_precedes_replayed_values() {
        let (mut sup, _world, mut rx) = supervisor(World {
            connects: VecDeque::from([true]),
            reads_before_failure: usize::MAX,
            initial_values: vec![("PASSO", 2.0), ("STATUS", 128.0), ("OTHER", 5.0)],
            ..World::default()
        });

        let task = tokio::spawn(async move { sup.run().await });
        assert_eq!(rx.recv().await, Some(TagEvent::Reset));
        assert_eq!(rx.recv().await, Some(TagEvent::Step(2.0)));
        assert_eq!(rx.recv().await, Some(TagEvent::Gate(128.0)));
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_dispatcher_is_gone() {
        let (mut sup, world, rx) = supervisor(World {
            connects: VecDeque::from([true]),
            reads_before_failure: usize::MAX,
            ..World::default()
        });
        drop(rx);

        sup.run().await;

        let world = world.lock().unwrap();
        assert_eq!(world.subscriptions_created, 0);
        assert_eq!(world.disconnects, 1);
    }
}
