//! Event-stream delivery strategy.
//!
//! One driver task per strategy owns the physical stream. It opens
//! `/api/events` with every subscribed inbox hash, decodes frames, fans
//! events out to subscribers by inbox, and reconnects with backoff as
//! directed by [`StreamMachine`].
//!
//! The driver exits when the last subscriber leaves (the next subscriber
//! restarts it) or when the machine reports the stream failed. Failure is
//! sticky: every current subscriber receives [`Delivery::Failed`] and later
//! subscriptions fail immediately.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use futures::StreamExt;
use sandmail_core::{
    Delivery, DeliveryEvent, Environment, ReconnectPolicy, StrategyKind, StreamAction,
    StreamMachine, StreamState, SubscriptionId, SubscriptionRegistry,
};
use sandmail_proto::{InboxHash, SseDecoder, SseFrame};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::DeliveryStrategy;
use crate::{
    subscription::{self, Subscriber, Subscription},
    transport::Transport,
};

/// What the driver does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Open,
    Wait { attempt: u32, delay: Duration },
    Exit,
}

struct State {
    registry: SubscriptionRegistry<Subscriber>,
    machine: StreamMachine,
    driver_running: bool,
    failure: Option<String>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    env: Arc<dyn Environment>,
    state: Mutex<State>,
    /// Signalled when the set of subscribed inboxes changes
    changed: Notify,
    shutdown: CancellationToken,
}

/// Push delivery over one shared server-sent-events stream.
#[derive(Clone)]
pub struct SseStrategy {
    shared: Arc<Shared>,
}

impl SseStrategy {
    /// Create an idle strategy. Nothing connects until the first subscribe.
    pub fn new(
        policy: ReconnectPolicy,
        transport: Arc<dyn Transport>,
        env: Arc<dyn Environment>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                env,
                state: Mutex::new(State {
                    registry: SubscriptionRegistry::new(),
                    machine: StreamMachine::new(policy),
                    driver_running: false,
                    failure: None,
                }),
                changed: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Whether the stream exhausted its reconnect attempts.
    pub fn is_failed(&self) -> bool {
        self.shared.lock().failure.is_some()
    }

    /// Current reconnect state.
    pub fn stream_state(&self) -> StreamState {
        self.shared.lock().machine.state()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.lock().registry.len()
    }
}

impl DeliveryStrategy for SseStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sse
    }

    fn subscribe(&self, inbox_hash: InboxHash) -> Subscription {
        let mut state = self.shared.lock();

        if let Some(reason) = state.failure.clone() {
            let id = state.registry.reserve_id();
            return Subscription::failed(id, inbox_hash, reason, &self.shared.shutdown);
        }

        let (subscriber, pending) = subscription::channel(&self.shared.shutdown);
        let token = subscriber.token();
        let registered = state.registry.register(inbox_hash.clone(), subscriber);

        if !state.driver_running {
            if let Err(err) = state.machine.start() {
                warn!(%err, "event stream machine out of sync on start");
            }
            state.driver_running = true;
            tokio::spawn(drive(Arc::clone(&self.shared)));
        } else if registered.first_for_inbox {
            self.shared.changed.notify_one();
        }
        drop(state);

        debug!(inbox = %inbox_hash, id = %registered.id, "sse subscribe");
        spawn_cancel_watcher(Arc::downgrade(&self.shared), registered.id, token);

        pending.into_subscription(registered.id, inbox_hash)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.remove(id);
    }

    fn dispose(&self) {
        self.shared.shutdown.cancel();
        let mut state = self.shared.lock();
        state.registry.drain();
        state.machine.close();
        state.driver_running = false;
    }
}

fn spawn_cancel_watcher(shared: Weak<Shared>, id: SubscriptionId, token: CancellationToken) {
    tokio::spawn(async move {
        token.cancelled().await;
        if let Some(shared) = shared.upgrade() {
            shared.remove(id);
        }
    });
}

async fn drive(shared: Arc<Shared>) {
    let mut step = Step::Open;
    loop {
        step = match step {
            Step::Open => shared.connect_and_read().await,
            Step::Wait { attempt, delay } => shared.backoff(attempt, delay).await,
            Step::Exit => return,
        };
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: SubscriptionId) {
        let mut state = self.lock();
        let Some(removed) = state.registry.unregister(id) else {
            return;
        };
        removed.payload.cancel();
        if removed.last_for_inbox {
            self.changed.notify_one();
        }
        debug!(inbox = %removed.inbox_hash, %id, "sse unsubscribe");
    }

    async fn connect_and_read(&self) -> Step {
        let inboxes = {
            let mut state = self.lock();
            if state.registry.is_empty() {
                return close_idle(&mut state);
            }
            state.registry.inbox_hashes()
        };

        let opened = tokio::select! {
            () = self.shutdown.cancelled() => return Step::Exit,
            () = self.changed.notified() => return self.on_subscriptions_changed(),
            result = self.transport.open_event_stream(&inboxes) => result,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return self.on_disconnect(&err.to_string()),
        };

        if let Err(err) = self.lock().machine.opened() {
            warn!(%err, "event stream machine out of sync on open");
        }
        info!(inboxes = inboxes.len(), "event stream connected");

        let mut decoder = SseDecoder::new();
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return Step::Exit,
                () = self.changed.notified() => return self.on_subscriptions_changed(),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => match decoder.push(&bytes) {
                        Ok(frames) => self.dispatch(frames),
                        Err(err) => return self.on_disconnect(&err.to_string()),
                    },
                    Some(Err(err)) => return self.on_disconnect(&err.to_string()),
                    None => return self.on_disconnect("stream ended"),
                },
            }
        }
    }

    async fn backoff(&self, attempt: u32, delay: Duration) -> Step {
        let mut sleep = self.env.sleep(delay);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return Step::Exit,
                () = &mut sleep => break,
                () = self.changed.notified() => {
                    let mut state = self.lock();
                    if state.registry.is_empty() {
                        return close_idle(&mut state);
                    }
                    // The pending reconnect picks up the new list
                },
            }
        }

        let mut state = self.lock();
        if state.registry.is_empty() {
            return close_idle(&mut state);
        }
        debug!(attempt, "reconnecting event stream");
        match state.machine.wait_elapsed() {
            Ok(actions) => apply(&mut state, actions, Step::Open),
            Err(err) => {
                warn!(%err, "event stream machine out of sync after backoff");
                Step::Open
            },
        }
    }

    fn on_subscriptions_changed(&self) -> Step {
        let mut state = self.lock();
        if state.registry.is_empty() {
            return close_idle(&mut state);
        }
        debug!(inboxes = state.registry.inbox_hashes().len(), "resubscribing event stream");
        let actions = state.machine.subscriptions_changed();
        apply(&mut state, actions, Step::Open)
    }

    fn on_disconnect(&self, reason: &str) -> Step {
        let mut state = self.lock();
        match state.machine.disconnected(reason) {
            Ok(actions) => apply(&mut state, actions, Step::Exit),
            Err(err) => {
                warn!(%err, reason, "event stream machine out of sync on disconnect");
                state.driver_running = false;
                Step::Exit
            },
        }
    }

    fn dispatch(&self, frames: Vec<SseFrame>) {
        if frames.is_empty() {
            return;
        }
        let timestamp = self.env.wall_clock();
        let mut state = self.lock();

        for frame in frames {
            if let Err(err) = state.machine.event_observed() {
                debug!(%err, "frame outside connected state");
            }

            let event = match frame.event_frame() {
                Ok(event) => event,
                Err(err) => {
                    debug!(%err, event = ?frame.event, "ignoring non-email frame");
                    continue;
                },
            };

            let delivery = Delivery::Event(DeliveryEvent {
                inbox_hash: event.inbox_id.clone(),
                email_ids: vec![event.email_id.clone()],
                timestamp,
            });
            let delivered = state
                .registry
                .subscribers(&event.inbox_id)
                .filter(|(_, subscriber)| subscriber.deliver(delivery.clone()))
                .count();
            debug!(inbox = %event.inbox_id, email = %event.email_id, delivered, "email event");
        }
    }
}

fn close_idle(state: &mut State) -> Step {
    state.machine.close();
    state.driver_running = false;
    debug!("event stream closed, no subscribers");
    Step::Exit
}

fn apply(state: &mut State, actions: Vec<StreamAction>, default: Step) -> Step {
    let mut step = default;
    for action in actions {
        step = match action {
            StreamAction::Open => Step::Open,
            StreamAction::Wait { attempt, delay } => {
                warn!(attempt, ?delay, "event stream disconnected, backing off");
                Step::Wait { attempt, delay }
            },
            StreamAction::Fail { attempts, reason } => {
                error!(attempts, %reason, "event stream failed");
                fail_all(state, &reason);
                Step::Exit
            },
            StreamAction::Close => {
                state.driver_running = false;
                Step::Exit
            },
        };
    }
    step
}

fn fail_all(state: &mut State, reason: &str) {
    state.failure = Some(reason.to_string());
    state.driver_running = false;
    for (_, inbox_hash, subscriber) in state.registry.drain() {
        subscriber.deliver(Delivery::Failed { inbox_hash, reason: reason.to_string() });
    }
}
