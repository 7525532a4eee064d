//! MQTT implementation of the engine's bus client, over `rumqttc`.
//!
//! `connect` drives the event loop until the broker acknowledges the
//! session, then hands the loop to a background poller that forwards every
//! inbound PUBLISH to the installed handler. `subscribe` waits for the
//! broker's SUBACK, so a refused filter fails the call.
//!
//! Transport errors are reported to the handler as delivery errors and the
//! poller keeps going; `rumqttc` reconnects on the next poll. Sessions are
//! clean, so after a reconnect the poller subscribes to every granted filter
//! again.

mod subscriptions;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use subscriptions::{AckOutcome, Subscriptions};

use casa_rules::{BusClient, BusError, BusResult, ConnectOptions, InboundHandler, Message};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const CLOSE_GRACE: Duration = Duration::from_millis(500);

type SharedHandler = Arc<RwLock<Option<InboundHandler>>>;
type SharedBook = Arc<Mutex<Subscriptions>>;

struct Connection {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

pub struct MqttBus {
    connect_timeout: Duration,
    request_capacity: usize,
    connection: Mutex<Option<Connection>>,
    handler: SharedHandler,
    book: SharedBook,
}

impl Default for MqttBus {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            connection: Mutex::new(None),
            handler: Arc::new(RwLock::new(None)),
            book: Arc::new(Mutex::new(Subscriptions::default())),
        }
    }
}

impl MqttBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn book(&self) -> MutexGuard<'_, Subscriptions> {
        lock_book(&self.book)
    }

    fn client(&self) -> BusResult<AsyncClient> {
        self.connection()
            .as_ref()
            .map(|c| c.client.clone())
            .ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl BusClient for MqttBus {
    async fn connect(&self, options: &ConnectOptions) -> BusResult<()> {
        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(KEEP_ALIVE);
        if let Some(creds) = &options.credentials {
            mqtt.set_credentials(&creds.user, creds.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt, self.request_capacity);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack.code),
                    Ok(_) => continue,
                    Err(e) => return Err(e.to_string()),
                }
            }
        };
        let code = match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok(code)) => code,
            Ok(Err(reason)) => return Err(unreachable(options, reason)),
            Err(_) => return Err(unreachable(options, "timed out waiting for CONNACK".into())),
        };
        if !matches!(code, ConnectReturnCode::Success) {
            return Err(unreachable(options, format!("broker refused connection: {code:?}")));
        }

        info!(address = %options.address(), "Connected to MQTT broker");
        self.book().reset();
        let poller = tokio::spawn(poll_loop(
            eventloop,
            client.clone(),
            Arc::clone(&self.handler),
            Arc::clone(&self.book),
        ));
        let previous = self.connection().replace(Connection { client, poller });
        if let Some(old) = previous {
            old.poller.abort();
        }
        Ok(())
    }

    /// Sends the SUBSCRIBE and waits for the broker's SUBACK. Calls are
    /// expected one at a time; acks are matched in request order.
    async fn subscribe(&self, filter: &str) -> BusResult<()> {
        let client = self.client()?;
        let (tx, rx) = oneshot::channel();
        self.book().expect_ack(filter, tx);

        if let Err(e) = client.subscribe(filter, QoS::AtLeastOnce).await {
            self.book().cancel(filter);
            return Err(subscribe_error(filter, e.to_string()));
        }

        match tokio::time::timeout(self.connect_timeout, rx).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(subscribe_error(filter, "broker refused subscription".into())),
            Ok(Err(_)) => Err(subscribe_error(filter, "connection lost before SUBACK".into())),
            Err(_) => Err(subscribe_error(filter, "timed out waiting for SUBACK".into())),
        }
    }

    async fn publish(&self, message: Message) -> BusResult<()> {
        let Message {
            topic,
            payload,
            retained,
        } = message;
        self.client()?
            .publish(topic.clone(), QoS::AtLeastOnce, retained, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic,
                reason: e.to_string(),
            })
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    async fn close(&self) -> BusResult<()> {
        self.handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.book().reset();
        let connection = self.connection().take();
        let Some(Connection { client, mut poller }) = connection else {
            return Ok(());
        };

        let result = client
            .disconnect()
            .await
            .map_err(|e| BusError::Close(e.to_string()));

        // The poller exits once the DISCONNECT went out.
        if tokio::time::timeout(CLOSE_GRACE, &mut poller).await.is_err() {
            poller.abort();
        }
        info!("Disconnected from MQTT broker");
        result
    }
}

fn unreachable(options: &ConnectOptions, reason: String) -> BusError {
    BusError::Unreachable {
        address: options.address(),
        reason,
    }
}

fn subscribe_error(filter: &str, reason: String) -> BusError {
    BusError::Subscribe {
        topic: filter.to_string(),
        reason,
    }
}

fn lock_book(book: &SharedBook) -> MutexGuard<'_, Subscriptions> {
    book.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatch(handler: &SharedHandler, delivery: BusResult<Message>) {
    let current = handler
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match current {
        Some(h) => h(delivery),
        None => debug!("No inbound handler installed, dropping delivery"),
    }
}

async fn poll_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    handler: SharedHandler,
    book: SharedBook,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => dispatch(
                &handler,
                Ok(Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    retained: publish.retain,
                }),
            ),
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let granted = !ack
                    .return_codes
                    .iter()
                    .any(|c| matches!(c, SubscribeReasonCode::Failure));
                let outcome = lock_book(&book).acknowledge(granted);
                match outcome {
                    AckOutcome::Caller => {}
                    AckOutcome::Replayed(filter) => debug!(topic = %filter, "Resubscribed"),
                    AckOutcome::ReplayRefused(filter) => dispatch(
                        &handler,
                        Err(BusError::Delivery(format!(
                            "broker refused resubscription to {filter}"
                        ))),
                    ),
                    AckOutcome::Unexpected => {
                        debug!(pkid = ack.pkid, "SUBACK with no pending request")
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                // Only reconnects reach the poller; the first CONNACK is
                // consumed by `connect`.
                if !ack.session_present {
                    resubscribe(&client, &book);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => return,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error, retrying");
                dispatch(&handler, Err(BusError::Delivery(e.to_string())));
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Re-issue every granted filter on a fresh session. Uses the non-blocking
/// client calls; the request queue is drained by this same task.
fn resubscribe(client: &AsyncClient, book: &SharedBook) {
    let filters = lock_book(book).reconnected();
    if filters.is_empty() {
        return;
    }
    info!(filters = filters.len(), "Reconnected to MQTT broker, resubscribing");
    for filter in filters {
        lock_book(book).expect_replay(&filter);
        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
            lock_book(book).forget_replay(&filter);
            warn!(topic = %filter, error = %e, "Failed to queue resubscription");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_require_connection() {
        let bus = MqttBus::new();
        assert!(matches!(
            bus.subscribe("a/b").await,
            Err(BusError::NotConnected)
        ));
        assert!(matches!(
            bus.publish(Message::new("a/b", "1")).await,
            Err(BusError::NotConnected)
        ));
        assert!(bus.close().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connection_error() {
        // Port 1 on loopback: nothing listens there.
        let options = ConnectOptions {
            port: 1,
            ..ConnectOptions::local()
        };
        let bus = MqttBus::new().with_connect_timeout(Duration::from_secs(2));

        let err = bus.connect(&options).await.unwrap_err();
        assert!(matches!(err, BusError::Unreachable { .. }));
    }
}
