//! Asynchronous notification with `LISTEN` and `NOTIFY`.
use futures_core::Stream;
use std::{
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    Result,
    common::ByteStr,
    connection::{Connection, Connector},
    error::Closed,
    postgres::backend,
};

mod worker;

/// Max length in bytes of an identifier accepted by the backend.
const MAX_IDENT_LEN: usize = 63;

/// An asynchronous notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    process_id: u32,
    channel: ByteStr,
    payload: ByteStr,
}

impl Notification {
    /// Process id of the notifying backend.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl From<backend::NotificationResponse> for Notification {
    fn from(value: backend::NotificationResponse) -> Self {
        Self {
            process_id: value.process_id,
            channel: value.channel,
            payload: value.payload,
        }
    }
}

/// A [`Stream`] of every notification received by a [`Connection`].
///
/// Returned by [`Connection::notifications`].
#[derive(Debug)]
pub struct Notifications {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Notifications {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self { rx }
    }

    /// Returns already received notification without waiting.
    pub fn try_next(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Notifications {
    type Item = Notification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Decide whether and when [`Subscriber`] reconnects after the connection is lost.
///
/// The function receives the number of failed attempts so far and returns
/// the delay before the next attempt, or `None` to stop retrying.
#[derive(Clone)]
pub struct ReconnectPolicy {
    f: Arc<dyn Fn(u32) -> Option<Duration> + Send + Sync>,
}

impl ReconnectPolicy {
    pub fn new(f: impl Fn(u32) -> Option<Duration> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }

    /// Never reconnect.
    pub fn never() -> Self {
        Self::new(|_| None)
    }

    /// Reconnect after a fixed delay, at most `max_retries` failed attempts if provided.
    pub fn fixed(delay: Duration, max_retries: Option<u32>) -> Self {
        Self::new(move |retry| match max_retries {
            Some(max) if retry >= max => None,
            _ => Some(delay),
        })
    }

    /// Delay for the given number of failed attempts.
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        (self.f)(retry)
    }
}

impl Default for ReconnectPolicy {
    /// Reconnect every second, forever.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1), None)
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReconnectPolicy")
    }
}

/// A dedicated connection for `LISTEN`.
///
/// Subscribers to the same channel share one `LISTEN`, `UNLISTEN` is issued
/// when the last [`Channel`] is dropped. When the connection is lost, it is
/// recreated according to [`ReconnectPolicy`] and every channel is listened
/// again. Notifications sent while disconnected are lost.
///
/// # Example
///
/// ```no_run
/// # async fn app() -> pglink::Result<()> {
/// use futures::StreamExt;
///
/// let config = pglink::Config::from_env()?;
/// let subscriber = pglink::pubsub::Subscriber::builder(config).connect().await?;
///
/// let mut channel = subscriber.subscribe("jobs").await?;
/// while let Some(notif) = channel.next().await {
///     println!("{}: {}", notif.channel(), notif.payload());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Subscriber {
    send: mpsc::UnboundedSender<Command>,
    close_rx: watch::Receiver<bool>,
}

/// Builder for [`Subscriber`].
pub struct SubscriberBuilder {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
}

impl SubscriberBuilder {
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Create the connection and start the subscriber.
    ///
    /// Must be called within a tokio runtime.
    pub async fn connect(self) -> Result<Subscriber> {
        let conn = self.connector.connect().await?;
        Ok(Subscriber::start(self.connector, self.policy, conn))
    }
}

impl fmt::Debug for SubscriberBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberBuilder").finish_non_exhaustive()
    }
}

impl Subscriber {
    /// Create [`SubscriberBuilder`] with connections created by `connector`.
    pub fn builder(connector: impl Connector) -> SubscriberBuilder {
        SubscriberBuilder {
            connector: Arc::new(connector),
            policy: ReconnectPolicy::default(),
        }
    }

    fn start(connector: Arc<dyn Connector>, policy: ReconnectPolicy, conn: Connection) -> Subscriber {
        let (send, recv) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        tokio::spawn(worker::run(worker::Worker::new(connector, policy, recv, close_tx), conn));
        Self { send, close_rx }
    }

    /// Subscribe to a channel.
    ///
    /// Channel name longer than 63 bytes is truncated, as the backend does.
    pub async fn subscribe(&self, channel: &str) -> Result<Channel> {
        let name = truncate_ident(channel).to_owned();
        let paused = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply, reply_rx) = oneshot::channel();

        let listener = worker::Listener { tx, paused: paused.clone() };
        self.send
            .send(Command::Listen { name: name.clone(), listener, reply })
            .map_err(|_| Closed)?;
        let id = reply_rx.await.map_err(|_| Closed)??;

        Ok(Channel {
            name,
            id,
            rx,
            paused,
            send: self.send.clone(),
            subscribed: true,
        })
    }

    /// Close the subscriber.
    ///
    /// Every [`Channel`] stream ends, then [`closed`][Subscriber::closed] resolves.
    pub fn close(&self) {
        let _ = self.send.send(Command::Close);
    }

    /// Resolves when the subscriber is permanently closed.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.close_rx.clone();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.close_rx.borrow() || self.send.is_closed()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) enum Command {
    Listen {
        name: String,
        listener: worker::Listener,
        reply: oneshot::Sender<Result<u64>>,
    },
    Unlisten {
        name: String,
        id: u64,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Close,
}

/// A [`Stream`] of notification of one channel.
///
/// Dropping the `Channel` unsubscribes it.
pub struct Channel {
    name: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Notification>,
    paused: Arc<AtomicBool>,
    send: mpsc::UnboundedSender<Command>,
    subscribed: bool,
}

impl Channel {
    /// Channel name, as listened by the backend.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop delivering notification, notifications received while paused are dropped.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Unsubscribe and wait until `UNLISTEN` is done if this is the last subscriber.
    pub async fn unsubscribe(mut self) -> Result<()> {
        self.subscribed = false;
        let (reply, reply_rx) = oneshot::channel();
        let name = std::mem::take(&mut self.name);
        self.send
            .send(Command::Unlisten { name, id: self.id, reply: Some(reply) })
            .map_err(|_| Closed)?;
        reply_rx.await.map_err(|_| Closed)?
    }
}

impl Stream for Channel {
    type Item = Notification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.subscribed {
            let name = std::mem::take(&mut self.name);
            let _ = self.send.send(Command::Unlisten { name, id: self.id, reply: None });
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("paused", &self.is_paused())
            .finish()
    }
}

/// Truncate to the backend identifier limit on a char boundary.
fn truncate_ident(name: &str) -> &str {
    let mut end = name.len().min(MAX_IDENT_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Quote as an identifier, `"` is doubled.
fn quote_ident(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for ch in name.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ident_truncated_on_char_boundary() {
        let name = "a".repeat(70);
        assert_eq!(truncate_ident(&name).len(), 63);

        // 62 ascii followed by a 2 bytes char
        let name = format!("{}é", "a".repeat(62));
        assert_eq!(truncate_ident(&name), "a".repeat(62));

        assert_eq!(truncate_ident("jobs"), "jobs");
    }

    #[test]
    fn ident_quoted() {
        assert_eq!(quote_ident("jobs"), "\"jobs\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident("Mixed Case"), "\"Mixed Case\"");
    }

    #[test]
    fn reconnect_policy() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(10), Some(2));
        assert_eq!(policy.delay(0), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay(2), None);
        assert_eq!(ReconnectPolicy::never().delay(0), None);
    }
}
