use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::{mpsc, watch};

use super::{Command, Notification, ReconnectPolicy, quote_ident};
use crate::{
    Result,
    common::verbose,
    connection::{Connection, Connector},
    pubsub::Notifications,
    query::simple::simple_exec,
};

pub(crate) struct Listener {
    pub tx: mpsc::UnboundedSender<Notification>,
    pub paused: Arc<AtomicBool>,
}

pub(crate) struct Worker {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    recv: mpsc::UnboundedReceiver<Command>,
    close_tx: watch::Sender<bool>,
    /// Listeners by channel name, the channel is listened while not empty.
    channels: HashMap<String, Vec<(u64, Listener)>>,
    next_id: u64,
}

impl Worker {
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        recv: mpsc::UnboundedReceiver<Command>,
        close_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            connector,
            policy,
            recv,
            close_tx,
            channels: HashMap::new(),
            next_id: 0,
        }
    }

    async fn listen(&mut self, conn: &mut Connection, name: String, listener: Listener) -> Result<u64> {
        if !self.channels.contains_key(&name) {
            verbose!("LISTEN {name}");
            simple_exec(conn, &format!("LISTEN {}", quote_ident(&name))).await?;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.channels.entry(name).or_default().push((id, listener));
        Ok(id)
    }

    async fn unlisten(&mut self, conn: &mut Connection, name: &str, id: u64) -> Result<()> {
        let Some(listeners) = self.channels.get_mut(name) else {
            return Ok(());
        };

        listeners.retain(|(e, _)| *e != id);

        if listeners.is_empty() {
            self.channels.remove(name);
            verbose!("UNLISTEN {name}");
            simple_exec(conn, &format!("UNLISTEN {}", quote_ident(name))).await?;
        }

        Ok(())
    }

    fn dispatch(&mut self, notif: Notification) {
        let Some(listeners) = self.channels.get_mut(notif.channel()) else {
            return;
        };

        listeners.retain(|(_, listener)| {
            if listener.paused.load(Ordering::Acquire) {
                return !listener.tx.is_closed();
            }
            listener.tx.send(notif.clone()).is_ok()
        });
    }

    /// Create new connection according to reconnect policy, and listen every channel.
    ///
    /// Returns `None` if policy gives up.
    async fn reconnect(&mut self) -> Option<Connection> {
        let mut retry = 0;

        loop {
            let delay = self.policy.delay(retry)?;
            tokio::time::sleep(delay).await;

            let mut conn = match self.connector.connect().await {
                Ok(ok) => ok,
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::warn!("subscriber reconnect failed ({retry}): {_err}");
                    retry += 1;
                    continue;
                },
            };

            if self.channels.is_empty() {
                return Some(conn);
            }

            let sql = self
                .channels
                .keys()
                .map(|name| format!("LISTEN {}", quote_ident(name)))
                .collect::<Vec<_>>()
                .join("; ");

            match simple_exec(&mut conn, &sql).await {
                Ok(_) => return Some(conn),
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::warn!("subscriber relisten failed ({retry}): {_err}");
                    retry += 1;
                },
            }
        }
    }
}

pub(crate) async fn run(mut worker: Worker, mut conn: Connection) {
    let mut notifs = conn.notifications();

    loop {
        tokio::select! {
            command = worker.recv.recv() => match command {
                Some(Command::Listen { name, listener, reply }) => {
                    let result = worker.listen(&mut conn, name, listener).await;
                    let _ = reply.send(result);
                },
                Some(Command::Unlisten { name, id, reply }) => {
                    let result = worker.unlisten(&mut conn, &name, id).await;
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        },
                        None => {
                            #[cfg(feature = "log")]
                            if let Err(err) = &result {
                                log::warn!("failed to unlisten {name}: {err}");
                            }
                            drop(result);
                        },
                    }
                },
                // Close command or every handle is dropped
                Some(Command::Close) | None => break,
            },
            Some(notif) = next(&mut notifs) => worker.dispatch(notif),
            _result = std::future::poll_fn(|cx| conn.poll_idle(cx)) => {
                #[cfg(feature = "log")]
                if let Err(err) = _result {
                    log::warn!("subscriber connection lost: {err}");
                }

                match worker.reconnect().await {
                    Some(new) => {
                        conn = new;
                        notifs = conn.notifications();
                    },
                    None => break,
                }
            },
        }
    }

    // flush notifications already received
    while let Some(notif) = notifs.try_next() {
        worker.dispatch(notif);
    }

    worker.channels.clear();
    if !conn.is_closed() {
        let _ = conn.close().await;
    }
    worker.close_tx.send_replace(true);
}

async fn next(notifs: &mut Notifications) -> Option<Notification> {
    std::future::poll_fn(|cx| futures_core::Stream::poll_next(std::pin::Pin::new(&mut *notifs), cx)).await
}
