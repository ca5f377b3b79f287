use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};

use super::{PoolConfig, PoolError};
use crate::{
    Connection, Result,
    common::{span, trace},
    connection::ConnectFuture,
};

pub struct WorkerHandle {
    send: UnboundedSender<WorkerMessage>,
    state: State,
}

enum State {
    Idle,
    Recv(AcquireRecv),
}

impl WorkerHandle {
    pub fn new(config: PoolConfig) -> (Self, WorkerFuture) {
        let (send, recv) = mpsc::unbounded_channel();
        (
            Self { send, state: State::Idle },
            WorkerFuture {
                config,
                actives: 0,
                conns: VecDeque::new(),
                queue: VecDeque::new(),
                recv,
                connecting: None,
                recycling: Vec::new(),
                closing: Vec::new(),
                closed: false,
            },
        )
    }

    pub fn poll_acquire(&mut self, cx: &mut Context) -> Poll<Result<Connection>> {
        loop {
            match &mut self.state {
                State::Idle => {
                    let (tx, rx) = oneshot::channel();
                    if self.send.send(WorkerMessage::Acquire(tx)).is_err() {
                        return Poll::Ready(Err(PoolError::Closed.into()));
                    }
                    self.state = State::Recv(rx);
                },
                State::Recv(recv) => {
                    let result = ready!(Pin::new(recv).poll(cx));
                    self.state = State::Idle;
                    return Poll::Ready(result.unwrap_or_else(|_| Err(PoolError::Closed.into())));
                },
            }
        }
    }

    pub fn release(&self, conn: Connection) {
        // worker is gone only when every handle is dropped
        let _ = self.send.send(WorkerMessage::Release(conn));
    }

    pub fn detach(&self) {
        let _ = self.send.send(WorkerMessage::Detach);
    }

    pub fn close(&self) {
        let _ = self.send.send(WorkerMessage::Close);
    }
}

impl Clone for WorkerHandle {
    fn clone(&self) -> Self {
        Self {
            send: self.send.clone(),
            state: State::Idle,
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WorkerHandle")
    }
}

type AcquireSend = oneshot::Sender<Result<Connection>>;
type AcquireRecv = oneshot::Receiver<Result<Connection>>;

type RecycleFuture = Pin<Box<dyn Future<Output = (Connection, Result<()>)> + Send>>;
type CloseFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

enum WorkerMessage {
    Acquire(AcquireSend),
    Release(Connection),
    Detach,
    Close,
}

/// Connection being created for the borrower that triggered it.
struct Connecting {
    future: ConnectFuture,
    send: AcquireSend,
}

pub struct WorkerFuture {
    config: PoolConfig,

    /// Live connections, including the one being created.
    actives: usize,
    /// - acquire conn is poped front
    /// - recycled conn is pushed front
    ///
    /// front queue is the most fresh connection
    conns: VecDeque<Connection>,
    queue: VecDeque<AcquireSend>,

    recv: UnboundedReceiver<WorkerMessage>,

    connecting: Option<Connecting>,
    recycling: Vec<RecycleFuture>,
    closing: Vec<CloseFuture>,
    closed: bool,
}

/// Hand connection to the first waiting borrower, or put it in idle queue.
fn new_connection(
    mut conn: Connection,
    queue: &mut VecDeque<AcquireSend>,
    conns: &mut VecDeque<Connection>,
) {
    while let Some(send) = queue.pop_front() {
        if let Err(Ok(returned)) = send.send(Ok(conn)) {
            conn = returned;
            continue;
        }

        return;
    }

    conns.push_front(conn);
}

fn recycle(conn: Connection) -> RecycleFuture {
    Box::pin(async move {
        let mut conn = conn;
        let result = conn.recycle().await;
        (conn, result)
    })
}

impl Future for WorkerFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let WorkerFuture {
            config, actives, conns, queue, recv,
            connecting, recycling, closing, closed,
        } = self.as_mut().get_mut();

        span!("pool_worker");

        macro_rules! tracew {
            ($prefix:literal) => {
                trace!(
                    "{:10}: Active={actives}, Idle={}, Connecting={}, Recycling={}, Closing={}",
                    $prefix,
                    conns.len(),
                    connecting.is_some() as u8,
                    recycling.len(),
                    closing.len(),
                );
            };
        }

        // NOTE:
        // 1. Collect all request upfront
        // 2. Poll any connection futures
        // With the highest chance of connection available:
        // 3. Try to fulfill Queues

        while let Poll::Ready(msg) = recv.poll_recv(cx) {
            let Some(msg) = msg else {
                // all Pools handle are dropped
                return Poll::Ready(())
            };

            use WorkerMessage::*;
            match msg {
                Acquire(send) => {
                    if *closed {
                        let _ = send.send(Err(PoolError::Closed.into()));
                        continue;
                    }

                    match conns.pop_front() {
                        Some(conn) => {
                            if let Err(Ok(conn)) = send.send(Ok(conn)) {
                                conns.push_front(conn);
                            }
                        },
                        None if connecting.is_none() && *actives < config.max_size => {
                            *actives += 1;
                            *connecting = Some(Connecting { future: config.connector.connect(), send });
                        },
                        None => {
                            queue.retain(|e| !e.is_closed());
                            if config.max_wait_queue.is_some_and(|max| queue.len() >= max) {
                                let _ = send.send(Err(PoolError::WaitQueueFull.into()));
                            } else {
                                queue.push_back(send);
                            }
                        },
                    }

                    tracew!("Acquired");
                },
                Release(conn) => {
                    if *closed || conn.is_closed() {
                        *actives -= 1;
                        closing.push(Box::pin(conn.close()));
                    } else {
                        let mut recycle = recycle(conn);
                        // recycling an idle connection is most likely to resolved in one poll
                        match recycle.as_mut().poll(cx) {
                            Poll::Ready((conn, Ok(()))) => new_connection(conn, queue, conns),
                            Poll::Ready((conn, Err(_err))) => {
                                #[cfg(feature = "log")]
                                log::warn!("failed to recycle connection: {_err}");

                                *actives -= 1;
                                closing.push(Box::pin(conn.close()));
                            },
                            Poll::Pending => recycling.push(recycle),
                        }
                    }

                    tracew!("Released");
                },
                Detach => {
                    *actives -= 1;

                    tracew!("Detached");
                },
                Close => {
                    *closed = true;
                    for send in queue.drain(..) {
                        let _ = send.send(Err(PoolError::Closed.into()));
                    }
                    for conn in conns.drain(..) {
                        *actives -= 1;
                        closing.push(Box::pin(conn.close()));
                    }

                    tracew!("Closed");
                },
            }
        }

        if let Some(Poll::Ready(result)) = connecting.as_mut().map(|e| e.future.as_mut().poll(cx)) {
            if let Some(Connecting { send, .. }) = connecting.take() {
                match result {
                    Ok(conn) if *closed => {
                        *actives -= 1;
                        closing.push(Box::pin(conn.close()));
                        let _ = send.send(Err(PoolError::Closed.into()));
                    },
                    Ok(conn) => {
                        if let Err(Ok(conn)) = send.send(Ok(conn)) {
                            new_connection(conn, queue, conns);
                        }

                        tracew!("New");
                    },
                    Err(err) => {
                        #[cfg(feature = "log")]
                        log::error!("failed to connect: {err}");

                        // only the borrower that triggered the connection observe the error,
                        // other borrowers keep waiting and may trigger a retry
                        *actives -= 1;
                        let _ = send.send(Err(err));
                    },
                }
            }
        }

        let mut i = 0;
        while i < recycling.len() {
            let Poll::Ready((conn, result)) = recycling[i].as_mut().poll(cx) else {
                i += 1;
                continue;
            };
            drop(recycling.swap_remove(i));

            match result {
                Ok(()) if !*closed => new_connection(conn, queue, conns),
                Ok(()) => {
                    *actives -= 1;
                    closing.push(Box::pin(conn.close()));
                },
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::warn!("failed to recycle connection: {_err}");

                    *actives -= 1;
                    closing.push(Box::pin(conn.close()));
                },
            }

            tracew!("Recycled");
        }

        // idle connections are read for asynchronous messages, and
        // dropped when the backend goes away
        conns.retain_mut(|conn| match conn.poll_idle(cx) {
            Poll::Pending => true,
            Poll::Ready(_result) => {
                #[cfg(feature = "log")]
                if let Err(err) = _result {
                    log::warn!("idle connection closed: {err}");
                }

                *actives -= 1;
                false
            },
        });

        let mut i = 0;
        while i < closing.len() {
            let Poll::Ready(_result) = closing[i].as_mut().poll(cx) else {
                i += 1;
                continue;
            };

            #[cfg(feature = "log")]
            if let Err(err) = _result {
                log::error!("close error: {err}");
            }

            drop(closing.swap_remove(i));
        }

        while let Some(send) = queue.pop_front() {
            if send.is_closed() {
                continue;
            }
            match conns.pop_front() {
                Some(conn) => {
                    if let Err(Ok(conn)) = send.send(Ok(conn)) {
                        conns.push_front(conn);
                    }
                },
                None if connecting.is_none() && *actives < config.max_size => {
                    *actives += 1;
                    *connecting = Some(Connecting { future: config.connector.connect(), send });
                    // register the new connect future
                    cx.waker().wake_by_ref();
                    break;
                },
                None => {
                    queue.push_front(send);
                    break;
                },
            }
        }

        trace!("{:-<10}: Backpressured: {}", "", queue.len());

        Poll::Pending
    }
}
