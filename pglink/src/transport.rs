//! The [`PgTransport`] trait.
use std::{
    io,
    task::{Context, Poll},
};

use crate::{
    Result,
    postgres::{BackendProtocol, FrontendProtocol, frontend},
    statement::Statement,
    transaction::TransactionStatus,
};

/// A buffered stream which can send and receive postgres message.
pub trait PgTransport: Unpin {
    /// Poll to flush the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Poll to receive a message.
    ///
    /// Calling `poll_recv` will also try to [`poll_flush`][1] if there is buffered message.
    ///
    /// Implementor should handle `NoticeResponse`, `ParameterStatus` and
    /// `NotificationResponse`, and should not return it.
    ///
    /// Implementor also should handle `ErrorResponse` and return it as [`Err`],
    /// the rest of the exchange is then discarded as in [`ready_request`][2].
    ///
    /// [1]: PgTransport::poll_flush
    /// [2]: PgTransport::ready_request
    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>>;

    /// Poll until the transport is ready for a new exchange.
    ///
    /// Responses of previously abandoned exchange are discarded and buffered
    /// messages are flushed.
    fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<()>>;

    /// Request implementor to ignore all backend messages until `ReadyForQuery` is received.
    ///
    /// A `Sync` is sent if no `ReadyForQuery` is pending.
    fn ready_request(&mut self);

    /// Send message to the backend.
    ///
    /// Note that this send is buffered, caller must also call
    /// [`poll_flush`][1] or [`flush`][2] afterwards.
    ///
    /// [1]: PgTransport::poll_flush
    /// [2]: PgTransportExt::flush
    fn send<F: FrontendProtocol>(&mut self, message: F);

    /// Send [`Startup`][1] message to the backend.
    ///
    /// For historical reasons, the very first message sent by the client (the startup message)
    /// has no initial message-type byte.
    ///
    /// Thus, [`Startup`][1] does not implement [`FrontendProtocol`]
    ///
    /// [1]: frontend::Startup
    fn send_startup(&mut self, startup: frontend::Startup);

    /// Transaction status reported by the last `ReadyForQuery`.
    fn transaction_status(&self) -> TransactionStatus;

    /// Returns `false` if statements should not be cached, all statements
    /// are then prepared as unnamed statement.
    fn cache_enabled(&self) -> bool;

    /// Check for already prepared statement.
    fn get_stmt(&mut self, sql: &str) -> Option<Statement>;

    /// Add new prepared statement.
    ///
    /// Implementor may deallocate least recently used statements.
    fn add_stmt(&mut self, stmt: Statement);

    /// Remove prepared statement from cache without deallocating it.
    fn remove_stmt(&mut self, sql: &str) -> Option<Statement>;

    /// Returns `true` if a cached statement is prepared with `name`.
    fn has_stmt_name(&self, name: &str) -> bool;
}

impl<P> PgTransport for &mut P where P: PgTransport {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        P::poll_recv(self, cx)
    }

    fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        P::poll_ready(self, cx)
    }

    fn ready_request(&mut self) {
        P::ready_request(self);
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        P::send(self, message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        P::send_startup(self, startup);
    }

    fn transaction_status(&self) -> TransactionStatus {
        P::transaction_status(self)
    }

    fn cache_enabled(&self) -> bool {
        P::cache_enabled(self)
    }

    fn get_stmt(&mut self, sql: &str) -> Option<Statement> {
        P::get_stmt(self, sql)
    }

    fn add_stmt(&mut self, stmt: Statement) {
        P::add_stmt(self, stmt);
    }

    fn remove_stmt(&mut self, sql: &str) -> Option<Statement> {
        P::remove_stmt(self, sql)
    }

    fn has_stmt_name(&self, name: &str) -> bool {
        P::has_stmt_name(self, name)
    }
}

/// Implement [`PgTransport`] by delegating to a field.
macro_rules! delegate_transport {
    (@impl [$($g:ident: $b:path),*] $ty:ty, $field:ident) => {
        impl<$($g: $b),*> $crate::transport::PgTransport for $ty {
            fn poll_flush(&mut self, cx: &mut std::task::Context) -> std::task::Poll<std::io::Result<()>> {
                self.$field.poll_flush(cx)
            }

            fn poll_recv<B: $crate::postgres::BackendProtocol>(
                &mut self,
                cx: &mut std::task::Context,
            ) -> std::task::Poll<$crate::Result<B>> {
                self.$field.poll_recv(cx)
            }

            fn poll_ready(&mut self, cx: &mut std::task::Context) -> std::task::Poll<$crate::Result<()>> {
                self.$field.poll_ready(cx)
            }

            fn ready_request(&mut self) {
                self.$field.ready_request();
            }

            fn send<F: $crate::postgres::FrontendProtocol>(&mut self, message: F) {
                self.$field.send(message);
            }

            fn send_startup(&mut self, startup: $crate::postgres::frontend::Startup) {
                self.$field.send_startup(startup);
            }

            fn transaction_status(&self) -> $crate::transaction::TransactionStatus {
                self.$field.transaction_status()
            }

            fn cache_enabled(&self) -> bool {
                self.$field.cache_enabled()
            }

            fn get_stmt(&mut self, sql: &str) -> Option<$crate::statement::Statement> {
                self.$field.get_stmt(sql)
            }

            fn add_stmt(&mut self, stmt: $crate::statement::Statement) {
                self.$field.add_stmt(stmt);
            }

            fn remove_stmt(&mut self, sql: &str) -> Option<$crate::statement::Statement> {
                self.$field.remove_stmt(sql)
            }

            fn has_stmt_name(&self, name: &str) -> bool {
                self.$field.has_stmt_name(name)
            }
        }
    };
    (impl<$($g:ident: $b:path),*> $ty:ty, $field:ident) => {
        $crate::transport::delegate_transport!(@impl [$($g: $b),*] $ty, $field);
    };
    ($ty:ty, $field:ident) => {
        $crate::transport::delegate_transport!(@impl [] $ty, $field);
    };
}

pub(crate) use delegate_transport;

/// An extension trait to provide `Future` API for [`PgTransport`].
pub trait PgTransportExt: PgTransport {
    /// Flush the underlying io.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx|self.poll_flush(cx))
    }

    /// Receive a backend message.
    fn recv<B: BackendProtocol>(&mut self) -> impl Future<Output = Result<B>> {
        std::future::poll_fn(|cx|self.poll_recv(cx))
    }

    /// Wait until the transport is ready for a new exchange.
    fn ready(&mut self) -> impl Future<Output = Result<()>> {
        std::future::poll_fn(|cx|self.poll_ready(cx))
    }
}

impl<T> PgTransportExt for T where T: PgTransport { }
