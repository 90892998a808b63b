//! # HTTP Server
//!
//! Serves a booted [`Dispatcher`] over HTTP/1 with Hyper and Tokio.
//!
//! ## Key Features
//!
//! - One task per connection, requests dispatched through the hook pipeline
//! - Graceful shutdown on Ctrl-C with a bounded drain
//! - Request body size limit (413)
//! - Request id propagation (`x-request-id`) and an access log line per request

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::router::Method;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// HTTP front end for a dispatcher
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
}

impl Server {
    /// Create a server for a booted dispatcher
    #[must_use]
    pub const fn new(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        Self { config, dispatcher }
    }

    /// Bind the server to an address
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Server configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The dispatcher requests are routed to
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Bind and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// - `Error::BindError` if the address cannot be bound
    /// - `Error::Io` if accepting connections fails
    pub async fn serve(&self) -> Result<()> {
        let listener = self.listen()?;
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    fn listen(&self) -> Result<TcpListener> {
        let addr = self.config.address;
        let bind_error = |source| Error::BindError {
            address: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        #[cfg(not(windows))]
        socket.set_reuseport(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        socket.listen(1024).map_err(bind_error)
    }

    /// Serve connections from `listener` until `shutdown` resolves
    ///
    /// After shutdown, in-flight connections get up to the configured
    /// shutdown timeout to finish.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if accepting connections fails.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!("Server listening on http://{}", local_addr);

        let dispatcher = Arc::new(self.dispatcher.clone());
        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);
                    let dispatcher = Arc::clone(&dispatcher);
                    let active = Arc::clone(&active);

                    active.fetch_add(1, Ordering::Relaxed);
                    tokio::task::spawn(async move {
                        let service = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            async move {
                                handle_request(req, &dispatcher, remote_addr, max_body_size).await
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                            .map_err(Error::Http)
                        {
                            error!(remote = %remote_addr, error = %err, "Error serving connection");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout(), drain)
            .await
            .is_err()
        {
            warn!(
                connections = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with connections still open"
            );
        }
        Ok(())
    }

    /// Execute a request directly without the network stack
    pub async fn test_request(
        &self,
        method: Method,
        uri: &str,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Response {
        if let Some(b) = body.as_ref() {
            if b.len() > self.config.max_body_size {
                return Response::error(413, "Payload Too Large");
            }
        }
        let mut request = Request::new(method, uri, headers, body);
        request.set_header("x-client-ip", "test");
        process_request(&self.dispatcher, request).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler; serving until the process is killed");
        std::future::pending::<()>().await;
    }
}

/// Network-agnostic part of request handling
async fn process_request(dispatcher: &Dispatcher, request: Request) -> Response {
    let dispatched = dispatcher.dispatch(request).await;
    let mut response = dispatched.response;
    response.set_header("x-request-id", dispatched.context.request_id());
    response
}

async fn handle_request(
    req: hyper::Request<Incoming>,
    dispatcher: &Dispatcher,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> std::result::Result<hyper::Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let version = format!("{:?}", req.version());

    let response = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(mut request) => {
            request.set_header("x-client-ip", &remote_addr.ip().to_string());
            process_request(dispatcher, request).await
        }
        Err(Error::PayloadTooLarge { limit, actual }) => {
            warn!(limit, actual, "Request body too large");
            Response::error(413, "Payload Too Large")
        }
        Err(e @ Error::Http(_)) => {
            warn!(error = %e, "Failed to read request body");
            Response::error(400, "Bad Request")
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse request");
            Response::error(400, "Bad Request")
        }
    };

    info!(
        "    {} - \"{} {} {}\" {}",
        remote_addr, method, path, version, response.status
    );
    Ok(response.into_hyper())
}
