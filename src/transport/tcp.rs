//! TCP connection establishment.
//!
//! Resolves `host:port` to candidate socket addresses and attempts them in
//! order, stopping at the first that accepts. Per-candidate failures are
//! logged and iteration continues; only when resolution fails or every
//! candidate is exhausted does the caller see an error.

use tokio::net::{lookup_host, TcpStream};

use crate::error::{MuxwireError, Result};

/// Resolve `host:port` and connect to the first reachable candidate.
///
/// The returned error is [`MuxwireError::Connect`] in every failure case;
/// callers may retry with their own backoff policy.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let connect_err = |source: std::io::Error| MuxwireError::Connect {
        host: host.to_string(),
        port,
        source,
    };

    let candidates = lookup_host((host, port)).await.map_err(|e| {
        tracing::error!(host, port, error = %e, "address resolution failed");
        connect_err(e)
    })?;

    let mut last_err = None;
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::debug!(host, port, %addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "candidate refused, trying next");
                last_err = Some(e);
            }
        }
    }

    let source = last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses")
    });
    tracing::error!(host, port, error = %source, "all candidates failed");
    Err(connect_err(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect("127.0.0.1", port).await.unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused_port() {
        // Bind and immediately drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(MuxwireError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_connect_unresolvable_host() {
        let result = connect("host.invalid", 9).await;
        assert!(matches!(result, Err(MuxwireError::Connect { .. })));
    }
}
