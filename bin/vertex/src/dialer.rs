//! Production next-hop dialer (§4.I step 5): plain TCP, bounded by the
//! configured dial timeout. TLS/SOCKS next hops and the tunnel wire framing
//! itself remain external collaborators per `SPEC_FULL.md` §1.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;
use vertex_relay_core::connhandler::{DialError, DialedStream, Dialer};

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, target: &'a str, timeout: Duration) -> BoxFuture<'a, Result<DialedStream, DialError>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
                Ok(Ok(stream)) => Ok(Box::new(stream) as DialedStream),
                Ok(Err(err)) => Err(DialError::Failed(target.to_string(), err.to_string())),
                Err(_) => Err(DialError::Timeout(target.to_string())),
            }
        })
    }
}
