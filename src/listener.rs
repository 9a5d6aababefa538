//! The single shared listening socket (§4.1, `ListenSocket` in the data model): bound once by
//! the master before `fork()`, inherited by every worker, and `accept()`-ed from behind the
//! [`crate::accept_lock::AcceptLock`].

use std::net::{IpAddr, SocketAddr, TcpListener as StdTcpListener};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::Error;

/// Backlog passed to `listen(2)`. Large enough that a burst of connects while every worker is
/// mid-accept-lock doesn't get refused at the kernel's SYN queue.
const BACKLOG: i32 = 1000;

/// Bind and listen on `(ip, port)`, producing a non-blocking `std::net::TcpListener` ready to be
/// inherited across `fork()` and driven by each worker's event loop.
///
/// Built through `socket2` rather than `std::net::TcpListener::bind` directly because std's bind
/// path does not expose `SO_REUSEADDR`, which this server needs so a restart can rebind the port
/// immediately instead of waiting out `TIME_WAIT`.
pub fn bind(ip: IpAddr, port: u16) -> Result<StdTcpListener, Error> {
    let addr = SocketAddr::new(ip, port);
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|source| Error::Listen {
        addr: addr.to_string(),
        source,
    })?;
    socket.set_reuse_address(true).map_err(|source| Error::Listen {
        addr: addr.to_string(),
        source,
    })?;
    socket.bind(&addr.into()).map_err(|source| Error::Listen {
        addr: addr.to_string(),
        source,
    })?;
    socket.listen(BACKLOG).map_err(|source| Error::Listen {
        addr: addr.to_string(),
        source,
    })?;
    socket.set_nonblocking(true).map_err(|source| Error::Listen {
        addr: addr.to_string(),
        source,
    })?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn binds_an_ephemeral_port_and_is_nonblocking() {
        let listener = bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
        let local = listener.local_addr().unwrap();
        assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(local.port() > 0);
        // Non-blocking: accept() on an empty listener must return WouldBlock, not hang.
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn two_binds_to_the_same_port_after_close_do_not_hit_time_wait() {
        let first = bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
        let port = first.local_addr().unwrap().port();
        drop(first);
        // SO_REUSEADDR lets us rebind immediately; without it this can fail intermittently.
        let second = bind(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        assert!(second.is_ok());
    }
}
