//! Listener creation.
//!
//! Listeners are created through socket2 so the address can be rebound
//! immediately after a restart (`SO_REUSEADDR`, plus `SO_REUSEPORT` on
//! Linux and macOS).

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::warn;

/// Bind attempts before giving up on a listener.
pub const BIND_ATTEMPTS: u32 = 3;

const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Create a TCP listener with address reuse enabled.
pub fn create_reusable_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "ios"))]
    {
        use std::os::fd::AsRawFd;
        // SAFETY: the fd is owned by `socket` and stays open for the call
        unsafe {
            let optval: libc::c_int = 1;
            let ret = libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of_val(&optval) as libc::socklen_t,
            );
            if ret != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Bind `addr`, retrying a few times on failure.
pub async fn bind_with_retries(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let mut attempt = 1;
    loop {
        match create_reusable_listener(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < BIND_ATTEMPTS => {
                warn!(
                    "Binding {} failed (attempt {}/{}): {}",
                    addr, attempt, BIND_ATTEMPTS, e
                );
                attempt += 1;
                tokio::time::sleep(BIND_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
