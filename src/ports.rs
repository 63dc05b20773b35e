use crate::config::PORT_SEARCH_WINDOW;
use crate::error::AppError;
use std::net::TcpListener;
use tracing::{debug, info};

/// A reserved local port. The listener is held open so nothing else can grab
/// the port between selection and service start; call [`PortLease::release`]
/// immediately before starting the service that will bind it.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    listener: Option<TcpListener>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn release(&mut self) {
        if self.listener.take().is_some() {
            debug!("released port {}", self.port);
        }
    }
}

/// Find the lowest free port in [start, start + 100] and hold it.
///
/// Binding the wildcard address fails if anything listens on the port under
/// any local address, so a loopback-only service still marks it busy.
pub fn allocate(start: u16) -> Result<PortLease, AppError> {
    let end = start.saturating_add(PORT_SEARCH_WINDOW);
    for port in start..=end {
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => {
                // Read the port back so asking for 0 yields an OS-assigned one.
                let bound = listener.local_addr()?.port();
                if port != start {
                    info!("port {start} is busy, using {bound} instead");
                }
                return Ok(PortLease {
                    port: bound,
                    listener: Some(listener),
                });
            }
            Err(err) => {
                debug!("port {port} unavailable: {err}");
            }
        }
    }
    Err(AppError::NoFreePort { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Anchor on an OS-assigned port so parallel test runs do not collide.
    fn anchor() -> (TcpListener, u16) {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn skips_busy_port() {
        let (_busy, port) = anchor();
        let lease = allocate(port).unwrap();
        assert!(lease.port() > port);
        assert!(lease.port() <= port + PORT_SEARCH_WINDOW);
    }

    #[test]
    fn holds_port_until_released() {
        let (_busy, port) = anchor();
        let first = allocate(port).unwrap();
        let second = allocate(port).unwrap();
        assert_ne!(first.port(), second.port());

        let mut first = first;
        let held = first.port();
        first.release();
        assert!(TcpListener::bind(("0.0.0.0", held)).is_ok());
    }

    #[test]
    fn fails_when_window_is_exhausted() {
        let (_busy, start) = anchor();
        let mut held = Vec::new();
        for port in start..=start.saturating_add(PORT_SEARCH_WINDOW) {
            if let Ok(l) = TcpListener::bind(("0.0.0.0", port)) {
                held.push(l);
            }
        }
        let err = allocate(start).unwrap_err();
        assert!(matches!(err, AppError::NoFreePort { .. }));
    }
}
