//! Host port allocation.

use std::net::{Ipv4Addr, TcpListener};

use crate::error::{Error, Result};

/// Ask the OS for an ephemeral TCP port that is free right now.
///
/// Binds `127.0.0.1:0`, reads back the assigned port and releases the socket
/// before returning. The port is not reserved: another process may claim it
/// before the container engine binds it. Tests built on this can therefore
/// fail rarely with "port is already allocated".
pub fn allocate_free_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(Error::PortAllocation)?;
    let port = listener.local_addr().map_err(Error::PortAllocation)?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_allocated_port_is_bindable() {
        let port = allocate_free_port().unwrap();
        assert!(port >= 1024, "expected an ephemeral port, got {port}");

        // Released on return, so binding it again succeeds (barring a race
        // with another process).
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[test]
    fn test_repeated_allocations_are_distinct() {
        // The OS picks from roughly 28k ports, so a collision among a handful
        // of samples is possible but very unlikely.
        const SAMPLES: usize = 10;
        let ports: HashSet<u16> = (0..SAMPLES)
            .map(|_| allocate_free_port().unwrap())
            .collect();
        assert_eq!(ports.len(), SAMPLES);
    }
}
