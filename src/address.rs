//! Provides the unbounded IPv4 sweep sequence and start-address parsing.

use std::net::Ipv4Addr;
use std::str::FromStr;

/// Numeric successor of an IPv4 address.
///
/// Increments the least significant octet and carries into the higher
/// octets, wrapping from `255.255.255.255` back to `0.0.0.0`. The octet
/// walk is the same as a wrapping add on the big-endian `u32` value, so
/// that is how it is computed.
#[must_use]
pub fn successor(addr: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr).wrapping_add(1))
}

/// Infinite iterator over the IPv4 space, starting from a given address.
///
/// Never terminates: after `255.255.255.255` it continues at `0.0.0.0`
/// and covers the full space again. The sweep is restartable from any
/// known address, which is all the checkpointing this design has.
///
/// ```
/// use std::net::Ipv4Addr;
/// use rdpsweep::address::AddressSweep;
///
/// let mut sweep = AddressSweep::new(Ipv4Addr::new(1, 2, 3, 255));
/// assert_eq!(sweep.next(), Some(Ipv4Addr::new(1, 2, 3, 255)));
/// assert_eq!(sweep.next(), Some(Ipv4Addr::new(1, 2, 4, 0)));
/// ```
#[derive(Debug, Clone)]
pub struct AddressSweep {
    next: Ipv4Addr,
}

impl AddressSweep {
    /// Starts a sweep at `start`, inclusive.
    #[must_use]
    pub const fn new(start: Ipv4Addr) -> Self {
        Self { next: start }
    }
}

impl Iterator for AddressSweep {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        let current = self.next;
        self.next = successor(current);
        Some(current)
    }
}

/// Parses a dotted-quad start address supplied on stdin.
///
/// The flag path goes through clap's own `Ipv4Addr` parser; this one
/// backs the interactive prompt.
pub fn parse_start_address(input: &str) -> Result<Ipv4Addr, String> {
    Ipv4Addr::from_str(input.trim()).map_err(|_| format!("Invalid start address '{}'", input.trim()))
}
