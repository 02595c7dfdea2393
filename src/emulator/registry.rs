//! In-process port claims
//!
//! Two fixtures in the same test binary racing for one port would both see a
//! dead endpoint on their first probe. Claiming the port first turns the race
//! into an immediate "already running" for the loser.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashSet;

lazy_static! {
    static ref CLAIMED_PORTS: Mutex<HashSet<u16>> = Mutex::new(HashSet::new());
}

/// Exclusive claim on an emulator port, released on drop
#[derive(Debug)]
pub struct PortClaim {
    port: u16,
}

impl PortClaim {
    /// Claim `port`, or `None` if another fixture in this process holds it
    pub fn acquire(port: u16) -> Option<Self> {
        if CLAIMED_PORTS.lock().insert(port) {
            Some(Self { port })
        } else {
            None
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        CLAIMED_PORTS.lock().remove(&self.port);
    }
}

/// Whether a fixture in this process currently holds `port`
pub fn is_claimed(port: u16) -> bool {
    CLAIMED_PORTS.lock().contains(&port)
}
