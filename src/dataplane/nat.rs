//! NAT translation table and ephemeral identifier allocator
//!
//! Inner flows are mapped to externally visible ports (TCP/UDP) or ICMP
//! query ids. Allocation is round-robin over fixed arenas of last-use
//! timestamps; a slot becomes reusable once the keep-alive window passes
//! without traffic in either direction. Nothing is ever released
//! explicitly.

use crate::protocol::{Endpoint, TransportProtocol};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

/// A mapped flow stays alive this long past its last packet
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// First ephemeral port handed out for TCP and UDP
const EPHEMERAL_BASE: u16 = 49152;
/// Ephemeral port arena size (49152..=65535)
const PORT_SLOTS: usize = 16384;
/// ICMP identifier arena covers the whole 16-bit space
const ICMP_ID_SLOTS: usize = 65536;

/// Allocation key for the inbound direction: the inner flow plus the client
/// it came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quintuple {
    /// Inner source endpoint from the client's view
    pub src: Endpoint,
    /// The client endpoint on the tunnel
    pub client: Endpoint,
    pub proto: TransportProtocol,
}

/// Lookup key for the outbound direction: the external endpoint replies
/// arrive at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NatGuide {
    pub addr: Endpoint,
    pub proto: TransportProtocol,
}

/// What a NAT entry remembers about its flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatIndicator {
    /// The client endpoint on the tunnel
    pub src: Endpoint,
    /// The server endpoint the client reached (source of wrapped replies)
    pub dst: Endpoint,
    /// The inner source endpoint from the client's view
    pub emb_src: Endpoint,
    /// Name of the listener device the client arrived on
    pub listener: String,
}

/// One protocol's arena of last-use timestamps with a round-robin cursor
struct Arena {
    slots: Vec<Option<Instant>>,
    cursor: u16,
    base: u16,
    name: &'static str,
}

impl Arena {
    fn new(len: usize, base: u16, name: &'static str) -> Self {
        Self {
            slots: vec![None; len],
            cursor: 0,
            base,
            name,
        }
    }

    /// Hand out the next slot whose keep-alive window has lapsed
    ///
    /// The cursor keeps advancing across calls so freshly lapsed slots are
    /// not immediately reused.
    fn dist(&mut self, now: Instant) -> Result<u16> {
        for _ in 0..self.slots.len() {
            let s = self.cursor as usize % self.slots.len();
            self.cursor = self.cursor.wrapping_add(1);

            let stale = match self.slots[s] {
                None => true,
                Some(last) => now.duration_since(last) > KEEP_ALIVE,
            };
            if stale {
                return Ok(self.base + s as u16);
            }
        }
        Err(Error::PoolEmpty(self.name))
    }

    fn touch(&mut self, value: u16, now: Instant) {
        let s = value.wrapping_sub(self.base) as usize;
        if s < self.slots.len() {
            self.slots[s] = Some(now);
        }
    }

    #[cfg(test)]
    fn last_used(&self, value: u16) -> Option<Instant> {
        self.slots[value.wrapping_sub(self.base) as usize]
    }
}

/// Allocator state: three arenas plus the quintuple-to-value memory that
/// keeps a flow on the same external value for its lifetime
struct AllocState {
    tcp: Arena,
    udp: Arena,
    icmpv4: Arena,
    values: HashMap<Quintuple, u16>,
}

impl AllocState {
    fn arena(&mut self, proto: TransportProtocol) -> &mut Arena {
        match proto {
            TransportProtocol::Tcp => &mut self.tcp,
            TransportProtocol::Udp => &mut self.udp,
            TransportProtocol::Icmpv4 => &mut self.icmpv4,
        }
    }
}

/// Two-way NAT table shared by both pipelines
pub struct NatTable {
    map: RwLock<HashMap<NatGuide, NatIndicator>>,
    alloc: Mutex<AllocState>,
}

impl NatTable {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            alloc: Mutex::new(AllocState {
                tcp: Arena::new(PORT_SLOTS, EPHEMERAL_BASE, "tcp"),
                udp: Arena::new(PORT_SLOTS, EPHEMERAL_BASE, "udp"),
                icmpv4: Arena::new(ICMP_ID_SLOTS, 0, "icmpv4"),
                values: HashMap::new(),
            }),
        }
    }

    /// The external value already assigned to this flow, if any
    pub fn lookup_value(&self, q: &Quintuple) -> Option<u16> {
        self.alloc.lock().unwrap().values.get(q).copied()
    }

    /// Assign an external value to a flow, reusing an existing assignment
    pub fn allocate_value(&self, q: Quintuple, now: Instant) -> Result<u16> {
        let mut alloc = self.alloc.lock().unwrap();
        if let Some(value) = alloc.values.get(&q) {
            return Ok(*value);
        }

        let value = alloc.arena(q.proto).dist(now)?;
        alloc.values.insert(q, value);
        Ok(value)
    }

    /// Refresh the keep-alive timestamp for a mapped value
    pub fn touch(&self, proto: TransportProtocol, value: u16, now: Instant) {
        self.alloc.lock().unwrap().arena(proto).touch(value, now);
    }

    pub fn get(&self, guide: &NatGuide) -> Option<NatIndicator> {
        self.map.read().unwrap().get(guide).cloned()
    }

    pub fn insert(&self, guide: NatGuide, indicator: NatIndicator) {
        self.map.write().unwrap().insert(guide, indicator);
    }

    #[cfg(test)]
    pub(crate) fn last_used(&self, proto: TransportProtocol, value: u16) -> Option<Instant> {
        let mut alloc = self.alloc.lock().unwrap();
        alloc.arena(proto).last_used(value)
    }
}

impl Default for NatTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn ep(ip: &str, value: u16) -> Endpoint {
        Endpoint::new(ip.parse::<IpAddr>().unwrap(), value)
    }

    fn quintuple(port: u16) -> Quintuple {
        Quintuple {
            src: ep("10.0.0.5", port),
            client: ep("10.0.0.5", 50000),
            proto: TransportProtocol::Udp,
        }
    }

    #[test]
    fn test_first_allocation_is_base() {
        let nat = NatTable::new();
        let value = nat.allocate_value(quintuple(33000), Instant::now()).unwrap();
        assert_eq!(value, 49152);
    }

    #[test]
    fn test_same_flow_same_value() {
        let nat = NatTable::new();
        let now = Instant::now();
        let first = nat.allocate_value(quintuple(33000), now).unwrap();
        let second = nat.allocate_value(quintuple(33000), now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_flows_distinct_values() {
        let nat = NatTable::new();
        let now = Instant::now();
        let a = nat.allocate_value(quintuple(33000), now).unwrap();
        nat.touch(TransportProtocol::Udp, a, now);
        let b = nat.allocate_value(quintuple(33001), now).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cursor_advances_past_untouched_slot() {
        // The cursor moves on even when an allocation is never touched, so
        // the next flow lands on the next slot
        let nat = NatTable::new();
        let now = Instant::now();
        let a = nat.allocate_value(quintuple(33000), now).unwrap();
        let b = nat.allocate_value(quintuple(33001), now).unwrap();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_icmp_ids_start_at_zero() {
        let nat = NatTable::new();
        let q = Quintuple {
            src: ep("10.0.0.5", 0x1234),
            client: ep("10.0.0.5", 50000),
            proto: TransportProtocol::Icmpv4,
        };
        assert_eq!(nat.allocate_value(q, Instant::now()).unwrap(), 0);
    }

    #[test]
    fn test_allocator_freshness() {
        // dist never returns a value whose slot was touched inside the
        // keep-alive window while a stale slot exists
        let nat = NatTable::new();
        let now = Instant::now();
        for port in 0..10u16 {
            let v = nat.allocate_value(quintuple(33000 + port), now).unwrap();
            nat.touch(TransportProtocol::Udp, v, now);
        }

        let later = now + KEEP_ALIVE / 2;
        let v = nat.allocate_value(quintuple(40000), later).unwrap();
        let last = nat.last_used(TransportProtocol::Udp, v);
        assert!(last.is_none() || later.duration_since(last.unwrap()) > KEEP_ALIVE);
    }

    #[test]
    fn test_pool_exhaustion() {
        let nat = NatTable::new();
        let now = Instant::now();
        {
            let mut alloc = nat.alloc.lock().unwrap();
            for s in 0..PORT_SLOTS {
                alloc.udp.slots[s] = Some(now);
            }
        }

        let err = nat.allocate_value(quintuple(33000), now).unwrap_err();
        assert!(matches!(err, Error::PoolEmpty("udp")));
    }

    #[test]
    fn test_slot_reusable_after_keep_alive() {
        let nat = NatTable::new();
        let now = Instant::now();
        {
            let mut alloc = nat.alloc.lock().unwrap();
            for s in 0..PORT_SLOTS {
                alloc.udp.slots[s] = Some(now);
            }
        }

        let later = now + KEEP_ALIVE + Duration::from_secs(1);
        let value = nat.allocate_value(quintuple(33000), later).unwrap();
        assert_eq!(value, 49152);
    }

    #[test]
    fn test_touch_keeps_slot_reserved() {
        let nat = NatTable::new();
        let now = Instant::now();
        let v = nat.allocate_value(quintuple(33000), now).unwrap();
        nat.touch(TransportProtocol::Udp, v, now);

        // Touch again inside the window; a different flow arriving after
        // the original window must not steal the slot
        let mid = now + KEEP_ALIVE / 2;
        nat.touch(TransportProtocol::Udp, v, mid);

        let later = now + KEEP_ALIVE + Duration::from_secs(1);
        let other = nat.allocate_value(quintuple(33001), later).unwrap();
        assert_ne!(other, v);
    }

    #[test]
    fn test_guide_roundtrip() {
        let nat = NatTable::new();
        let guide = NatGuide {
            addr: ep("203.0.113.7", 49152),
            proto: TransportProtocol::Udp,
        };
        let indicator = NatIndicator {
            src: ep("10.0.0.5", 50000),
            dst: ep("192.0.2.1", 8080),
            emb_src: ep("10.0.0.5", 33000),
            listener: "eth0".into(),
        };

        assert!(nat.get(&guide).is_none());
        nat.insert(guide.clone(), indicator.clone());
        assert_eq!(nat.get(&guide), Some(indicator));

        // Same endpoint under a different protocol is a different guide
        let tcp_guide = NatGuide {
            proto: TransportProtocol::Tcp,
            ..guide
        };
        assert!(nat.get(&tcp_guide).is_none());
    }
}
