//! Tunnel server lifecycle and the two packet pipelines
//!
//! Inbound (client -> upstream): handshake the pseudo-TCP stream, decrypt
//! tunnelled datagrams, source-NAT them onto the upstream network.
//! Outbound (upstream -> client): match replies against the NAT table,
//! restore the inner addressing, encrypt and wrap into the client's stream.

use super::device::Conn;
use super::nat::{NatGuide, NatIndicator, NatTable, Quintuple};
use super::session::{ClientSession, SessionTable};
use crate::capture::Capture;
use crate::crypto::Crypt;
use crate::protocol::icmp::IcmpPacket;
use crate::protocol::ipv4::Ipv4Packet;
use crate::protocol::ipv6::{Ipv6Builder, Ipv6Packet};
use crate::protocol::tcp::{self, TcpPacket};
use crate::protocol::udp::{self, UdpPacket};
use crate::protocol::{
    icmp, ipv4::Ipv4Builder, Endpoint, Icmpv4Indicator, NetworkLayer, PacketIndicator,
    TransportLayer, TransportProtocol,
};
use crate::{Error, Result};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the listener fan-in queue
const FAN_IN_CAPACITY: usize = 1000;
/// TTL on synthesized IPv4 handshake replies
const HANDSHAKE_TTL: u8 = 128;
/// Hop limit on synthesized IPv6 handshake replies
const HANDSHAKE_HOP_LIMIT: u8 = 64;

/// The tunnel server: listener connections, per-client sessions, and the
/// shared NAT state both pipelines operate on
pub struct Server<C: Capture> {
    port: u16,
    crypt: Arc<dyn Crypt>,
    listeners: HashMap<String, Arc<Conn<C>>>,
    upstream: Option<Arc<Conn<C>>>,
    closed: AtomicBool,
    clients: SessionTable,
    nat: NatTable,
    ipv4_id: AtomicU16,
}

impl<C: Capture> Server<C> {
    pub fn new(port: u16, crypt: Arc<dyn Crypt>) -> Self {
        Self {
            port,
            crypt,
            listeners: HashMap::new(),
            upstream: None,
            closed: AtomicBool::new(false),
            clients: SessionTable::new(),
            nat: NatTable::new(),
            ipv4_id: AtomicU16::new(0),
        }
    }

    /// Register a listener connection, keyed by its source device name
    pub fn add_listener(&mut self, conn: Conn<C>) {
        self.listeners
            .insert(conn.src_dev().name.clone(), Arc::new(conn));
    }

    pub fn set_upstream(&mut self, conn: Conn<C>) {
        self.upstream = Some(Arc::new(conn));
    }

    /// Validate the assembled server before running
    pub fn open(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config(format!("port {} out of range", self.port)));
        }
        if self.listeners.is_empty() {
            return Err(Error::Config("missing listen device".into()));
        }
        if self.upstream.is_none() {
            return Err(Error::Config("missing upstream device".into()));
        }
        Ok(())
    }

    /// Close all captures; readers observing the resulting read error exit
    /// silently
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        for conn in self.listeners.values() {
            conn.close();
        }
        if let Some(upstream) = &self.upstream {
            upstream.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Run the pipelines until the server is closed
    ///
    /// One reader task per listener feeds a bounded fan-in queue drained by
    /// a single inbound worker; the upstream reader runs on this task.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.open()?;

        for conn in self.listeners.values() {
            info!("Listen on {}", conn.src_dev());
        }
        let upstream = self
            .upstream
            .clone()
            .ok_or_else(|| Error::Config("missing upstream device".into()))?;
        if upstream.is_loopback() {
            info!("Route upstream in {}", upstream.src_dev());
        } else {
            info!(
                "Route upstream from {} to {}",
                upstream.src_dev(),
                upstream.dst_dev()
            );
        }

        let (tx, mut rx) = mpsc::channel::<(Vec<u8>, String)>(FAN_IN_CAPACITY);

        for (name, conn) in &self.listeners {
            let server = Arc::clone(&self);
            let conn = Arc::clone(conn);
            let tx = tx.clone();
            let name = name.clone();
            tokio::spawn(async move {
                loop {
                    match conn.read_frame().await {
                        Ok(frame) => {
                            if tx.send((frame, name.clone())).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            if server.is_closed() {
                                return;
                            }
                            warn!("read listen on {}: {}", conn.src_dev().alias, e);
                        }
                    }
                }
            });
        }
        drop(tx);

        {
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some((frame, listener)) = rx.recv().await {
                    if let Err(e) = server.handle_listen(&frame, &listener).await {
                        warn!("handle listen on {}: {}", listener, e);
                    }
                }
            });
        }

        loop {
            let frame = match upstream.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    if self.is_closed() {
                        return Ok(());
                    }
                    warn!("read upstream: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.handle_upstream(&frame).await {
                warn!("handle upstream: {}", e);
            }
        }
    }

    /// Reply SYN+ACK to a client's SYN and install a fresh session
    async fn handshake(&self, indicator: &PacketIndicator<'_>, conn: &Conn<C>) -> Result<()> {
        let tcp_header = indicator
            .tcp()
            .ok_or_else(|| Error::UnsupportedLayer(indicator.transport_protocol().to_string()))?;

        let src = indicator.src();
        let ack = tcp_header.seq_num().wrapping_add(1);

        let mut segment = tcp::build_syn_ack(indicator.dst().value, src.value, 0, ack);
        segment.update_checksum(indicator.dst_ip(), indicator.src_ip());

        let (packet, ipv6) = match (indicator.dst_ip(), indicator.src_ip()) {
            (IpAddr::V4(local), IpAddr::V4(client)) => {
                let packet = Ipv4Builder::new()
                    .src_addr(local)
                    .dst_addr(client)
                    .protocol(tcp::PROTOCOL_NUMBER)
                    .ttl(HANDSHAKE_TTL)
                    .identification(self.current_ipv4_id())
                    .payload(segment.as_bytes())
                    .build();
                (packet, false)
            }
            (IpAddr::V6(local), IpAddr::V6(client)) => {
                let packet = Ipv6Builder::new()
                    .src_addr(local)
                    .dst_addr(client)
                    .next_header(tcp::PROTOCOL_NUMBER)
                    .hop_limit(HANDSHAKE_HOP_LIMIT)
                    .payload(segment.as_bytes())
                    .build();
                (packet, true)
            }
            _ => return Err(Error::Parse("address family mismatch".into())),
        };

        let frame = conn.wrap_frame(&packet, ipv6);
        conn.write_frame(&frame).await?;

        if !ipv6 {
            self.advance_ipv4_id();
        }

        self.clients
            .insert(src, ClientSession::new(Arc::clone(&self.crypt), 1, ack));

        Ok(())
    }

    /// Inbound pipeline: one frame from a listener
    pub(crate) async fn handle_listen(&self, frame: &[u8], listener: &str) -> Result<()> {
        let conn = self
            .listeners
            .get(listener)
            .ok_or_else(|| Error::InterfaceNotFound {
                name: listener.to_string(),
            })?;

        let indicator = PacketIndicator::parse_frame(frame, conn.link_kind())?;
        let tcp_header = indicator
            .tcp()
            .ok_or_else(|| Error::UnsupportedLayer(indicator.transport_protocol().to_string()))?;
        let src = indicator.src();

        if tcp_header.flags().syn {
            self.handshake(&indicator, conn).await?;
            info!("Connect from client {}", src);
            return Ok(());
        }

        // Bare ACK completing the three-way handshake
        if indicator.payload().is_empty() {
            return Ok(());
        }

        let client = self
            .clients
            .get(&src)
            .ok_or_else(|| Error::Unauthorized(src.to_string()))?;

        client.advance_ack(indicator.payload().len() as u32);

        let contents = client.crypt().decrypt(indicator.payload())?;
        let emb = PacketIndicator::parse_packet(&contents)?;

        // Assign the external value for this flow
        let quintuple = Quintuple {
            src: emb.nat_src(),
            client: src,
            proto: emb.nat_proto(),
        };
        let now = Instant::now();
        let up_value = match self.nat.lookup_value(&quintuple) {
            Some(value) => value,
            None => {
                // An ICMP error only translates on an established mapping
                if emb.icmpv4().is_some_and(|ind| !ind.is_query()) {
                    return Err(Error::MissingNat);
                }
                self.nat.allocate_value(quintuple.clone(), now)?
            }
        };

        // Pick the upstream address matching the inner family
        let up_ip: IpAddr = match emb.network() {
            NetworkLayer::Ipv4(_) => conn
                .local_ipv4()
                .map(IpAddr::V4)
                .ok_or_else(|| Error::Config(format!("no IPv4 address on {}", listener)))?,
            NetworkLayer::Ipv6(_) => conn
                .local_ipv6()
                .map(IpAddr::V6)
                .ok_or_else(|| Error::Config(format!("no IPv6 address on {}", listener)))?,
        };

        // Rebuild the transport layer with the external source value
        let transport_bytes = match emb.transport() {
            TransportLayer::Tcp(hdr) => {
                let mut segment = TcpPacket::from_bytes(hdr.as_bytes())?;
                segment.set_src_port(up_value);
                segment.update_checksum(up_ip, emb.dst_ip());
                segment.into_bytes()
            }
            TransportLayer::Udp(hdr) => {
                let mut datagram = UdpPacket::from_bytes(hdr.as_bytes())?;
                datagram.set_src_port(up_value);
                datagram.update_checksum(up_ip, emb.dst_ip());
                datagram.into_bytes()
            }
            TransportLayer::Icmpv4(ind) => {
                if ind.is_query() {
                    let mut message = IcmpPacket::from_bytes(ind.header().as_bytes())?;
                    message.set_identifier(up_value);
                    message.update_checksum();
                    message.into_bytes()
                } else {
                    let up_ipv4 = ipv4_of(up_ip)?;
                    rebuild_icmp_error(
                        ind,
                        EmbeddedRewrite::Dst {
                            ip: up_ipv4,
                            value: up_value,
                        },
                    )?
                }
            }
        };

        // Rebuild the network layer with the upstream source address
        let packet = match emb.network() {
            NetworkLayer::Ipv4(hdr) => {
                let mut ip = Ipv4Packet::from_parts(hdr, &transport_bytes);
                ip.set_src_addr(ipv4_of(up_ip)?);
                ip.update_checksum();
                ip.into_bytes()
            }
            NetworkLayer::Ipv6(hdr) => {
                let mut ip = Ipv6Packet::from_parts(hdr, &transport_bytes);
                ip.set_src_addr(ipv6_of(up_ip)?);
                ip.into_bytes()
            }
        };

        let frame = conn.wrap_frame(&packet, matches!(emb.network(), NetworkLayer::Ipv6(_)));
        let written = conn.write_frame(&frame).await?;

        // Record the flow so replies find their way back; errors ride the
        // mapping of the flow they report on and install nothing
        let install = match emb.transport() {
            TransportLayer::Tcp(_) | TransportLayer::Udp(_) => true,
            TransportLayer::Icmpv4(ind) => ind.is_query(),
        };
        if install {
            self.nat.insert(
                NatGuide {
                    addr: Endpoint::new(up_ip, up_value),
                    proto: quintuple.proto,
                },
                NatIndicator {
                    src,
                    dst: indicator.dst(),
                    emb_src: emb.nat_src(),
                    listener: listener.to_string(),
                },
            );
        }

        self.nat.touch(quintuple.proto, up_value, now);

        debug!(
            "Redirect an inbound {} packet: {} -> {} ({} bytes)",
            emb.transport_protocol(),
            emb.src(),
            emb.dst(),
            written
        );

        Ok(())
    }

    /// Outbound pipeline: one frame from the upstream capture
    pub(crate) async fn handle_upstream(&self, frame: &[u8]) -> Result<()> {
        let up_conn = self
            .upstream
            .as_ref()
            .ok_or_else(|| Error::Config("missing upstream device".into()))?;

        let indicator = PacketIndicator::parse_frame(frame, up_conn.link_kind())?;

        // Traffic that belongs to no client is not ours to judge
        let guide = NatGuide {
            addr: indicator.nat_dst(),
            proto: indicator.transport_protocol(),
        };
        let Some(ni) = self.nat.get(&guide) else {
            return Ok(());
        };

        let client = self
            .clients
            .get(&ni.src)
            .ok_or_else(|| Error::Unauthorized(ni.src.to_string()))?;

        self.nat
            .touch(indicator.nat_proto(), guide.addr.value, Instant::now());

        // Rebuild the inner transport layer toward the client's endpoint
        let transport_bytes = match indicator.transport() {
            TransportLayer::Tcp(hdr) => {
                let mut segment = TcpPacket::from_bytes(hdr.as_bytes())?;
                segment.set_dst_port(ni.emb_src.value);
                segment.update_checksum(indicator.src_ip(), ni.emb_src.ip);
                segment.into_bytes()
            }
            TransportLayer::Udp(hdr) => {
                let mut datagram = UdpPacket::from_bytes(hdr.as_bytes())?;
                datagram.set_dst_port(ni.emb_src.value);
                datagram.update_checksum(indicator.src_ip(), ni.emb_src.ip);
                datagram.into_bytes()
            }
            TransportLayer::Icmpv4(ind) => {
                if ind.is_query() {
                    let mut message = IcmpPacket::from_bytes(ind.header().as_bytes())?;
                    message.set_identifier(ni.emb_src.value);
                    message.update_checksum();
                    message.into_bytes()
                } else {
                    rebuild_icmp_error(
                        ind,
                        EmbeddedRewrite::Src {
                            ip: ipv4_of(ni.emb_src.ip)?,
                            value: ni.emb_src.value,
                        },
                    )?
                }
            }
        };

        // Rebuild the inner network layer toward the client's inner address
        let contents = match indicator.network() {
            NetworkLayer::Ipv4(hdr) => {
                let mut ip = Ipv4Packet::from_parts(hdr, &transport_bytes);
                ip.set_dst_addr(ipv4_of(ni.emb_src.ip)?);
                ip.update_checksum();
                ip.into_bytes()
            }
            NetworkLayer::Ipv6(hdr) => {
                let mut ip = Ipv6Packet::from_parts(hdr, &transport_bytes);
                ip.set_dst_addr(ipv6_of(ni.emb_src.ip)?);
                ip.into_bytes()
            }
        };

        // Encrypt and wrap into the client-facing pseudo-TCP stack
        let encrypted = client.crypt().encrypt(&contents)?;
        let mut segment = tcp::build_psh_ack(
            ni.dst.value,
            ni.src.value,
            client.seq(),
            client.ack(),
            &encrypted,
        );
        segment.update_checksum(ni.dst.ip, ni.src.ip);

        let ttl = indicator.ttl().saturating_sub(1);
        let (packet, ipv6) = match (ni.dst.ip, ni.src.ip) {
            (IpAddr::V4(local), IpAddr::V4(client_ip)) => {
                let packet = Ipv4Builder::new()
                    .src_addr(local)
                    .dst_addr(client_ip)
                    .protocol(tcp::PROTOCOL_NUMBER)
                    .ttl(ttl)
                    .identification(self.current_ipv4_id())
                    .payload(segment.as_bytes())
                    .build();
                (packet, false)
            }
            (IpAddr::V6(local), IpAddr::V6(client_ip)) => {
                let packet = Ipv6Builder::new()
                    .src_addr(local)
                    .dst_addr(client_ip)
                    .next_header(tcp::PROTOCOL_NUMBER)
                    .hop_limit(ttl)
                    .payload(segment.as_bytes())
                    .build();
                (packet, true)
            }
            _ => return Err(Error::Parse("address family mismatch".into())),
        };

        let listener_conn =
            self.listeners
                .get(&ni.listener)
                .ok_or_else(|| Error::InterfaceNotFound {
                    name: ni.listener.clone(),
                })?;
        let frame = listener_conn.wrap_frame(&packet, ipv6);
        let written = listener_conn.write_frame(&frame).await?;

        if !ipv6 {
            self.advance_ipv4_id();
        }
        client.advance_seq(encrypted.len() as u32);

        debug!(
            "Redirect an outbound {} packet: {} <- {} ({} bytes)",
            indicator.transport_protocol(),
            ni.emb_src,
            indicator.src(),
            written
        );

        Ok(())
    }

    /// Identification value for the next synthesized IPv4 header
    fn current_ipv4_id(&self) -> u16 {
        self.ipv4_id.load(Ordering::Relaxed)
    }

    /// Advance the identification counter once the frame carrying it has
    /// been written
    ///
    /// Both pipelines emit, so the advance is a fetch-add.
    fn advance_ipv4_id(&self) {
        self.ipv4_id.fetch_add(1, Ordering::Relaxed);
    }
}

/// Which end of an embedded datagram an ICMP-error rewrite targets
enum EmbeddedRewrite {
    /// Inbound: the embedded destination becomes the external endpoint
    Dst { ip: Ipv4Addr, value: u16 },
    /// Outbound: the embedded source becomes the client's inner endpoint
    Src { ip: Ipv4Addr, value: u16 },
}

/// Rebuild an ICMP error message around its translated embedded datagram
///
/// The type, code and rest-of-header bytes are preserved; the embedded IPv4
/// header and transport snippet are rewritten on the requested side and all
/// checksums recomputed.
fn rebuild_icmp_error(ind: &Icmpv4Indicator<'_>, rewrite: EmbeddedRewrite) -> Result<Vec<u8>> {
    let emb = ind
        .embedded()
        .ok_or_else(|| Error::Parse("icmp error without embedded datagram".into()))?;
    let mut transport = emb.transport_bytes().to_vec();

    let (src_ip, dst_ip, port_offset, value) = match rewrite {
        EmbeddedRewrite::Dst { ip, value } => (emb.ipv4.src_addr(), ip, 2, value),
        EmbeddedRewrite::Src { ip, value } => (ip, emb.ipv4.dst_addr(), 0, value),
    };

    match emb.protocol {
        TransportProtocol::Tcp | TransportProtocol::Udp => {
            transport[port_offset..port_offset + 2].copy_from_slice(&value.to_be_bytes());
        }
        TransportProtocol::Icmpv4 => {
            if emb.is_query() {
                transport[4..6].copy_from_slice(&value.to_be_bytes());
            }
        }
    }
    update_embedded_checksum(&mut transport, emb.protocol, src_ip, dst_ip);

    let mut ip = Ipv4Packet::from_parts(&emb.ipv4, &transport);
    ip.set_src_addr(src_ip);
    ip.set_dst_addr(dst_ip);
    ip.update_checksum();

    let header = ind.header();
    let mut message = IcmpPacket::from_error_parts(
        header.icmp_type(),
        header.code(),
        header.rest_of_header(),
        ip.as_bytes(),
    );
    message.update_checksum();
    Ok(message.into_bytes())
}

/// Recompute the checksum of a possibly truncated embedded transport snippet
///
/// A snippet too short to contain its checksum field is left untouched.
fn update_embedded_checksum(
    bytes: &mut [u8],
    protocol: TransportProtocol,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
) {
    let src_ip = IpAddr::V4(src_ip);
    let dst_ip = IpAddr::V4(dst_ip);
    match protocol {
        TransportProtocol::Tcp => {
            if bytes.len() >= tcp::MIN_HEADER_SIZE {
                bytes[16..18].copy_from_slice(&[0, 0]);
                let sum = tcp::tcp_checksum(src_ip, dst_ip, bytes);
                bytes[16..18].copy_from_slice(&sum.to_be_bytes());
            }
        }
        TransportProtocol::Udp => {
            bytes[6..8].copy_from_slice(&[0, 0]);
            let sum = udp::udp_checksum(src_ip, dst_ip, bytes);
            let sum = if sum == 0 { 0xFFFF } else { sum };
            bytes[6..8].copy_from_slice(&sum.to_be_bytes());
        }
        TransportProtocol::Icmpv4 => {
            bytes[2..4].copy_from_slice(&[0, 0]);
            let sum = icmp::icmp_checksum(bytes);
            bytes[2..4].copy_from_slice(&sum.to_be_bytes());
        }
    }
}

fn ipv4_of(ip: IpAddr) -> Result<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(Error::Parse("expected an IPv4 address".into())),
    }
}

fn ipv6_of(ip: IpAddr) -> Result<std::net::Ipv6Addr> {
    match ip {
        IpAddr::V6(v6) => Ok(v6),
        IpAddr::V4(_) => Err(Error::Parse("expected an IPv6 address".into())),
    }
}
