//! UDP transport for the generator and the receiver.
//!
//! The engine itself performs no I/O. These loops own the sockets, poll them
//! with `mio` on a single thread and feed every datagram to the engine.

use crate::config::{endpoints, MAX_DATAGRAM_SIZE};
use crate::error::{Error, Result};
use crate::fec::FecPacket;
use crate::generator::{FecGenerator, FecListener};
use crate::receiver::FecReceiver;
use crate::rtp::RtpPacket;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Column and row FEC addresses of a media stream (media port + 2 and + 4).
///
/// # Example
///
/// ```
/// use smpte2022_fec::transport::fec_addresses;
///
/// let (col, row) = fec_addresses("239.232.0.222:5004".parse().unwrap()).unwrap();
/// assert_eq!(col.to_string(), "239.232.0.222:5006");
/// assert_eq!(row.to_string(), "239.232.0.222:5008");
/// ```
pub fn fec_addresses(media: SocketAddr) -> Result<(SocketAddr, SocketAddr)> {
    let port = |offset: u16| {
        media.port().checked_add(offset).ok_or_else(|| {
            Error::InvalidConfig(format!("No FEC port above media port {}", media.port()))
        })
    };
    let col = SocketAddr::new(media.ip(), port(endpoints::COL_PORT_OFFSET)?);
    let row = SocketAddr::new(media.ip(), port(endpoints::ROW_PORT_OFFSET)?);
    Ok((col, row))
}

/// Bind a non-blocking UDP socket, joining the group if `addr` is multicast.
pub fn bind_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = match addr.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, addr.port()))?;
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            socket
        }
        IpAddr::V6(group) if group.is_multicast() => {
            let socket = std::net::UdpSocket::bind((Ipv6Addr::UNSPECIFIED, addr.port()))?;
            socket.join_multicast_v6(&group, 0)?;
            socket
        }
        _ => std::net::UdpSocket::bind(addr)?,
    };
    socket.set_nonblocking(true)?;
    debug!(%addr, "Bound UDP socket");
    Ok(UdpSocket::from_std(socket))
}

/// Sends generated FEC packets to their column and row destinations.
#[derive(Debug)]
pub struct SocketListener {
    socket: std::net::UdpSocket,
    col: SocketAddr,
    row: SocketAddr,
    sent: u64,
}

impl SocketListener {
    pub fn new(col: SocketAddr, row: SocketAddr) -> Result<Self> {
        let socket = if col.is_ipv4() {
            let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
            socket.set_multicast_ttl_v4(endpoints::MULTICAST_TTL)?;
            socket
        } else {
            std::net::UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
        };
        Ok(Self {
            socket,
            col,
            row,
            sent: 0,
        })
    }

    /// Number of FEC packets sent.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn send(&mut self, fec: &FecPacket, to: SocketAddr) -> Result<()> {
        let datagram = fec.to_rtp().serialize();
        self.socket.send_to(&datagram, to)?;
        self.sent += 1;
        trace!(sequence = %fec.sequence, direction = %fec.direction, %to, "Sent FEC packet");
        Ok(())
    }
}

impl FecListener for SocketListener {
    fn on_new_col(&mut self, col: &FecPacket) -> Result<()> {
        self.send(col, self.col)
    }

    fn on_new_row(&mut self, row: &FecPacket) -> Result<()> {
        self.send(row, self.row)
    }
}

/// Poll `sockets` until `deadline`, handing each datagram to `handle`.
///
/// `handle` receives the index of the socket the datagram arrived on.
fn poll_datagrams<F>(sockets: &mut [UdpSocket], deadline: Option<Instant>, mut handle: F) -> Result<()>
where
    F: FnMut(usize, &[u8]) -> Result<()>,
{
    let mut poll = Poll::new()?;
    for (i, socket) in sockets.iter_mut().enumerate() {
        poll.registry().register(socket, Token(i), Interest::READABLE)?;
    }
    let mut events = Events::with_capacity(128);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let timeout = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => Some(remaining),
                _ => return Ok(()),
            },
            None => None,
        };

        if let Err(e) = poll.poll(&mut events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e.into());
        }

        for event in events.iter() {
            let Token(index) = event.token();
            let Some(socket) = sockets.get(index) else {
                continue;
            };
            // Drain until the socket would block, readiness is edge-triggered.
            loop {
                match socket.recv_from(&mut buf) {
                    Ok((len, from)) => {
                        trace!(len, %from, socket = index, "Received datagram");
                        handle(index, &buf[..len])?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

/// Read media packets from `media` and feed the generator until `stop_after` elapses.
pub fn run_generator<L: FecListener>(
    media: SocketAddr,
    generator: &mut FecGenerator<L>,
    stop_after: Option<Duration>,
) -> Result<()> {
    let mut sockets = [bind_udp(media)?];
    let deadline = stop_after.map(|d| Instant::now() + d);
    info!(%media, matrix = ?generator.matrix(), "FEC generator listening");

    poll_datagrams(&mut sockets, deadline, |_, datagram| {
        match generator.put_media(RtpPacket::parse(datagram)) {
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            Err(e) => error!("Unable to generate FEC: {}", e),
            Ok(()) => {}
        }
        Ok(())
    })?;

    info!(
        total = generator.total(),
        invalid = generator.invalid(),
        "FEC generator stopped"
    );
    Ok(())
}

/// Read media and FEC packets from `addrs` and feed the receiver until
/// `stop_after` elapses, then flush it.
pub fn run_receiver<W: Write>(
    addrs: &[SocketAddr],
    receiver: &mut FecReceiver<W>,
    stop_after: Option<Duration>,
) -> Result<()> {
    let mut sockets = addrs
        .iter()
        .map(|addr| bind_udp(*addr))
        .collect::<Result<Vec<_>>>()?;
    let deadline = stop_after.map(|d| Instant::now() + d);
    info!(?addrs, delay = receiver.config().delay, "FEC receiver listening");

    poll_datagrams(&mut sockets, deadline, |index, datagram| {
        match receiver.put_datagram(datagram) {
            Ok(()) => {}
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            Err(e @ Error::FecProtocolViolation(_)) => {
                error!(socket = %addrs[index], "FEC stream cannot be trusted: {}", e)
            }
            Err(e @ Error::CascadeInconsistency { .. }) => return Err(e),
            Err(e) => warn!(socket = %addrs[index], "Skipping datagram: {}", e),
        }
        Ok(())
    })?;

    receiver.flush()?;
    info!(
        recovered = receiver.stats().media_recovered,
        missing = receiver.stats().media_missing,
        "FEC receiver stopped"
    );
    Ok(())
}
