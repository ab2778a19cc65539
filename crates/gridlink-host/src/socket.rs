//! UDP socket wrapper and simulated network conditions.
//!
//! `UdpDatagramSocket` binds a non-blocking UDP socket with the configured
//! buffer sizes. `ConditionedSocket` wraps any datagram socket and applies
//! artificial loss, duplication and latency on the send path; delayed
//! datagrams wait in a release-time heap that the pump drains every cycle.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use gridlink_core::{
    config::{Config, SimulatedConditions},
    error::Result,
    transport::DatagramSocket,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use socket2::Socket as Socket2;

/// Applies configured socket options to a bound UDP socket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    let socket2 = Socket2::from(socket.try_clone()?);
    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }
    if config.socket_broadcast {
        socket.set_broadcast(true)?;
    }
    Ok(())
}

/// Non-blocking UDP socket.
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
}

impl UdpDatagramSocket {
    /// Binds to the given address and applies the configured options.
    pub fn bind<A: ToSocketAddrs>(addresses: A, config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        socket.set_nonblocking(true)?;
        apply_socket_options(&socket, config)?;
        Ok(Self { socket })
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_datagram(&mut self, addr: SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_datagram<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket.recv_from(buffer).map(move |(len, addr)| (&buffer[..len], addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[derive(Debug)]
struct DelayedDatagram {
    release: Instant,
    seq: u64,
    addr: SocketAddr,
    payload: Vec<u8>,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release == other.release && self.seq == other.seq
    }
}
impl Eq for DelayedDatagram {}
impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.release, self.seq).cmp(&(other.release, other.seq))
    }
}

/// Wraps a socket with simulated loss, duplication and latency on the send
/// path. With no conditions configured it is a pass-through.
pub struct ConditionedSocket<T: DatagramSocket> {
    inner: T,
    conditions: Option<SimulatedConditions>,
    rng: StdRng,
    delayed: BinaryHeap<Reverse<DelayedDatagram>>,
    next_seq: u64,
}

impl<T: DatagramSocket> ConditionedSocket<T> {
    /// Wraps `inner`, applying `conditions` when present.
    pub fn new(inner: T, conditions: Option<SimulatedConditions>) -> Self {
        Self {
            inner,
            conditions,
            rng: StdRng::from_os_rng(),
            delayed: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn latency(&mut self, conditions: &SimulatedConditions) -> Duration {
        let variance = conditions.latency_variance.as_secs_f64();
        let extra = if variance > 0.0 { self.rng.random::<f64>() * variance } else { 0.0 };
        conditions.min_latency + Duration::from_secs_f64(extra)
    }

    /// Datagrams currently held back by simulated latency.
    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }
}

impl<T: DatagramSocket> DatagramSocket for ConditionedSocket<T> {
    fn send_datagram(&mut self, addr: SocketAddr, payload: &[u8]) -> io::Result<usize> {
        let Some(conditions) = self.conditions.clone() else {
            return self.inner.send_datagram(addr, payload);
        };

        if conditions.loss_chance > 0.0 && self.rng.random::<f32>() < conditions.loss_chance {
            // Simulated loss: report success, send nothing.
            return Ok(payload.len());
        }

        let copies = if conditions.duplicate_chance > 0.0
            && self.rng.random::<f32>() < conditions.duplicate_chance
        {
            2
        } else {
            1
        };
        for _ in 0..copies {
            let latency = self.latency(&conditions);
            if latency.is_zero() {
                self.inner.send_datagram(addr, payload)?;
            } else {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.delayed.push(Reverse(DelayedDatagram {
                    release: Instant::now() + latency,
                    seq,
                    addr,
                    payload: payload.to_vec(),
                }));
            }
        }
        Ok(payload.len())
    }

    fn receive_datagram<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.inner.receive_datagram(buffer)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn tick(&mut self, now: Instant) {
        while let Some(Reverse(head)) = self.delayed.peek() {
            if head.release > now {
                break;
            }
            let Reverse(datagram) = self.delayed.pop().expect("peeked entry exists");
            if let Err(err) = self.inner.send_datagram(datagram.addr, &datagram.payload) {
                tracing::error!("error sending delayed datagram to {}: {err}", datagram.addr);
            }
        }
        self.inner.tick(now);
    }
}

impl<T: DatagramSocket> std::fmt::Debug for ConditionedSocket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionedSocket")
            .field("conditions", &self.conditions)
            .field("delayed", &self.delayed.len())
            .finish()
    }
}
