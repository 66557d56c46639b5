//! Async UDP socket wrapper and the detached send queue.
//!
//! All outbound datagrams go through a [`SendQueue`]: the response buffer is
//! built synchronously on the processing path, then handed to a dedicated
//! sender task, so no processing thread ever blocks on socket I/O.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::core::constants::{RECV_BUFFER_SIZE, SEND_QUEUE_CAPACITY};

/// Async UDP socket wrapper for STRAND.
#[derive(Debug)]
pub struct StrandSocket {
    /// The underlying UDP socket.
    socket: Arc<UdpSocket>,
    /// Receive buffer.
    recv_buffer: Vec<u8>,
}

impl StrandSocket {
    /// Create a socket bound to the given address.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an existing UDP socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            recv_buffer: vec![0u8; RECV_BUFFER_SIZE],
        }
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive one datagram and the sender's address.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }

    /// Get a clone of the Arc-wrapped socket.
    pub fn socket_arc(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    /// Spawn the sender task and return its queue handle.
    pub fn spawn_sender(&self) -> (SendQueue, JoinHandle<()>) {
        SendQueue::spawn(self.socket_arc())
    }
}

/// An outbound datagram waiting for the sender task.
#[derive(Debug)]
struct Outbound {
    target: SocketAddr,
    data: Vec<u8>,
}

/// Handle to the asynchronous sender task.
///
/// Cloneable; every processing path shares the same queue. A full queue
/// drops the datagram (UDP semantics) rather than blocking the caller.
#[derive(Debug, Clone)]
pub struct SendQueue {
    tx: mpsc::Sender<Outbound>,
}

impl SendQueue {
    /// Spawn the sender task over the given socket.
    pub fn spawn(socket: Arc<UdpSocket>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Outbound>(SEND_QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                if let Err(err) = socket.send_to(&outbound.data, outbound.target).await {
                    debug!(target = %outbound.target, %err, "send failed");
                } else {
                    trace!(target = %outbound.target, len = outbound.data.len(), "sent");
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Enqueue a datagram for sending, without blocking.
    ///
    /// Returns `false` if the queue is full or the sender task is gone; the
    /// datagram is dropped in that case.
    pub fn enqueue(&self, target: SocketAddr, data: Vec<u8>) -> bool {
        match self.tx.try_send(Outbound { target, data }) {
            Ok(()) => true,
            Err(err) => {
                debug!(target = %target, "send queue rejected datagram: {err}");
                false
            }
        }
    }
}
