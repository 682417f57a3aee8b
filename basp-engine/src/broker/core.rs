//! The broker task and its connection plumbing.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use basp_core::{ActorAddr, ConnectionHandle, MessageId, NodeId};

use super::config::BrokerConfig;
use super::error::BrokerError;
use crate::callee::Callee;
use crate::hooks::Hooks;
use crate::instance::{ConnectionState, Context, Instance};
use crate::transport::Transport;
use crate::wire::{HEADER_SIZE, Header};

/// Borrow the engine's collaborators out of the broker's fields.
macro_rules! engine_ctx {
    ($broker:ident) => {
        Context {
            transport: &mut $broker.transport,
            callee: &mut $broker.callee,
            hooks: &mut $broker.hooks,
        }
    };
}

/// Inputs serialized onto the broker task.
enum Event {
    /// One phase of a frame arrived on a connection.
    Frame {
        hdl: ConnectionHandle,
        bytes: Vec<u8>,
        is_payload: bool,
    },
    /// A connection's read side ended.
    Closed { hdl: ConnectionHandle },
    /// The accept loop produced a connection.
    Accepted { stream: TcpStream },
    /// An outbound dial completed.
    Dialed { stream: TcpStream },
    /// The heartbeat timer fired.
    HeartbeatTick,
}

/// Requests from [`BrokerHandle`]s.
enum Command {
    Dial {
        addr: String,
    },
    Publish {
        port: u16,
        addr: ActorAddr,
        signatures: BTreeSet<String>,
    },
    UnpublishPort {
        port: u16,
    },
    UnpublishActor {
        whom: ActorAddr,
        port: u16,
    },
    Dispatch {
        sender: Option<ActorAddr>,
        forwarding_stack: Vec<ActorAddr>,
        receiver: ActorAddr,
        mid: MessageId,
        message: Vec<u8>,
        done: oneshot::Sender<bool>,
    },
    NodeShutdown {
        node: NodeId,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running [`Broker`].
#[derive(Clone)]
pub struct BrokerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl BrokerHandle {
    /// Dial a peer. The connection announces itself through the usual
    /// handshake upcalls; dial failures are logged and otherwise silent.
    pub fn dial(&self, addr: impl Into<String>) -> Result<(), BrokerError> {
        self.send(Command::Dial { addr: addr.into() })
    }

    /// Publish `addr` on `port` for remote peers to resolve during
    /// handshakes.
    pub fn publish(
        &self,
        port: u16,
        addr: ActorAddr,
        signatures: BTreeSet<String>,
    ) -> Result<(), BrokerError> {
        self.send(Command::Publish {
            port,
            addr,
            signatures,
        })
    }

    /// Remove whatever is published on `port`.
    pub fn unpublish_port(&self, port: u16) -> Result<(), BrokerError> {
        self.send(Command::UnpublishPort { port })
    }

    /// Remove publications of `whom` (every port when `port == 0`).
    pub fn unpublish_actor(&self, whom: ActorAddr, port: u16) -> Result<(), BrokerError> {
        self.send(Command::UnpublishActor { whom, port })
    }

    /// Send a user message to a remote actor. Resolves to `false` when the
    /// engine had no route to the receiver.
    pub async fn dispatch(
        &self,
        sender: Option<ActorAddr>,
        forwarding_stack: Vec<ActorAddr>,
        receiver: ActorAddr,
        mid: MessageId,
        message: Vec<u8>,
    ) -> Result<bool, BrokerError> {
        let (done, result) = oneshot::channel();
        self.send(Command::Dispatch {
            sender,
            forwarding_stack,
            receiver,
            mid,
            message,
            done,
        })?;
        result.await.map_err(|_| BrokerError::Closed)
    }

    /// Report that `node` is gone; the engine purges every route through
    /// it.
    pub fn node_shutdown(&self, node: NodeId) -> Result<(), BrokerError> {
        self.send(Command::NodeShutdown { node })
    }

    /// Stop the broker task, tearing down every connection.
    pub fn shutdown(&self) -> Result<(), BrokerError> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), BrokerError> {
        self.commands.send(command).map_err(|_| BrokerError::Closed)
    }
}

/// Per-connection write buffers backed by writer-task channels.
#[derive(Default)]
struct ChannelTransport {
    buffers: HashMap<ConnectionHandle, Vec<u8>>,
    outbound: HashMap<ConnectionHandle, mpsc::UnboundedSender<Vec<u8>>>,
}

impl Transport for ChannelTransport {
    fn wr_buf(&mut self, hdl: ConnectionHandle) -> &mut Vec<u8> {
        self.buffers.entry(hdl).or_default()
    }

    fn flush(&mut self, hdl: ConnectionHandle) {
        let Some(buf) = self.buffers.get_mut(&hdl) else {
            return;
        };
        if buf.is_empty() {
            return;
        }
        let bytes = std::mem::take(buf);
        match self.outbound.get(&hdl) {
            Some(writer) => {
                // writer task gone means the connection is tearing down
                let _ = writer.send(bytes);
            }
            None => tracing::debug!(handle = %hdl, "dropping flush for closed connection"),
        }
    }
}

/// State the broker task keeps per live connection.
struct Connection {
    /// Header of the frame currently being received.
    hdr: Header,
    reader: JoinHandle<()>,
}

/// Tokio embedding of one protocol engine.
///
/// Construct with [`Broker::new`], then drive with [`Broker::run`] while
/// other tasks steer it through the returned [`BrokerHandle`].
pub struct Broker<C, H> {
    instance: Instance,
    transport: ChannelTransport,
    callee: C,
    hooks: H,
    config: BrokerConfig,
    conns: HashMap<ConnectionHandle, Connection>,
    next_handle: u64,
    events: mpsc::UnboundedSender<Event>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    listen_port: u16,
}

impl<C: Callee, H: Hooks> Broker<C, H> {
    /// Create a broker for the node identified by `this_node`.
    pub fn new(this_node: NodeId, config: BrokerConfig, callee: C, hooks: H) -> (Self, BrokerHandle) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let broker = Self {
            instance: Instance::new(this_node),
            transport: ChannelTransport::default(),
            callee,
            hooks,
            config,
            conns: HashMap::new(),
            next_handle: 0,
            events,
            event_rx,
            command_rx,
            listen_port: 0,
        };
        (broker, BrokerHandle { commands })
    }

    /// Run the broker until [`BrokerHandle::shutdown`] is called or every
    /// handle is dropped.
    ///
    /// With a listener, inbound connections are accepted and greeted with
    /// the server handshake for the listener's port.
    pub async fn run(mut self, listener: Option<TcpListener>) -> Result<(), BrokerError> {
        let mut background = Vec::new();
        if let Some(listener) = listener {
            self.listen_port = listener.local_addr()?.port();
            tracing::info!(node = %self.instance.this_node(), port = self.listen_port, "broker listening");
            background.push(tokio::spawn(accept_loop(listener, self.events.clone())));
        }
        if let Some(interval) = self.config.heartbeat_interval {
            background.push(tokio::spawn(heartbeat_timer(interval, self.events.clone())));
        }
        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => self.on_event(event),
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }
        tracing::info!(node = %self.instance.this_node(), "broker shutting down");
        for task in background {
            task.abort();
        }
        let handles: Vec<ConnectionHandle> = self.conns.keys().copied().collect();
        for hdl in handles {
            self.teardown(hdl);
        }
        Ok(())
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Accepted { stream } => self.register_connection(stream, true),
            Event::Dialed { stream } => self.register_connection(stream, false),
            Event::Frame {
                hdl,
                bytes,
                is_payload,
            } => self.on_frame(hdl, bytes, is_payload),
            Event::Closed { hdl } => self.on_closed(hdl),
            Event::HeartbeatTick => {
                let mut ctx = engine_ctx!(self);
                self.instance.handle_heartbeat_broadcast(&mut ctx);
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Dial { addr } => {
                let events = self.events.clone();
                let timeout = self.config.dial_timeout;
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
                        Ok(Ok(stream)) => {
                            let _ = events.send(Event::Dialed { stream });
                        }
                        Ok(Err(err)) => tracing::warn!(%addr, %err, "dial failed"),
                        Err(_) => tracing::warn!(%addr, "dial timed out"),
                    }
                });
            }
            Command::Publish {
                port,
                addr,
                signatures,
            } => {
                let mut ctx = engine_ctx!(self);
                self.instance.add_published_actor(&mut ctx, port, addr, signatures);
            }
            Command::UnpublishPort { port } => {
                self.instance.remove_published_port(port, None);
            }
            Command::UnpublishActor { whom, port } => {
                self.instance.remove_published_actor(whom, port, None);
            }
            Command::Dispatch {
                sender,
                forwarding_stack,
                receiver,
                mid,
                message,
                done,
            } => {
                let mut ctx = engine_ctx!(self);
                let sent = self.instance.dispatch(
                    &mut ctx,
                    sender,
                    &forwarding_stack,
                    receiver,
                    mid,
                    &message,
                );
                let _ = done.send(sent);
            }
            Command::NodeShutdown { node } => {
                let mut ctx = engine_ctx!(self);
                self.instance.handle_node_shutdown(&mut ctx, node);
            }
            Command::Shutdown => {} // consumed by the run loop
        }
    }

    fn register_connection(&mut self, stream: TcpStream, accepted: bool) {
        self.next_handle += 1;
        let hdl = ConnectionHandle::new(self.next_handle);
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(handle = %hdl, %err, "set_nodelay failed");
        }
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(hdl, write_half, out_rx));
        let reader = tokio::spawn(reader_task(
            hdl,
            read_half,
            self.events.clone(),
            self.config.max_payload_len,
        ));
        self.transport.outbound.insert(hdl, out_tx);
        self.conns.insert(
            hdl,
            Connection {
                hdr: Header::default(),
                reader,
            },
        );
        tracing::debug!(handle = %hdl, accepted, "connection registered");
        if accepted {
            // the accepting side opens the handshake
            self.instance
                .write_server_handshake(self.transport.wr_buf(hdl), Some(self.listen_port));
            self.transport.flush(hdl);
        }
    }

    fn on_frame(&mut self, hdl: ConnectionHandle, bytes: Vec<u8>, is_payload: bool) {
        let Some(conn) = self.conns.get_mut(&hdl) else {
            // frames may race the teardown of their connection
            return;
        };
        let mut ctx = Context {
            transport: &mut self.transport,
            callee: &mut self.callee,
            hooks: &mut self.hooks,
        };
        let state = self
            .instance
            .handle(&mut ctx, hdl, &bytes, &mut conn.hdr, is_payload);
        if state == ConnectionState::CloseConnection {
            tracing::info!(handle = %hdl, "closing connection");
            self.teardown(hdl);
        }
    }

    fn on_closed(&mut self, hdl: ConnectionHandle) {
        if self.conns.remove(&hdl).is_none() {
            return; // already torn down through the engine
        }
        self.transport.outbound.remove(&hdl);
        self.transport.buffers.remove(&hdl);
        let mut ctx = engine_ctx!(self);
        self.instance.connection_closed(&mut ctx, hdl);
        tracing::info!(handle = %hdl, "connection closed");
    }

    fn teardown(&mut self, hdl: ConnectionHandle) {
        if let Some(conn) = self.conns.remove(&hdl) {
            conn.reader.abort();
        }
        // dropping the sender lets the writer drain queued bytes, then
        // close the stream
        self.transport.outbound.remove(&hdl);
        self.transport.buffers.remove(&hdl);
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<Event>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "accepted connection");
                if events.send(Event::Accepted { stream }).is_err() {
                    return;
                }
            }
            Err(err) => {
                // transient accept failures (e.g. fd exhaustion)
                tracing::warn!(%err, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn heartbeat_timer(period: Duration, events: mpsc::UnboundedSender<Event>) {
    let mut ticks = tokio::time::interval(period);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticks.tick().await; // the first tick completes immediately
    loop {
        ticks.tick().await;
        if events.send(Event::HeartbeatTick).is_err() {
            return;
        }
    }
}

async fn reader_task(
    hdl: ConnectionHandle,
    mut stream: OwnedReadHalf,
    events: mpsc::UnboundedSender<Event>,
    max_payload_len: usize,
) {
    match read_frames(hdl, &mut stream, &events, max_payload_len).await {
        Ok(()) => tracing::debug!(handle = %hdl, "connection closed by peer"),
        Err(err) => tracing::debug!(handle = %hdl, %err, "connection read failed"),
    }
    let _ = events.send(Event::Closed { hdl });
}

/// Wire-level two-phase read loop: a fixed-size header, then exactly the
/// payload it announces. The length peek here is framing only; the engine
/// re-validates every header.
async fn read_frames(
    hdl: ConnectionHandle,
    stream: &mut OwnedReadHalf,
    events: &mpsc::UnboundedSender<Event>,
    max_payload_len: usize,
) -> io::Result<()> {
    let mut header = [0u8; HEADER_SIZE];
    loop {
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[24..28]);
        let payload_len = u32::from_le_bytes(len_bytes) as usize;
        if events
            .send(Event::Frame {
                hdl,
                bytes: header.to_vec(),
                is_payload: false,
            })
            .is_err()
        {
            return Ok(());
        }
        if payload_len == 0 {
            continue;
        }
        if payload_len > max_payload_len {
            return Err(io::Error::other(format!(
                "announced payload of {payload_len} bytes exceeds the {max_payload_len} byte limit"
            )));
        }
        let mut payload = vec![0u8; payload_len];
        stream.read_exact(&mut payload).await?;
        if events
            .send(Event::Frame {
                hdl,
                bytes: payload,
                is_payload: true,
            })
            .is_err()
        {
            return Ok(());
        }
    }
}

async fn writer_task(
    hdl: ConnectionHandle,
    mut stream: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(err) = stream.write_all(&bytes).await {
            tracing::debug!(handle = %hdl, %err, "connection write failed");
            return;
        }
    }
}
