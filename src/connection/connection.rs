use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::keepalive;
use crate::buffer::{Buffer, ByteView, DEFAULT_CAPACITY};
use crate::config::Config;
use crate::connection::{Role, Status};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message, MessageType};
use crate::protocol::{
    FrameHeader, HandshakeHeader, MAX_CONTROL_PAYLOAD, MAX_HEADER_LEN, MaskGenerator, OpCode,
    apply_mask, decode_close_payload, encode_close_payload, write_frame,
};
use crate::transport::Transport;

/// A WebSocket connection over a [`Transport`].
///
/// `WebSocket` is a cheap, cloneable handle. All clones drive the same
/// connection: one read and one write may be in flight at a time, further
/// writes queue in FIFO order behind the current one. The connection is torn
/// down when [`force_close`](Self::force_close) is called, when the close
/// handshake completes, on a fatal read error, or when the last handle is
/// dropped.
///
/// ## Example
///
/// ```rust,ignore
/// use wstream::{CloseCode, Message, WebSocket};
///
/// let stream = tokio::net::TcpStream::connect("127.0.0.1:8080").await?;
/// let ws = WebSocket::client(stream);
/// ws.handshake("ws://127.0.0.1:8080", "/chat").await?;
///
/// ws.write_text(b"hello").await?;
/// if let Message::Text(data) = ws.read().await? {
///     println!("received {} bytes", data.len());
/// }
/// ws.close(CloseCode::Normal, "done").await?;
/// ```
pub struct WebSocket<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for WebSocket<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> std::fmt::Debug for WebSocket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("role", &self.shared.role)
            .field("peer", &self.shared.peer)
            .field("status", &self.status())
            .finish()
    }
}

pub(super) struct Shared<T> {
    role: Role,
    config: Config,
    peer: Option<SocketAddr>,
    state: Mutex<State>,
    reader: tokio::sync::Mutex<Reader<T>>,
    writer: tokio::sync::Mutex<Writer<T>>,
    shutdown: watch::Sender<bool>,
    timer: Mutex<Option<AbortHandle>>,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }
    }
}

#[derive(Debug)]
struct State {
    status: Status,
    /// Set once negotiation starts; a connection negotiates at most once.
    negotiated: bool,
    message_type: MessageType,
    last_error: Option<Error>,
    last_heartbeat: Instant,
}

struct Reader<T> {
    io: Option<ReadHalf<T>>,
    buf: Buffer,
    /// Defragmentation buffer for the message in progress.
    payload: Buffer,
    /// Header of the frame whose payload is still arriving.
    frame: Option<FrameHeader>,
    /// Opcode of the message in progress.
    opcode: Option<OpCode>,
    /// Bytes of a rejected frame still to be dropped.
    skip: u64,
    /// Dropping the continuation frames of a rejected message.
    discarding: bool,
}

struct Writer<T> {
    io: Option<WriteHalf<T>>,
    buf: Buffer,
    ctrl: Buffer,
    masks: MaskGenerator,
    /// Outbox whose flush was abandoned part-way. Its unsent tail must reach
    /// the wire before any new frame.
    pending: Option<Outbox>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once `force_close` has been called.
async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Run a transport operation, abandoning it if the connection is force
/// closed in the meantime.
async fn cancellable<F, R>(shutdown: &watch::Sender<bool>, op: F) -> Result<R>
where
    F: Future<Output = io::Result<R>>,
{
    tokio::select! {
        biased;
        () = shutdown_signal(shutdown.subscribe()) => Err(Error::Cancelled),
        res = op => res.map_err(Error::from),
    }
}

impl<T: Transport> Reader<T> {
    /// Read more bytes from the transport into the read buffer.
    async fn fill(&mut self, shutdown: &watch::Sender<bool>, reserve: usize) -> Result<usize> {
        if self.buf.is_empty() {
            self.buf.reset();
        }
        self.buf.ensure_writable(reserve);
        let Some(io) = self.io.as_mut() else {
            return Err(Error::AlreadyClosed);
        };
        let res = cancellable(shutdown, io.read(self.buf.writable_mut())).await;
        match res {
            Ok(0) => Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(n) => {
                self.buf.advance_write(n);
                Ok(n)
            }
            Err(e) => {
                if matches!(e, Error::Cancelled) {
                    self.io = None;
                }
                Err(e)
            }
        }
    }

    /// Drop a rejected frame and, if it was not final, the rest of its message.
    fn reject(&mut self, header: &FrameHeader) {
        self.skip = header.header_len as u64 + header.payload_len;
        self.discarding = !header.fin;
        self.payload.reset();
        self.payload.shrink_to(DEFAULT_CAPACITY);
        self.opcode = None;
    }
}

#[derive(Clone, Copy)]
enum Outbox {
    Data,
    Control,
}

impl<T: Transport> Writer<T> {
    fn outbox(&mut self, which: Outbox) -> &mut Buffer {
        match which {
            Outbox::Data => &mut self.buf,
            Outbox::Control => &mut self.ctrl,
        }
    }

    /// Write the outbox to the transport and flush it. Returns the payload
    /// byte count recorded on the outbox.
    ///
    /// Written bytes are consumed as they go out, so if this future is
    /// dropped the outbox keeps exactly the unsent tail and `pending` names
    /// it.
    async fn flush(&mut self, which: Outbox, shutdown: &watch::Sender<bool>) -> Result<usize> {
        self.pending = Some(which);
        let Writer { io: half, buf, ctrl, pending, .. } = self;
        let out = match which {
            Outbox::Data => buf,
            Outbox::Control => ctrl,
        };
        let sent = out.bytes();
        let Some(stream) = half.as_mut() else {
            out.reset();
            *pending = None;
            return Err(Error::AlreadyClosed);
        };
        let res = cancellable(shutdown, async {
            while !out.is_empty() {
                let n = stream.write(out.readable()).await?;
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                out.advance_read(n);
            }
            stream.flush().await
        })
        .await;
        out.reset();
        *pending = None;
        if matches!(res, Err(Error::Cancelled)) {
            *half = None;
        }
        res.map(|()| sent)
    }

    async fn shutdown_write(&mut self, shutdown: &watch::Sender<bool>) -> Result<()> {
        let Some(stream) = self.io.as_mut() else {
            return Err(Error::AlreadyClosed);
        };
        cancellable(shutdown, stream.shutdown()).await
    }
}

impl<T: Transport> WebSocket<T> {
    /// Wrap a transport. No bytes are exchanged until
    /// [`handshake`](Self::handshake) or [`accept`](Self::accept).
    pub fn new(io: T, role: Role, config: Config) -> Self {
        let peer = io.peer_addr();
        let (rd, wr) = tokio::io::split(io);
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            role,
            peer,
            state: Mutex::new(State {
                status: Status::Closed,
                negotiated: false,
                message_type: MessageType::None,
                last_error: None,
                last_heartbeat: Instant::now(),
            }),
            reader: tokio::sync::Mutex::new(Reader {
                io: Some(rd),
                buf: Buffer::with_capacity(config.read_buffer_size),
                payload: Buffer::new(),
                frame: None,
                opcode: None,
                skip: 0,
                discarding: false,
            }),
            writer: tokio::sync::Mutex::new(Writer {
                io: Some(wr),
                buf: Buffer::with_capacity(config.write_buffer_size),
                ctrl: Buffer::with_capacity(MAX_CONTROL_PAYLOAD + MAX_HEADER_LEN),
                masks: MaskGenerator::new(),
                pending: None,
            }),
            shutdown,
            timer: Mutex::new(None),
            config,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Client connection with [`Config::client`].
    pub fn client(io: T) -> Self {
        Self::new(io, Role::Client, Config::client())
    }

    /// Server connection with [`Config::server`].
    pub fn server(io: T) -> Self {
        Self::new(io, Role::Server, Config::server())
    }

    pub(super) fn from_shared(shared: Arc<Shared<T>>) -> Self {
        Self { shared }
    }

    pub(super) fn downgrade(&self) -> std::sync::Weak<Shared<T>> {
        Arc::downgrade(&self.shared)
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.shared.role
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer
    }

    #[must_use]
    pub fn status(&self) -> Status {
        lock(&self.shared.state).status
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status() == Status::Opened
    }

    /// Type of the last message returned by [`read`](Self::read).
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        lock(&self.shared.state).message_type
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        self.message_type() == MessageType::Text
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.message_type() == MessageType::Binary
    }

    /// The error that broke the connection, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<Error> {
        lock(&self.shared.state).last_error.clone()
    }

    /// Time since a frame was last received from the peer.
    #[must_use]
    pub fn idle_time(&self) -> std::time::Duration {
        lock(&self.shared.state).last_heartbeat.elapsed()
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    /// Perform the client side of the upgrade handshake.
    ///
    /// `url` is `ws://host[:port][/path]` or `wss://...`; `target` is the
    /// request path and may be empty to use the URL's path. Returns the
    /// server's response header.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyOpened` if this connection already negotiated
    /// - any handshake error; the transport is closed on failure
    pub async fn handshake(&self, url: &str, target: &str) -> Result<HandshakeHeader> {
        self.begin_negotiation()?;
        let result = match HandshakeHeader::build_request(url, target) {
            Ok(request) => self.negotiate_client(&request).await,
            Err(e) => Err(e),
        };
        self.finish_negotiation(result)
    }

    /// Like [`handshake`](Self::handshake), sending a request built with
    /// [`HandshakeHeader::build_request`] and extended by the caller, for
    /// example with an `Origin` or cookie field.
    ///
    /// # Errors
    ///
    /// Same as [`handshake`](Self::handshake).
    pub async fn handshake_with(&self, request: &HandshakeHeader) -> Result<HandshakeHeader> {
        self.begin_negotiation()?;
        let result = self.negotiate_client(request).await;
        self.finish_negotiation(result)
    }

    /// Perform the server side of the upgrade handshake and return the
    /// client's request header.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyOpened` if this connection already negotiated
    /// - any handshake error; the transport is closed on failure
    pub async fn accept(&self) -> Result<HandshakeHeader> {
        self.accept_with(&[]).await
    }

    /// Like [`accept`](Self::accept), for a transport whose first bytes were
    /// already read by an HTTP front end. `prefix` is parsed before anything
    /// else is read.
    ///
    /// # Errors
    ///
    /// Same as [`accept`](Self::accept).
    pub async fn accept_with(&self, prefix: &[u8]) -> Result<HandshakeHeader> {
        self.begin_negotiation()?;
        let result = self.negotiate_server(prefix).await;
        self.finish_negotiation(result)
    }

    fn begin_negotiation(&self) -> Result<()> {
        {
            let mut state = lock(&self.shared.state);
            if state.negotiated || state.status != Status::Closed {
                return Err(Error::AlreadyOpened);
            }
            state.negotiated = true;
            state.status = Status::Negotiating;
            state.last_heartbeat = Instant::now();
        }
        self.start_keepalive();
        Ok(())
    }

    fn finish_negotiation(&self, result: Result<HandshakeHeader>) -> Result<HandshakeHeader> {
        match result {
            Ok(header) => {
                let mut state = lock(&self.shared.state);
                if state.status != Status::Negotiating {
                    return Err(Error::Cancelled);
                }
                state.status = Status::Opened;
                state.last_heartbeat = Instant::now();
                drop(state);
                debug!(peer = ?self.shared.peer, role = %self.shared.role, path = header.path(), "websocket opened");
                Ok(header)
            }
            Err(e) => {
                warn!(peer = ?self.shared.peer, role = %self.shared.role, error = %e, "websocket negotiation failed");
                self.record_error(&e);
                self.force_close();
                Err(e)
            }
        }
    }

    async fn negotiate_client(&self, request: &HandshakeHeader) -> Result<HandshakeHeader> {
        let key = request.key().unwrap_or_default();
        {
            let mut writer = self.shared.writer.lock().await;
            writer.buf.reset();
            writer.buf.append(request.encode().as_bytes());
            self.flush(&mut writer, Outbox::Data).await?;
        }

        let mut reader = self.shared.reader.lock().await;
        loop {
            if let Some(response) = HandshakeHeader::parse_response(reader.buf.readable(), key)? {
                self.shared.config.limits.check_handshake_size(response.consumed())?;
                reader.buf.advance_read(response.consumed());
                return Ok(response);
            }
            self.read_header_more(&mut reader).await?;
        }
    }

    async fn negotiate_server(&self, prefix: &[u8]) -> Result<HandshakeHeader> {
        let request = {
            let mut reader = self.shared.reader.lock().await;
            reader.buf.append(prefix);
            loop {
                if let Some(request) = HandshakeHeader::parse_request(reader.buf.readable())? {
                    self.shared.config.limits.check_handshake_size(request.consumed())?;
                    reader.buf.advance_read(request.consumed());
                    break request;
                }
                self.read_header_more(&mut reader).await?;
            }
        };

        let response = HandshakeHeader::build_response(&request);
        let mut writer = self.shared.writer.lock().await;
        writer.buf.reset();
        writer.buf.append(response.encode().as_bytes());
        self.flush(&mut writer, Outbox::Data).await?;
        Ok(request)
    }

    async fn read_header_more(&self, reader: &mut Reader<T>) -> Result<()> {
        let limits = &self.shared.config.limits;
        limits.check_handshake_size(reader.buf.len())?;
        let room = limits.max_handshake_size - reader.buf.len();
        reader.fill(&self.shared.shutdown, room).await?;
        Ok(())
    }

    fn start_keepalive(&self) {
        if let Some(settings) = self.shared.config.active_keepalive() {
            let handle = keepalive::spawn(self, settings.clone());
            if let Some(old) = lock(&self.shared.timer).replace(handle) {
                old.abort();
            }
        }
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Read the next complete message.
    ///
    /// Pings are answered and pongs absorbed without returning. A close
    /// frame from the peer ends the connection and is returned as
    /// [`Message::Close`].
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyClosed` if the connection is closed
    /// - `Error::PayloadTooBig` if the message would exceed the configured
    ///   maximum; the message is dropped and the connection stays usable
    /// - `Error::ExpectClose` if a data frame arrives after this side sent
    ///   its close frame; the frame is dropped
    /// - framing and transport errors, which close the connection
    pub async fn read(&self) -> Result<Message> {
        self.check_usable()?;
        let mut reader = self.shared.reader.lock().await;
        if self.status() == Status::Closed {
            reader.io = None;
            return Err(Error::AlreadyClosed);
        }

        let result = self.read_message(&mut reader).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                if e.is_protocol_error() && self.is_open() {
                    warn!(peer = ?self.shared.peer, error = %e, "protocol error, closing");
                    let payload = encode_close_payload(e.close_code(), "");
                    let _ = self.send_control(OpCode::Close, &payload).await;
                }
                self.record_error(e);
                reader.io = None;
                drop(reader);
                self.force_close();
            }
        }
        result
    }

    async fn read_message(&self, reader: &mut Reader<T>) -> Result<Message> {
        let shutdown = &self.shared.shutdown;
        let reserve = self.shared.config.fragment_size + MAX_HEADER_LEN;

        loop {
            if reader.skip > 0 {
                let n = reader.skip.min(reader.buf.len() as u64);
                reader.buf.advance_read(n as usize);
                reader.skip -= n;
                if reader.skip > 0 {
                    reader.fill(shutdown, reserve).await?;
                    continue;
                }
            }

            let header = match reader.frame {
                Some(header) => header,
                None => {
                    let Some(header) = FrameHeader::parse(reader.buf.readable())? else {
                        reader.fill(shutdown, reserve).await?;
                        continue;
                    };
                    if header.opcode.is_data() {
                        if reader.discarding {
                            if header.opcode != OpCode::Continuation {
                                return Err(Error::BadFrame);
                            }
                            reader.reject(&header);
                            continue;
                        }
                        let size = reader.payload.len() as u64 + header.payload_len;
                        if let Err(e) = self.shared.config.limits.check_message_size(size) {
                            debug!(peer = ?self.shared.peer, size, "dropping oversized message");
                            reader.reject(&header);
                            return Err(e);
                        }
                    }
                    reader.frame = Some(header);
                    header
                }
            };

            let frame_len = header.frame_len()?;
            if reader.buf.len() < frame_len {
                let missing = frame_len - reader.buf.len();
                reader.fill(shutdown, missing.max(reserve)).await?;
                continue;
            }
            reader.frame = None;
            self.touch();
            trace!(opcode = %header.opcode, len = header.payload_len, fin = header.fin, "frame received");

            if self.status() == Status::ClosingBoth && header.opcode != OpCode::Close {
                reader.buf.advance_read(frame_len);
                return Err(Error::ExpectClose);
            }

            let body = header.header_len..frame_len;
            if header.masked {
                apply_mask(&mut reader.buf.readable_mut()[body.clone()], header.mask_key);
            }

            if header.opcode.is_control() {
                let payload = reader.buf.readable()[body].to_vec();
                reader.buf.advance_read(frame_len);
                match header.opcode {
                    OpCode::Ping => self.send_control(OpCode::Pong, &payload).await?,
                    OpCode::Close => return self.on_peer_close(reader, &payload).await,
                    _ => {}
                }
                continue;
            }

            match (header.opcode, reader.opcode) {
                (OpCode::Continuation, None) | (OpCode::Text | OpCode::Binary, Some(_)) => {
                    return Err(Error::BadFrame);
                }
                (OpCode::Text | OpCode::Binary, None) => reader.opcode = Some(header.opcode),
                _ => {}
            }

            let Reader { buf, payload, .. } = &mut *reader;
            payload.append(&buf.readable()[body]);
            buf.advance_read(frame_len);

            if header.fin {
                let data = Bytes::copy_from_slice(reader.payload.readable());
                reader.payload.reset();
                let message = match reader.opcode.take() {
                    Some(OpCode::Text) => {
                        lock(&self.shared.state).message_type = MessageType::Text;
                        Message::Text(data)
                    }
                    _ => {
                        lock(&self.shared.state).message_type = MessageType::Binary;
                        Message::Binary(data)
                    }
                };
                return Ok(message);
            }
        }
    }

    async fn on_peer_close(&self, reader: &mut Reader<T>, payload: &[u8]) -> Result<Message> {
        let frame = decode_close_payload(ByteView::new(payload))?;
        debug!(
            peer = ?self.shared.peer,
            code = ?frame.as_ref().map(|f| f.code.as_u16()),
            status = %self.status(),
            "close frame received"
        );
        if self.is_open() {
            let _ = self.send_control(OpCode::Close, payload).await;
        }
        reader.io = None;
        self.force_close();
        Ok(Message::Close(frame))
    }

    /// Refresh peer liveness.
    fn touch(&self) {
        lock(&self.shared.state).last_heartbeat = Instant::now();
    }

    fn check_usable(&self) -> Result<()> {
        let state = lock(&self.shared.state);
        if state.status == Status::Closed {
            return Err(Error::AlreadyClosed);
        }
        match &state.last_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn record_error(&self, e: &Error) {
        if !matches!(e, Error::Cancelled | Error::AlreadyClosed) {
            lock(&self.shared.state).last_error.get_or_insert_with(|| e.clone());
        }
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Send a text message. Returns the number of payload bytes written.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyClosed` unless the connection is open
    /// - `Error::PayloadTooBig` if `payload` exceeds the configured maximum;
    ///   nothing is written
    /// - a previously recorded transport error, or a new one
    pub async fn write_text(&self, payload: impl AsRef<[u8]>) -> Result<usize> {
        self.write_message(OpCode::Text, payload.as_ref()).await
    }

    /// Send a binary message. Returns the number of payload bytes written.
    ///
    /// # Errors
    ///
    /// Same as [`write_text`](Self::write_text).
    pub async fn write_binary(&self, payload: impl AsRef<[u8]>) -> Result<usize> {
        self.write_message(OpCode::Binary, payload.as_ref()).await
    }

    async fn write_message(&self, opcode: OpCode, payload: &[u8]) -> Result<usize> {
        self.check_writable()?;
        self.shared
            .config
            .limits
            .check_message_size(payload.len() as u64)?;

        let mut writer = self.shared.writer.lock().await;
        self.resume(&mut writer)
            .await
            .inspect_err(|e| self.record_error(e))?;
        self.check_writable()?;

        let fragment_size = self.shared.config.fragment_size;
        let mask = self.shared.config.mask_frames;
        let Writer { buf, masks, .. } = &mut *writer;
        buf.reset();
        buf.ensure_writable(payload.len() + MAX_HEADER_LEN * (payload.len() / fragment_size + 1));
        if payload.is_empty() {
            write_frame(buf, true, opcode, &[], mask.then(|| masks.next_key()));
        } else {
            let mut chunks = payload.chunks(fragment_size).peekable();
            let mut code = opcode;
            while let Some(chunk) = chunks.next() {
                let fin = chunks.peek().is_none();
                write_frame(buf, fin, code, chunk, mask.then(|| masks.next_key()));
                code = OpCode::Continuation;
            }
        }
        buf.set_bytes(payload.len());
        trace!(opcode = %opcode, len = payload.len(), wire = buf.len(), "writing message");

        self.flush(&mut writer, Outbox::Data)
            .await
            .inspect_err(|e| self.record_error(e))
    }

    fn check_writable(&self) -> Result<()> {
        let state = lock(&self.shared.state);
        if !state.status.can_send() {
            return Err(Error::AlreadyClosed);
        }
        match &state.last_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Send one control frame through the control outbox. Skipped unless the
    /// connection is open.
    pub(super) async fn send_control(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mut writer = self.shared.writer.lock().await;
        self.resume(&mut writer)
            .await
            .inspect_err(|e| self.record_error(e))?;
        if !self.is_open() {
            return Ok(());
        }
        let payload = &payload[..payload.len().min(MAX_CONTROL_PAYLOAD)];
        let mask = self.shared.config.mask_frames;
        let Writer { ctrl, masks, .. } = &mut *writer;
        ctrl.reset();
        write_frame(ctrl, true, opcode, payload, mask.then(|| masks.next_key()));
        ctrl.set_bytes(payload.len());
        trace!(opcode = %opcode, len = payload.len(), "writing control frame");

        self.flush(&mut writer, Outbox::Control)
            .await
            .map(|_| ())
            .inspect_err(|e| self.record_error(e))
    }

    /// Flush an outbox. Once a close frame is on the wire the connection
    /// moves to `ClosingBoth` and the write half is shut down.
    async fn flush(&self, writer: &mut Writer<T>, which: Outbox) -> Result<usize> {
        let closing = writer.outbox(which).is_close();
        let sent = writer.flush(which, &self.shared.shutdown).await?;
        if closing {
            {
                let mut state = lock(&self.shared.state);
                if state.status == Status::ClosingLocal {
                    state.status = Status::ClosingBoth;
                }
            }
            let _ = writer.shutdown_write(&self.shared.shutdown).await;
        }
        Ok(sent)
    }

    /// Finish a frame left part-written by a write that was dropped.
    async fn resume(&self, writer: &mut Writer<T>) -> Result<()> {
        if let Some(which) = writer.pending {
            trace!(peer = ?self.shared.peer, "resuming interrupted write");
            self.flush(writer, which).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Start the close handshake and wait for the peer's close frame.
    ///
    /// The reason is cut to 123 bytes. Once the peer echoes the close, the
    /// transport is torn down.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyClosed` unless the connection is open; nothing is sent
    /// - `Error::ExpectClose` if the peer sends a data frame instead of
    ///   closing; call `close` again or [`read`](Self::read) to keep waiting
    /// - transport errors
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.start_close(code, reason).await?;
        loop {
            match self.read().await {
                Ok(Message::Close(_)) | Err(Error::AlreadyClosed) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Send the close frame and shut down the write half, without waiting.
    pub(super) async fn start_close(&self, code: CloseCode, reason: &str) -> Result<()> {
        {
            let mut state = lock(&self.shared.state);
            if state.status != Status::Opened {
                return Err(Error::AlreadyClosed);
            }
            state.status = Status::ClosingLocal;
        }
        debug!(peer = ?self.shared.peer, code = code.as_u16(), reason, "closing");

        let payload = encode_close_payload(code, reason);
        let mask = self.shared.config.mask_frames;
        let mut writer = self.shared.writer.lock().await;
        let mut result = self.resume(&mut writer).await;
        if result.is_ok() {
            let Writer { ctrl, masks, .. } = &mut *writer;
            ctrl.reset();
            write_frame(ctrl, true, OpCode::Close, &payload, mask.then(|| masks.next_key()));
            ctrl.set_close(true);
            result = self.flush(&mut writer, Outbox::Control).await.map(|_| ());
        }

        if let Err(e) = result {
            self.record_error(&e);
            drop(writer);
            self.force_close();
            return Err(e);
        }
        Ok(())
    }

    /// Tear the connection down at once.
    ///
    /// Cancels the keepalive timer and drops the transport. In-flight reads
    /// and writes fail with `Error::Cancelled`. Calling it again does
    /// nothing.
    pub fn force_close(&self) {
        lock(&self.shared.state).status = Status::Closed;
        if self.shared.shutdown.send_replace(true) {
            return;
        }
        if let Some(timer) = lock(&self.shared.timer).take() {
            timer.abort();
        }
        if let Ok(mut reader) = self.shared.reader.try_lock() {
            reader.io = None;
        }
        if let Ok(mut writer) = self.shared.writer.try_lock() {
            writer.io = None;
        }
        debug!(peer = ?self.shared.peer, role = %self.shared.role, "websocket closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn server_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let mut buf = Buffer::new();
        write_frame(&mut buf, fin, opcode, payload, None);
        buf.readable().to_vec()
    }

    fn client_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let mut buf = Buffer::new();
        write_frame(&mut buf, fin, opcode, payload, Some(0x0102_0304));
        buf.readable().to_vec()
    }

    /// An open server connection and the raw client end of its transport.
    async fn open_server() -> (WebSocket<DuplexStream>, DuplexStream) {
        let (a, mut peer) = tokio::io::duplex(1 << 16);
        let ws = WebSocket::server(a);
        let request = HandshakeHeader::build_request("ws://localhost", "/").unwrap();
        peer.write_all(request.encode().as_bytes()).await.unwrap();
        ws.accept().await.unwrap();

        let mut response = vec![0; 4096];
        let n = peer.read(&mut response).await.unwrap();
        assert!(response[..n].starts_with(b"HTTP/1.1 101"));
        (ws, peer)
    }

    #[tokio::test]
    async fn test_new_is_closed() {
        let (a, _b) = tokio::io::duplex(64);
        let ws = WebSocket::client(a);
        assert_eq!(ws.status(), Status::Closed);
        assert_eq!(ws.role(), Role::Client);
        assert!(matches!(ws.read().await, Err(Error::AlreadyClosed)));
        assert!(matches!(ws.write_text("x").await, Err(Error::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_accept_opens() {
        let (ws, _peer) = open_server().await;
        assert!(ws.is_open());
        assert!(matches!(ws.accept().await, Err(Error::AlreadyOpened)));
    }

    #[tokio::test]
    async fn test_read_masked_text() {
        let (ws, mut peer) = open_server().await;
        peer.write_all(&client_frame(true, OpCode::Text, b"Hello")).await.unwrap();

        let msg = ws.read().await.unwrap();
        assert_eq!(msg, Message::Text(Bytes::from_static(b"Hello")));
        assert!(ws.is_text());
    }

    #[tokio::test]
    async fn test_write_binary_unmasked() {
        let (ws, mut peer) = open_server().await;
        assert_eq!(ws.write_binary([1, 2, 3]).await.unwrap(), 3);

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x82, 0x03, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (ws, mut peer) = open_server().await;
        peer.write_all(&client_frame(true, OpCode::Ping, b"ping")).await.unwrap();
        peer.write_all(&client_frame(true, OpCode::Binary, b"x")).await.unwrap();

        assert!(ws.read().await.unwrap().is_binary());
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf.as_slice(), server_frame(true, OpCode::Pong, b"ping").as_slice());
    }

    #[tokio::test]
    async fn test_peer_close_is_echoed() {
        let (ws, mut peer) = open_server().await;
        peer.write_all(&client_frame(true, OpCode::Close, &[0x03, 0xe8])).await.unwrap();

        match ws.read().await.unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(ws.status(), Status::Closed);

        let mut echo = Vec::new();
        peer.read_to_end(&mut echo).await.unwrap();
        assert_eq!(echo, server_frame(true, OpCode::Close, &[0x03, 0xe8]));
        assert!(matches!(ws.read().await, Err(Error::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_protocol_error_closes() {
        let (ws, mut peer) = open_server().await;
        peer.write_all(&[0xC1, 0x80, 0, 0, 0, 0]).await.unwrap();

        assert!(matches!(ws.read().await, Err(Error::BadFrame)));
        assert_eq!(ws.status(), Status::Closed);
        assert!(matches!(ws.last_error(), Some(Error::BadFrame)));

        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, server_frame(true, OpCode::Close, &[0x03, 0xea]));
    }

    #[tokio::test]
    async fn test_rejected_message_releases_buffer() {
        let (ws, mut peer) = open_server().await;
        let half = ws.config().limits.max_message_size / 2 + 1;
        peer.write_all(&client_frame(false, OpCode::Binary, &vec![1; half])).await.unwrap();
        peer.write_all(&client_frame(false, OpCode::Continuation, &vec![2; half])).await.unwrap();

        assert!(matches!(ws.read().await, Err(Error::PayloadTooBig { .. })));
        let reader = ws.shared.reader.lock().await;
        assert!(reader.payload.is_empty());
        assert_eq!(reader.payload.capacity(), DEFAULT_CAPACITY);
    }

    #[tokio::test]
    async fn test_close_frame_moves_to_closing_both() {
        let (ws, mut peer) = open_server().await;
        ws.start_close(CloseCode::Normal, "").await.unwrap();
        assert_eq!(ws.status(), Status::ClosingBoth);

        let mut sent = Vec::new();
        peer.read_to_end(&mut sent).await.unwrap();
        assert_eq!(sent, server_frame(true, OpCode::Close, &[0x03, 0xe8]));
        assert!(ws.shared.writer.lock().await.pending.is_none());
    }

    #[tokio::test]
    async fn test_force_close_idempotent() {
        let (ws, mut peer) = open_server().await;
        ws.force_close();
        ws.force_close();
        assert_eq!(ws.status(), Status::Closed);

        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
