//! The per-name pipe object: static configuration, the server/client slot
//! arenas, connection wiring and the data-path entry points.

use crate::{
    aqueue::{completion, Completion},
    bytes::{self, ByteStream},
    client::ClientSlot,
    end::{PipeEnd, Transport},
    message::{self, PipeMessage},
    options::{Access, PipeFlags, PipeInfo, PipeMode, PipeOptions, ShareMode, SETTABLE_FLAGS},
    server::{ServerSlot, ServerState},
    status::{PeekOutcome, PipeError, ReadOutcome},
    LOCK_POISON,
};
use log::{debug, trace};
use std::{
    collections::BTreeMap,
    num::NonZeroU32,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Re-check period of the byte-mode flush poll. There is no way to be
/// alerted when a byte-stream backlog drains, so flush re-arms this timer
/// until the backlog is observed empty.
const FLUSH_POLL_PERIOD: Duration = Duration::from_millis(100);

/// Addresses one side of a connection within a pipe's arenas.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum EndRef {
    Server(u32),
    Client(u32),
}

/// A named pipe: configuration fixed by its first creator, plus all dynamic
/// state behind one lock.
pub(crate) struct NamedPipe {
    /// First creator's spelling, kept for display.
    pub name: String,
    /// Lowercased registry key.
    pub key: String,
    pub sharing: ShareMode,
    pub max_instances: Option<NonZeroU32>,
    pub in_buffer_size: usize,
    pub out_buffer_size: usize,
    pub wait_timeout: Duration,
    pub mode: PipeMode,
    /// Static flags shared by every end (`MESSAGE_WRITE` iff message mode).
    pub flags: PipeFlags,
    pub shared: Mutex<PipeShared>,
}

/// Everything guarded by the per-pipe lock. Every state transition happens
/// under it in full, and it is never held across an await.
pub(crate) struct PipeShared {
    pub instances: u32,
    next_id: u32,
    pub servers: BTreeMap<u32, ServerSlot>,
    pub clients: BTreeMap<u32, ClientSlot>,
}

impl PipeShared {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn end(&self, at: EndRef) -> Option<&PipeEnd> {
        match at {
            EndRef::Server(id) => self.servers.get(&id).map(|s| &s.end),
            EndRef::Client(id) => self.clients.get(&id).map(|c| &c.end),
        }
    }
    pub fn end_mut(&mut self, at: EndRef) -> Option<&mut PipeEnd> {
        match at {
            EndRef::Server(id) => self.servers.get_mut(&id).map(|s| &mut s.end),
            EndRef::Client(id) => self.clients.get_mut(&id).map(|c| &mut c.end),
        }
    }
    /// The opposite side of `at`'s link, if any. Server peers are clients
    /// and vice versa.
    pub fn peer_of(&self, at: EndRef) -> Option<EndRef> {
        let peer = self.end(at)?.peer?;
        Some(match at {
            EndRef::Server(_) => EndRef::Client(peer),
            EndRef::Client(_) => EndRef::Server(peer),
        })
    }
}

/// Completes as many pending reads on `at` as its frame queue can satisfy,
/// then propagates the consequences: an emptied queue wakes the peer's
/// flush waiters, a shrunk one re-evaluates the peer's pending writes.
pub(crate) fn reselect_read(shared: &mut PipeShared, at: EndRef) {
    let mut read_done = false;
    loop {
        let Some(end) = shared.end_mut(at) else { return };
        if end.messages.is_empty() {
            break;
        }
        let Some((max_len, completer)) = end.read_q.pop_live() else { break };
        let outcome = if end.message_read() {
            message::read_message(&mut end.messages, max_len)
        } else {
            message::read_bytes(&mut end.messages, max_len)
        };
        completer.complete(Ok(outcome));
        read_done = true;
    }
    let Some(peer) = shared.peer_of(at) else { return };
    let emptied = shared.end(at).map_or(true, |end| end.messages.is_empty());
    if emptied {
        if let Some(peer_end) = shared.end_mut(peer) {
            peer_end.flush_q.complete_all(|| Ok(()));
        }
    } else if read_done {
        reselect_write(shared, peer);
    }
}

/// Walks the reader's frame queue in write order, acknowledging pending
/// writes whose accumulated backlog fits under the reader's threshold (an
/// acknowledgement does not require the frame to have been consumed, only
/// that the backlog is within bound). Frames whose writer stopped waiting
/// are dropped. Finishes by letting the reader's pending reads run.
pub(crate) fn reselect_write(shared: &mut PipeShared, writer: EndRef) {
    let Some(reader) = shared.peer_of(writer) else { return };
    {
        let Some(reader_end) = shared.end_mut(reader) else { return };
        let threshold = reader_end.buffer_size;
        let mut backlog = 0usize;
        reader_end.messages.retain_mut(|msg| {
            if msg.ack_abandoned() {
                return false;
            }
            backlog += msg.remaining();
            if msg.awaiting_ack() && (backlog <= threshold || msg.len() == 0) {
                msg.acknowledge();
            }
            true
        });
    }
    reselect_read(shared, reader);
}

/// Severs the link at `at` symmetrically: both ends lose their peer link
/// within this one locked step, and pending framed work on both sides is
/// force-completed with `status`.
pub(crate) fn sever_link(shared: &mut PipeShared, at: EndRef, status: PipeError) {
    let peer = shared.peer_of(at);
    if let Some(end) = shared.end_mut(at) {
        end.sever(status);
    }
    if let Some(peer) = peer {
        if let Some(end) = shared.end_mut(peer) {
            end.sever(status);
        }
    }
}

/// Tears both sides' transports down, as an explicit disconnect does. With
/// its transport gone, each end reports `Disconnected` to data-path calls.
fn drop_transports(shared: &mut PipeShared, server_id: u32) {
    let client_id = shared.servers.get(&server_id).and_then(|s| s.client);
    if let Some(slot) = shared.servers.get_mut(&server_id) {
        if let Some(Transport::Bytes(stream)) = slot.end.transport.take() {
            stream.close();
        }
    }
    if let Some(client) = client_id.and_then(|id| shared.clients.get_mut(&id)) {
        if let Some(Transport::Bytes(stream)) = client.end.transport.take() {
            stream.close();
        }
    }
}

/// Disarms the byte-mode flush poll and completes its waiters successfully.
pub(crate) fn notify_empty(shared: &mut PipeShared, server_id: u32) {
    let Some(slot) = shared.servers.get_mut(&server_id) else { return };
    if !slot.flush_poll {
        return;
    }
    slot.flush_poll = false;
    slot.end.flush_q.complete_all(|| Ok(()));
}

enum Plan<T> {
    Ready(Result<T, PipeError>),
    Wait(Completion<T>),
    Stream(ByteStream, bool),
}

impl NamedPipe {
    pub(crate) fn new(options: &PipeOptions<'_>, key: String) -> Self {
        Self {
            name: options.name.clone().into_owned(),
            key,
            sharing: options.sharing,
            max_instances: options.max_instances,
            in_buffer_size: options.in_buffer_size,
            out_buffer_size: options.out_buffer_size,
            wait_timeout: options.wait_timeout,
            mode: options.mode,
            flags: options.static_flags(),
            shared: Mutex::new(PipeShared {
                instances: 0,
                next_id: 0,
                servers: BTreeMap::new(),
                clients: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PipeShared> {
        self.shared.lock().expect(LOCK_POISON)
    }

    /// Attaches a new server instance in `Idle`. Later creators must match
    /// the sharing mask exactly and fit under the instance limit; a failed
    /// attach leaves the pipe unmutated.
    pub(crate) fn attach_server(&self, options: &PipeOptions<'_>) -> Result<u32, PipeError> {
        let mut shared = self.lock();
        if let Some(max) = self.max_instances {
            if shared.instances >= max.get() {
                return Err(PipeError::InstanceLimit);
            }
        }
        if self.sharing != options.sharing {
            return Err(PipeError::AccessDenied);
        }
        let id = shared.alloc_id();
        shared
            .servers
            .insert(id, ServerSlot::new(options.server_end_flags(), self.in_buffer_size));
        shared.instances += 1;
        debug!("pipe {:?}: server #{id} created ({} instances)", self.name, shared.instances);
        Ok(id)
    }

    /// Whether a connect request could currently be matched to an instance.
    pub(crate) fn has_available_server(&self) -> bool {
        self.lock()
            .servers
            .values()
            .any(|s| matches!(s.state, ServerState::WaitOpen | ServerState::Idle))
    }

    pub(crate) fn is_unused(&self) -> bool {
        let shared = self.lock();
        shared.instances == 0 && shared.servers.is_empty()
    }

    /// Matches a connect request to an instance — actively listening servers
    /// are preferred over merely idle ones — and wires the transports.
    /// Returns the new client slot id.
    pub(crate) fn connect(&self, access: Access) -> Result<u32, PipeError> {
        let mut shared = self.lock();
        let server_id = {
            let pick = |want: ServerState| {
                shared
                    .servers
                    .iter()
                    .find(|(_, s)| s.state == want)
                    .map(|(id, _)| *id)
            };
            pick(ServerState::WaitOpen)
                .or_else(|| pick(ServerState::Idle))
                .ok_or(PipeError::NotAvailable)?
        };
        if (access.contains(Access::READ) && !self.sharing.contains(ShareMode::READ))
            || (access.contains(Access::WRITE) && !self.sharing.contains(ShareMode::WRITE))
        {
            return Err(PipeError::AccessDenied);
        }

        let client_id = shared.alloc_id();
        let mut client_end = PipeEnd::new(self.flags, self.out_buffer_size);

        let server = shared
            .servers
            .get_mut(&server_id)
            .expect("matched server slot vanished");
        if server.end.framed() {
            server.end.transport = Some(Transport::Messages);
            client_end.transport = Some(Transport::Messages);
        } else {
            let (server_stream, client_stream) =
                bytes::pair(self.in_buffer_size, self.out_buffer_size);
            server.end.transport = Some(Transport::Bytes(server_stream));
            client_end.transport = Some(Transport::Bytes(client_stream));
        }

        if server.state == ServerState::WaitOpen {
            server.listen_q.complete_all(|| Ok(()));
        }
        server.set_state(ServerState::Connected);
        server.client = Some(client_id);
        server.end.peer = Some(client_id);
        client_end.peer = Some(server_id);
        shared
            .clients
            .insert(client_id, ClientSlot { end: client_end, server: Some(server_id) });
        debug!("pipe {:?}: client #{client_id} connected to server #{server_id}", self.name);
        Ok(client_id)
    }

    /// Explicit disconnect: severs the current connection immediately and
    /// discards unread data on both sides.
    pub(crate) fn disconnect_server(&self, server_id: u32) -> Result<(), PipeError> {
        let mut shared = self.lock();
        let state = shared
            .servers
            .get(&server_id)
            .map(|s| s.state)
            .ok_or(PipeError::Broken)?;
        match state {
            ServerState::Connected | ServerState::WaitDisconnect => {
                notify_empty(&mut shared, server_id);
                sever_link(&mut shared, EndRef::Server(server_id), PipeError::Disconnected);
                drop_transports(&mut shared, server_id);
                let client_id = shared.servers.get_mut(&server_id).and_then(|s| s.client.take());
                if let Some(client) = client_id.and_then(|id| shared.clients.get_mut(&id)) {
                    client.server = None;
                }
                if let Some(slot) = shared.servers.get_mut(&server_id) {
                    slot.set_state(ServerState::WaitConnect);
                }
                debug!("pipe {:?}: server #{server_id} disconnected", self.name);
                Ok(())
            }
            ServerState::Idle | ServerState::WaitOpen => Err(PipeError::Listening),
            ServerState::WaitConnect => Err(PipeError::Disconnected),
        }
    }

    /// Server handle close. Returns whether this was the pipe's last
    /// instance (in which case the caller unregisters the pipe).
    pub(crate) fn detach_server(&self, server_id: u32) -> bool {
        let mut shared = self.lock();
        notify_empty(&mut shared, server_id);
        sever_link(&mut shared, EndRef::Server(server_id), PipeError::Broken);
        // only this side's transport goes down; the client keeps its end so
        // leftover inbound data stays drainable (and then reads as Broken)
        if let Some(slot) = shared.servers.get_mut(&server_id) {
            if let Some(Transport::Bytes(stream)) = slot.end.transport.take() {
                stream.close();
            }
        }
        let client_id = shared.servers.get(&server_id).and_then(|s| s.client);
        if let Some(client) = client_id.and_then(|id| shared.clients.get_mut(&id)) {
            client.server = None;
        }
        // dropping the slot resolves any pending listen as Broken
        shared.servers.remove(&server_id);
        shared.instances -= 1;
        debug!("pipe {:?}: server #{server_id} closed ({} instances)", self.name, shared.instances);
        shared.instances == 0 && shared.servers.is_empty()
    }

    /// Client handle close: the server keeps its transport so leftover data
    /// can still be read or flushed, and moves to `WaitDisconnect`.
    pub(crate) fn detach_client(&self, client_id: u32) {
        let mut shared = self.lock();
        sever_link(&mut shared, EndRef::Client(client_id), PipeError::Broken);
        let server_id = shared.clients.get(&client_id).and_then(|c| c.server);
        if let Some(server) = server_id.and_then(|id| shared.servers.get_mut(&id)) {
            server.client = None;
            server.set_state(ServerState::WaitDisconnect);
        }
        if let Some(client) = shared.clients.get_mut(&client_id) {
            if let Some(Transport::Bytes(stream)) = client.end.transport.take() {
                stream.close();
            }
        }
        shared.clients.remove(&client_id);
        debug!("pipe {:?}: client #{client_id} closed", self.name);
    }

    /// Checks that the addressed end is in a state where data-path calls
    /// make sense, mirroring the auxiliary-descriptor statuses a
    /// disconnected server reports.
    fn data_path_guard(shared: &PipeShared, at: EndRef) -> Result<(), PipeError> {
        match at {
            EndRef::Server(id) => {
                let slot = shared.servers.get(&id).ok_or(PipeError::Broken)?;
                match slot.state {
                    ServerState::Idle | ServerState::WaitOpen => Err(PipeError::Listening),
                    ServerState::WaitConnect => Err(PipeError::Disconnected),
                    ServerState::Connected | ServerState::WaitDisconnect => Ok(()),
                }
            }
            EndRef::Client(id) => {
                let slot = shared.clients.get(&id).ok_or(PipeError::Broken)?;
                match slot.end.transport {
                    None => Err(PipeError::Disconnected),
                    Some(_) => Ok(()),
                }
            }
        }
    }

    pub(crate) async fn read(&self, at: EndRef, max_len: usize) -> Result<ReadOutcome, PipeError> {
        let plan = {
            let mut shared = self.lock();
            match Self::data_path_guard(&shared, at) {
                Err(e) => Plan::Ready(Err(e)),
                Ok(()) => {
                    let end = shared.end_mut(at).ok_or(PipeError::Broken)?;
                    if let Some(stream) = end.byte_stream() {
                        Plan::Stream(stream, end.nonblocking())
                    } else if end.peer.is_none() && end.messages.is_empty() {
                        Plan::Ready(Err(PipeError::Broken))
                    } else if end.nonblocking() && end.messages.is_empty() {
                        Plan::Ready(Err(PipeError::NoData))
                    } else {
                        let (completer, completion) = completion();
                        end.read_q.push(max_len, completer);
                        reselect_read(&mut shared, at);
                        Plan::Wait(completion)
                    }
                }
            }
        };
        match plan {
            Plan::Ready(result) => result,
            Plan::Wait(completion) => completion.wait().await,
            Plan::Stream(stream, nonblocking) => {
                if nonblocking {
                    match stream.try_read(max_len) {
                        None => Err(PipeError::Broken),
                        Some(data) if data.is_empty() && max_len != 0 => Err(PipeError::NoData),
                        Some(data) => Ok(ReadOutcome::Data(data)),
                    }
                } else {
                    match stream.read(max_len).await {
                        Some(data) => Ok(ReadOutcome::Data(data)),
                        None => Err(PipeError::Broken),
                    }
                }
            }
        }
    }

    pub(crate) async fn write(&self, at: EndRef, data: &[u8]) -> Result<usize, PipeError> {
        let plan = {
            let mut shared = self.lock();
            match Self::data_path_guard(&shared, at) {
                Err(e) => Plan::Ready(Err(e)),
                Ok(()) => {
                    let Some(end) = shared.end_mut(at) else {
                        return Err(PipeError::Broken);
                    };
                    if let Some(stream) = end.byte_stream() {
                        Plan::Stream(stream, end.nonblocking())
                    } else if end.peer.is_none() {
                        // the transport marker outlives the peer only when
                        // the peer's handle was closed
                        Plan::Ready(Err(PipeError::Broken))
                    } else {
                        let nonblocking = end.nonblocking();
                        let peer = shared.peer_of(at).ok_or(PipeError::Disconnected)?;
                        let (msg, wait) = if nonblocking {
                            (PipeMessage::new(data, None)?, None)
                        } else {
                            let (completer, completion) = completion();
                            (PipeMessage::new(data, Some(completer))?, Some(completion))
                        };
                        let reader = shared.end_mut(peer).ok_or(PipeError::Disconnected)?;
                        reader.messages.push_back(msg);
                        reselect_write(&mut shared, at);
                        match wait {
                            Some(completion) => Plan::Wait(completion),
                            None => Plan::Ready(Ok(data.len())),
                        }
                    }
                }
            }
        };
        match plan {
            Plan::Ready(result) => result,
            Plan::Wait(completion) => completion.wait().await,
            Plan::Stream(stream, nonblocking) => {
                let written = if nonblocking {
                    stream.try_write(data)
                } else {
                    stream.write(data).await
                };
                // a closed stream means the peer existed and went away
                written.map_err(|_| PipeError::Broken)
            }
        }
    }

    /// Unread backlog the peer still holds of this server's written data.
    fn server_backlog(shared: &PipeShared, server_id: u32) -> usize {
        let Some(slot) = shared.servers.get(&server_id) else { return 0 };
        if slot.end.framed() {
            slot.client
                .and_then(|id| shared.clients.get(&id))
                .map_or(0, |c| c.end.available())
        } else {
            slot.end
                .byte_stream()
                .map_or(0, |stream| stream.unread_by_peer())
        }
    }

    /// Flush on a connected server completes only once the peer's unread
    /// backlog is empty. Message mode tracks emptiness exactly; byte mode
    /// re-arms a periodic poll, there being no drain notification.
    pub(crate) async fn flush(self: &Arc<Self>, at: EndRef) -> Result<(), PipeError> {
        let pending = {
            let mut shared = self.lock();
            match at {
                EndRef::Server(id) => {
                    Self::data_path_guard(&shared, at)?;
                    let connected = shared
                        .servers
                        .get(&id)
                        .is_some_and(|s| s.state == ServerState::Connected);
                    if !connected || Self::server_backlog(&shared, id) == 0 {
                        None
                    } else {
                        let (completer, completion) = completion();
                        let slot = shared
                            .servers
                            .get_mut(&id)
                            .expect("flushed server slot vanished");
                        slot.end.flush_q.push((), completer);
                        if !slot.end.framed() && !slot.flush_poll {
                            slot.flush_poll = true;
                            self.arm_flush_poll(id);
                        }
                        Some(completion)
                    }
                }
                EndRef::Client(id) => {
                    let slot = shared.clients.get(&id).ok_or(PipeError::Broken)?;
                    let backlog = if slot.end.framed() {
                        slot.end
                            .peer
                            .and_then(|sid| shared.servers.get(&sid))
                            .map_or(0, |s| s.end.available())
                    } else {
                        0
                    };
                    if backlog == 0 {
                        None
                    } else {
                        let (completer, completion) = completion();
                        let slot = shared
                            .clients
                            .get_mut(&id)
                            .expect("flushed client slot vanished");
                        slot.end.flush_q.push((), completer);
                        Some(completion)
                    }
                }
            }
        };
        match pending {
            None => Ok(()),
            Some(completion) => completion.wait().await,
        }
    }

    fn arm_flush_poll(self: &Arc<Self>, server_id: u32) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(FLUSH_POLL_PERIOD).await;
                let Some(pipe) = weak.upgrade() else { return };
                let mut shared = pipe.lock();
                let Some(slot) = shared.servers.get_mut(&server_id) else { return };
                if !slot.flush_poll {
                    return;
                }
                if !slot.end.flush_q.has_live() {
                    slot.flush_poll = false;
                    return;
                }
                let remaining = match &slot.end.transport {
                    Some(Transport::Bytes(stream)) => stream.unread_by_peer(),
                    _ => 0,
                };
                if remaining == 0 {
                    trace!("pipe {:?}: server #{server_id} flushed", pipe.name);
                    slot.flush_poll = false;
                    slot.end.flush_q.complete_all(|| Ok(()));
                    return;
                }
            }
        });
    }

    /// Non-destructive queue snapshot. Only framed ends track exact message
    /// boundaries, so byte-mode ends report `NotSupported`.
    pub(crate) fn peek(&self, at: EndRef, max_len: usize) -> Result<PeekOutcome, PipeError> {
        let shared = self.lock();
        Self::data_path_guard(&shared, at)?;
        let end = shared.end(at).ok_or(PipeError::Broken)?;
        if !end.framed() {
            return Err(PipeError::NotSupported);
        }
        let available = end.available();
        let (message_length, data) = match end.messages.front() {
            Some(msg) => (msg.remaining(), msg.peek(max_len).to_vec()),
            None => (0, Vec::new()),
        };
        Ok(PeekOutcome { available, message_length, data })
    }

    pub(crate) fn info(&self, at: EndRef) -> Result<PipeInfo, PipeError> {
        let shared = self.lock();
        let end = shared.end(at).ok_or(PipeError::Broken)?;
        let mut flags = end.flags;
        if matches!(at, EndRef::Server(_)) {
            flags |= PipeFlags::SERVER_END;
        }
        Ok(PipeInfo {
            flags,
            sharing: self.sharing,
            max_instances: self.max_instances,
            instances: shared.instances,
            in_buffer_size: self.in_buffer_size,
            out_buffer_size: self.out_buffer_size,
        })
    }

    /// Replaces the end's adjustable flags. Only the message-read and
    /// nonblocking bits are settable, and message-read requires the pipe to
    /// be message-write in the first place.
    pub(crate) fn set_flags(&self, at: EndRef, flags: PipeFlags) -> Result<(), PipeError> {
        if flags.intersects(!SETTABLE_FLAGS) {
            return Err(PipeError::InvalidParameter);
        }
        if flags.contains(PipeFlags::MESSAGE_READ) && !self.flags.contains(PipeFlags::MESSAGE_WRITE)
        {
            return Err(PipeError::InvalidParameter);
        }
        let mut shared = self.lock();
        let end = shared.end_mut(at).ok_or(PipeError::Broken)?;
        end.flags = self.flags | flags;
        Ok(())
    }
}
