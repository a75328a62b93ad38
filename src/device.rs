//! The namespace root under which pipes are created and looked up by name.

use crate::{
    aqueue::{completion, AsyncQueue},
    client::ClientHandle,
    options::{Access, PipeOptions},
    pipe::NamedPipe,
    server::ServerHandle,
    status::PipeError,
    LOCK_POISON,
};
use log::debug;
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Deadline applied to a wait-for-instance request that neither names its
/// own timeout nor targets an existing pipe with a configured default.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// The named-pipe namespace root.
///
/// Holds the name-to-pipe registry — a pipe object is inserted by the first
/// create request for its name and removed together with its last server
/// instance — and implements the device-level "wait until any instance of
/// this name is available" protocol. Names are matched
/// ASCII-case-insensitively.
#[derive(Clone)]
pub struct PipeDevice {
    shared: Arc<DeviceShared>,
}

pub(crate) struct DeviceShared {
    state: Mutex<DeviceState>,
}

struct DeviceState {
    pipes: HashMap<String, Arc<NamedPipe>>,
    /// Per-name wait-for-instance queues; an entry may predate its pipe.
    waiters: HashMap<String, AsyncQueue<(), ()>>,
}

impl PipeDevice {
    /// Creates an empty namespace.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                state: Mutex::new(DeviceState {
                    pipes: HashMap::new(),
                    waiters: HashMap::new(),
                }),
            }),
        }
    }

    /// Creates a server instance of the named pipe, establishing the pipe's
    /// static configuration if this is the first instance of its name.
    ///
    /// Later creators must match the sharing mask exactly
    /// ([`AccessDenied`](PipeError::AccessDenied) otherwise) and fit under
    /// the configured instance limit
    /// ([`InstanceLimit`](PipeError::InstanceLimit)). A malformed name, an
    /// empty sharing mask or message-read without message-write fail with
    /// [`InvalidParameter`](PipeError::InvalidParameter).
    pub fn create(&self, options: &PipeOptions<'_>) -> Result<ServerHandle, PipeError> {
        options.validate()?;
        let key = options.name.to_ascii_lowercase();
        let mut st = self.shared.state.lock().expect(LOCK_POISON);
        let pipe = match st.pipes.get(&key) {
            Some(pipe) => Arc::clone(pipe),
            None => {
                let pipe = Arc::new(NamedPipe::new(options, key.clone()));
                st.pipes.insert(key.clone(), Arc::clone(&pipe));
                debug!("created named pipe {:?}", options.name);
                pipe
            }
        };
        let id = pipe.attach_server(options)?;
        // a fresh Idle instance makes the name connect-eligible
        if let Some(mut queue) = st.waiters.remove(&key) {
            queue.complete_all(|| Ok(()));
        }
        drop(st);
        Ok(ServerHandle { device: Arc::clone(&self.shared), pipe, id })
    }

    /// Connects a client to an available server instance of `name`,
    /// preferring an actively listening instance over an idle one.
    ///
    /// Fails with [`NotAvailable`](PipeError::NotAvailable) when the name
    /// does not exist or no instance can accept, and with
    /// [`AccessDenied`](PipeError::AccessDenied) when `access` exceeds the
    /// pipe's sharing mask.
    pub fn connect(&self, name: &str, access: Access) -> Result<ClientHandle, PipeError> {
        let pipe = self.lookup(name).ok_or(PipeError::NotAvailable)?;
        let id = pipe.connect(access)?;
        Ok(ClientHandle { pipe, id })
    }

    /// Waits until some instance of `name` can accept a connection.
    ///
    /// Succeeds immediately if a connect-eligible instance already exists;
    /// otherwise resolves when one appears (through a listen or a create),
    /// or fails with [`IoTimeout`](PipeError::IoTimeout) once the deadline
    /// elapses. The deadline is `timeout` if given, else the pipe's
    /// configured default, else a crate-level default for names that do not
    /// exist yet.
    pub async fn wait_for_instance(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<(), PipeError> {
        let key = name.to_ascii_lowercase();
        let (pending, deadline) = {
            let mut st = self.shared.state.lock().expect(LOCK_POISON);
            let pipe = st.pipes.get(&key).cloned();
            if let Some(pipe) = &pipe {
                if pipe.has_available_server() {
                    return Ok(());
                }
            }
            let deadline = timeout
                .or_else(|| pipe.map(|p| p.wait_timeout))
                .unwrap_or(DEFAULT_WAIT_TIMEOUT);
            let (completer, completion) = completion();
            let queue = st.waiters.entry(key).or_default();
            queue.prune();
            queue.push((), completer);
            (completion, deadline)
        };
        pending.wait_deadline(deadline).await
    }

    fn lookup(&self, name: &str) -> Option<Arc<NamedPipe>> {
        let key = name.to_ascii_lowercase();
        self.shared.state.lock().expect(LOCK_POISON).pipes.get(&key).cloned()
    }
}

impl Default for PipeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for PipeDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let st = self.shared.state.lock().expect(LOCK_POISON);
        f.debug_struct("PipeDevice").field("pipes", &st.pipes.len()).finish()
    }
}

impl DeviceShared {
    /// Resolves every wait-for-instance request parked on `key`.
    pub(crate) fn satisfy_waiters(&self, key: &str) {
        let mut st = self.state.lock().expect(LOCK_POISON);
        if let Some(mut queue) = st.waiters.remove(key) {
            queue.complete_all(|| Ok(()));
        }
    }

    /// Unregisters `pipe` if it is still the one mapped at `key` and has no
    /// instances left. Racing creators are serialized by the device lock.
    pub(crate) fn remove_pipe(&self, key: &str, pipe: &Arc<NamedPipe>) {
        let mut st = self.state.lock().expect(LOCK_POISON);
        if !pipe.is_unused() {
            return;
        }
        if st.pipes.get(key).is_some_and(|current| Arc::ptr_eq(current, pipe)) {
            st.pipes.remove(key);
            debug!("removed named pipe {:?}", pipe.name);
        }
    }
}
