//! Session manager — one pty per live connection.
//!
//! The manager is the single owner of every pty handle. Connection tasks
//! address their terminal by session id; they never hold the handle.
//!
//! The session map lock is only held for lookups and inserts. Writes go
//! through a per-session writer lock, so a pty whose input is full blocks
//! its own session only.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use replgrid_core::WorkspaceId;

use crate::error::{TerminalError, TerminalResult};

/// Connection id. A session never outlives its connection.
pub type SessionId = String;

/// Identifies one spawned pty. A session that reopens gets a new one.
pub type Generation = u64;

const READ_CHUNK: usize = 4096;

/// How shells are spawned.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub program: String,
    pub cwd: PathBuf,
    /// Complete environment of the shell, already sanitized.
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

/// Output of a pty, delivered to the owning connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Output(Bytes),
    /// The reader of pty `generation` hit EOF.
    Exited { generation: Generation },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Spawned,
    /// The session already had a live pty; it was kept.
    Reattached,
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

struct PtySession {
    generation: Generation,
    workspace_id: WorkspaceId,
    master: Box<dyn MasterPty + Send>,
    writer: SharedWriter,
    child: Box<dyn Child + Send + Sync>,
    cols: u16,
    rows: u16,
}

pub struct SessionManager {
    shell: ShellConfig,
    sessions: Mutex<HashMap<SessionId, PtySession>>,
    next_generation: AtomicU64,
}

impl SessionManager {
    pub fn new(shell: ShellConfig) -> Self {
        Self {
            shell,
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Spawn a shell for `session_id`, or keep the one it already has.
    ///
    /// Output chunks are forwarded to `events` as soon as they are read.
    pub fn open(
        &self,
        session_id: &str,
        workspace_id: &WorkspaceId,
        events: mpsc::UnboundedSender<TerminalEvent>,
    ) -> TerminalResult<OpenOutcome> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session_id) {
            debug!(session_id, "terminal reattached");
            return Ok(OpenOutcome::Reattached);
        }

        let size = PtySize {
            rows: self.shell.rows,
            cols: self.shell.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.shell.program);
        cmd.cwd(&self.shell.cwd);
        cmd.env_clear();
        for (key, value) in &self.shell.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;
        // The child holds the slave end; ours must go so reads see EOF on exit.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let sid = session_id.to_string();
        thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if events.send(TerminalEvent::Output(chunk)).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(session_id = %sid, generation, "pty reader finished");
            let _ = events.send(TerminalEvent::Exited { generation });
        });

        info!(
            session_id,
            workspace_id = %workspace_id,
            generation,
            pid = ?child.process_id(),
            "terminal spawned"
        );
        sessions.insert(
            session_id.to_string(),
            PtySession {
                generation,
                workspace_id: workspace_id.clone(),
                master: pair.master,
                writer: Arc::new(Mutex::new(writer)),
                child,
                cols: self.shell.cols,
                rows: self.shell.rows,
            },
        );
        Ok(OpenOutcome::Spawned)
    }

    /// Write client input to the pty. A failed write ends the session.
    ///
    /// Blocks while the pty input is full; call it off the async runtime.
    pub fn write(&self, session_id: &str, data: &[u8]) -> TerminalResult<()> {
        let (generation, writer) = {
            let sessions = self.sessions.lock();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| TerminalError::NoSession(session_id.to_string()))?;
            (session.generation, session.writer.clone())
        };

        let result = {
            let mut writer = writer.lock();
            writer.write_all(data).and_then(|()| writer.flush())
        };
        result.map_err(|e| {
            warn!(session_id, generation, error = %e, "terminal write failed, closing session");
            self.close_generation(session_id, generation);
            TerminalError::Io(e.to_string())
        })
    }

    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) -> TerminalResult<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| TerminalError::NoSession(session_id.to_string()))?;
        session
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Io(e.to_string()))?;
        session.cols = cols;
        session.rows = rows;
        Ok(())
    }

    /// Current `(cols, rows)` of a session's pty.
    pub fn size(&self, session_id: &str) -> Option<(u16, u16)> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| (s.cols, s.rows))
    }

    /// Generation of the session's live pty, if it has one.
    pub fn generation(&self, session_id: &str) -> Option<Generation> {
        self.sessions.lock().get(session_id).map(|s| s.generation)
    }

    pub fn process_id(&self, session_id: &str) -> Option<u32> {
        self.sessions
            .lock()
            .get(session_id)
            .and_then(|s| s.child.process_id())
    }

    /// Kill and reap the session's shell. Returns false if there was none.
    ///
    /// Blocks until the shell is reaped.
    pub fn close(&self, session_id: &str) -> bool {
        let Some(session) = self.sessions.lock().remove(session_id) else {
            return false;
        };
        reap(session_id, session);
        true
    }

    /// Like [`close`](Self::close), but only if the live pty is `generation`.
    ///
    /// An exit or write failure reported for an earlier pty of the same
    /// session leaves the current one alone.
    pub fn close_generation(&self, session_id: &str, generation: Generation) -> bool {
        let session = {
            let mut sessions = self.sessions.lock();
            match sessions.get(session_id) {
                Some(live) if live.generation == generation => sessions.remove(session_id),
                _ => None,
            }
        };
        match session {
            Some(session) => {
                reap(session_id, session);
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.lock().keys().cloned().collect();
        for id in ids {
            self.close(&id);
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Swap the session's writer for one that always fails.
    #[cfg(test)]
    pub(crate) fn break_writer(&self, session_id: &str) {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::ErrorKind::BrokenPipe.into())
            }
        }
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.writer = Arc::new(Mutex::new(Box::new(Broken)));
        }
    }
}

fn reap(session_id: &str, mut session: PtySession) {
    // The shell leads its own process group; take its children with it.
    #[cfg(unix)]
    if let Some(pid) = session.child.process_id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGHUP);
        }
    }
    if let Err(e) = session.child.kill() {
        debug!(session_id, error = %e, "kill after hangup");
    }
    let _ = session.child.wait();
    info!(
        session_id,
        workspace_id = %session.workspace_id,
        generation = session.generation,
        "terminal closed"
    );
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}
