//! The task that owns a child process, its pipes and its watchdog.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_core::Stream;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::event::{OutputEvent, TerminationReason};
use super::state::ProcessState;
use super::ProcessCommand;
use crate::error::{Error, Result};
use crate::traits::Source;

/// Stream of [`OutputEvent`]s ending with exactly one terminal event.
///
/// Dropping the stream kills the process; [`OutputStream::close`] also waits
/// until it has been reaped and both pipes are closed.
pub struct OutputStream {
    rx: mpsc::Receiver<OutputEvent>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl OutputStream {
    /// A stream holding a single terminal error, nothing spawned
    pub(crate) fn failed(error: Error) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(OutputEvent::Error(error));
        Self {
            rx,
            token: CancellationToken::new(),
            handle: None,
        }
    }

    pub(crate) fn spawn(command: ProcessCommand) -> Self {
        let (tx, rx) = mpsc::channel(command.config.channel_capacity.max(1));
        let token = CancellationToken::new();
        let handle = tokio::spawn(supervise(command, tx, token.clone()));
        Self {
            rx,
            token,
            handle: Some(handle),
        }
    }

    /// Receive the next event
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        self.rx.recv().await
    }

    /// Kill the process if it is still running and wait for the cleanup.
    pub async fn close(mut self) {
        self.token.cancel();
        self.rx.close();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "process supervisor task failed");
            }
        }
    }
}

impl Stream for OutputStream {
    type Item = OutputEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[async_trait]
impl Source for OutputStream {
    type Item = OutputEvent;

    /// Wait for one event, then take up to `demand` events already queued.
    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<OutputEvent>> {
        let Some(first) = self.rx.recv().await else {
            return Ok(Vec::new());
        };
        let mut ready = vec![first];
        while ready.len() < demand {
            match self.rx.try_recv() {
                Ok(event) => ready.push(event),
                Err(_) => break,
            }
        }
        Ok(ready)
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

async fn supervise(command: ProcessCommand, tx: mpsc::Sender<OutputEvent>, token: CancellationToken) {
    let description = command.display();
    let config = command.config.clone();
    let mut state = ProcessState::NotStarted;

    let mut system = tokio::process::Command::new(&command.program);
    system
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        system.current_dir(dir);
    }
    for (key, value) in &config.env {
        system.env(key, value);
    }
    // own process group so a forced shutdown reaches grandchildren holding our pipes
    #[cfg(unix)]
    system.process_group(0);

    tracing::info!(command = %description, "launching process");
    let started = Instant::now();
    let mut child = match system.spawn() {
        Ok(child) => child,
        Err(e) => {
            state.advance(ProcessState::LaunchFailed);
            tracing::error!(command = %description, error = %e, "failed to launch process");
            let _ = tx.send(OutputEvent::Error(Error::launch(description, e))).await;
            return;
        }
    };
    state.advance(ProcessState::Running);
    let pid = child.id();

    // cancelled once the child is gone; readers then stop on an idle pipe
    let exited = CancellationToken::new();
    let readers = [
        tokio::spawn(read_pipe(
            child.stdout.take(),
            tx.clone(),
            OutputEvent::Stdout,
            config.read_buffer_size,
            exited.clone(),
            config.pipe_drain_timeout,
        )),
        tokio::spawn(read_pipe(
            child.stderr.take(),
            tx.clone(),
            OutputEvent::Stderr,
            config.read_buffer_size,
            exited.clone(),
            config.pipe_drain_timeout,
        )),
    ];

    let watchdog = async {
        match config.timeout {
            Some(timeout) => {
                tracing::info!(command = %description, timeout_ms = timeout.as_millis() as u64, "watchdog armed");
                tokio::time::sleep(timeout).await;
                timeout
            }
            None => futures::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        timeout = watchdog => match child.try_wait() {
            Ok(Some(status)) => Outcome::Exited(Ok(status)),
            _ => Outcome::TimedOut(timeout),
        },
        _ = token.cancelled() => Outcome::Cancelled,
    };

    let terminal = match outcome {
        Outcome::Exited(Ok(status)) => {
            state.advance(ProcessState::Exited);
            Some(OutputEvent::Terminated(TerminationReason::from_status(status)))
        }
        Outcome::Exited(Err(e)) => {
            tracing::error!(command = %description, error = %e, "failed waiting for process");
            state.advance(ProcessState::Terminating);
            shutdown(&mut child, pid, config.grace_period).await;
            state.advance(ProcessState::Killed);
            Some(OutputEvent::Error(Error::io(format!("waiting for {}", description), e)))
        }
        Outcome::TimedOut(timeout) => {
            tracing::info!(
                command = %description,
                timeout_ms = timeout.as_millis() as u64,
                "timeout is up, terminating process"
            );
            state.advance(ProcessState::Terminating);
            shutdown(&mut child, pid, config.grace_period).await;
            state.advance(ProcessState::Killed);
            Some(OutputEvent::Terminated(TerminationReason::TimedOut(timeout)))
        }
        Outcome::Cancelled => {
            tracing::debug!(command = %description, "output stream dropped, stopping process");
            state.advance(ProcessState::Terminating);
            shutdown(&mut child, pid, config.grace_period).await;
            state.advance(ProcessState::Killed);
            None
        }
    };

    exited.cancel();
    join_readers(readers).await;

    tracing::info!(
        command = %description,
        state = %state,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "process finished"
    );
    if let Some(event) = terminal {
        if let OutputEvent::Terminated(reason) = &event {
            tracing::debug!(command = %description, reason = %reason, "termination reason");
        }
        let _ = tx.send(event).await;
    }
}

/// Forward one pipe into the event channel until EOF.
///
/// Once `exited` fires, a read that stays idle for `idle` means the pipe is
/// held open by some escaped descendant and reading stops there. Time spent
/// waiting on a slow consumer never counts towards `idle`. The pipe is
/// dropped, and so closed, when this returns.
async fn read_pipe<R>(
    pipe: Option<R>,
    tx: mpsc::Sender<OutputEvent>,
    wrap: fn(bytes::Bytes) -> OutputEvent,
    buffer_size: usize,
    exited: CancellationToken,
    idle: Duration,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return;
    };
    let buffer_size = buffer_size.max(1);
    let mut buf = BytesMut::with_capacity(buffer_size);
    loop {
        buf.reserve(buffer_size);
        let read = if exited.is_cancelled() {
            match tokio::time::timeout(idle, pipe.read_buf(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    tracing::debug!(
                        idle_ms = idle.as_millis() as u64,
                        "pipe still open after exit, closing it"
                    );
                    break;
                }
            }
        } else {
            tokio::select! {
                read = pipe.read_buf(&mut buf) => read,
                // pipe reads are cancel safe; retry in post-exit mode
                _ = exited.cancelled() => continue,
            }
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(wrap(buf.split().freeze())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed reading process output");
                break;
            }
        }
    }
}

async fn join_readers(readers: [JoinHandle<()>; 2]) {
    for result in futures::future::join_all(readers).await {
        if let Err(e) = result {
            tracing::warn!(error = %e, "pipe reader failed");
        }
    }
}

/// Two-phase shutdown: ask nicely, wait `grace`, then kill.
async fn shutdown(child: &mut Child, pid: Option<u32>, grace: Duration) {
    #[cfg(feature = "metrics")]
    crate::metrics::record_process_killed();

    match pid {
        Some(pid) => {
            if let Err(e) = signal_group(pid, Signal::Terminate) {
                tracing::debug!(pid, error = %e, "terminate request failed");
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }

    if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
        tracing::info!(pid = ?pid, status = %status, "process terminated");
        return;
    }

    tracing::info!(pid = ?pid, "process still alive after grace period, killing it");
    if let Some(pid) = pid {
        if let Err(e) = signal_group(pid, Signal::Kill) {
            tracing::debug!(pid, error = %e, "kill failed");
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(pid = ?pid, error = %e, "process already gone");
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    use nix::sys::signal::{killpg, Signal as NixSignal};
    use nix::unistd::Pid;

    let signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    killpg(Pid::from_raw(pid as i32), signal)
        .map_err(|errno| Error::io(format!("sending {:?} to group {}", signal, pid), errno.into()))
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) -> Result<()> {
    Err(Error::custom("process groups are not supported on this platform"))
}

/// Hard-kill a single process by id.
#[cfg(unix)]
pub fn kill_pid(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    if pid == 0 || pid > i32::MAX as u32 {
        return Err(Error::custom(format!("pid '{}' should be a positive number", pid)));
    }
    kill(Pid::from_raw(pid as i32), NixSignal::SIGKILL)
        .map_err(|errno| Error::io(format!("killing {}", pid), errno.into()))
}

/// Hard-kill a single process by id.
#[cfg(not(unix))]
pub fn kill_pid(pid: u32) -> Result<()> {
    Err(Error::custom(format!("cannot kill {} on this platform", pid)))
}
