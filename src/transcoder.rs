use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::controller::Event;
use crate::error::{Error, Result};
use crate::voice::PcmSink;
use crate::watchdog::Feeder;

const READ_CHUNK: usize = 16 * 1024;

/// Decodes a media URL into raw PCM on a byte stream.
pub trait Transcoder: Send + Sync {
    fn spawn(&self, media_url: &str) -> Result<Spawned>;
}

/// A freshly started transcoder: its PCM output and the process behind it.
pub struct Spawned {
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub process: Box<dyn ChildProcess>,
}

#[async_trait]
pub trait ChildProcess: Send {
    fn start_kill(&mut self) -> Result<()>;
    async fn wait(&mut self) -> Result<()>;
}

#[async_trait]
impl ChildProcess for Child {
    fn start_kill(&mut self) -> Result<()> {
        Child::start_kill(self)?;
        Ok(())
    }

    async fn wait(&mut self) -> Result<()> {
        let status = Child::wait(self).await?;
        debug!("transcoder exited with {}", status);
        Ok(())
    }
}

pub struct Ffmpeg {
    program: String,
}

impl Ffmpeg {
    pub fn new(program: impl Into<String>) -> Self {
        Ffmpeg {
            program: program.into(),
        }
    }
}

/// Realtime decode to s16le, 48 kHz, stereo on stdout.
pub fn ffmpeg_args(media_url: &str) -> Vec<String> {
    [
        "-re",
        "-i",
        media_url,
        "-analyzeduration",
        "0",
        "-loglevel",
        "0",
        "-f",
        "s16le",
        "-ar",
        "48000",
        "-ac",
        "2",
        "pipe:1",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

impl Transcoder for Ffmpeg {
    fn spawn(&self, media_url: &str) -> Result<Spawned> {
        let mut child = Command::new(&self.program)
            .args(ffmpeg_args(media_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn(&self.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::MissingStdout(self.program.clone()))?;

        Ok(Spawned {
            output: Box::new(stdout),
            process: Box::new(child),
        })
    }
}

/// Acknowledged once the supervisor has signalled the process.
type KillRequest = oneshot::Sender<()>;

/// Owner-side handle of a supervised transcoder. Dropping the handle asks the
/// supervisor to terminate the process.
pub struct TranscodeHandle {
    kill: Option<oneshot::Sender<KillRequest>>,
}

impl TranscodeHandle {
    /// Kills the process and returns once the kill signal has been sent, or
    /// once the supervisor is known to be gone.
    pub async fn terminate(mut self) {
        if let Some(signalled) = self.request_kill() {
            let _ = signalled.await;
        }
    }

    fn request_kill(&mut self) -> Option<oneshot::Receiver<()>> {
        let kill = self.kill.take()?;
        let (signalled_tx, signalled_rx) = oneshot::channel();
        kill.send(signalled_tx).ok()?;
        Some(signalled_rx)
    }
}

impl Drop for TranscodeHandle {
    fn drop(&mut self) {
        self.request_kill();
    }
}

/// Pumps transcoder output into the voice pipe, feeding the watchdog on
/// every chunk, and reports `TranscoderExited` once the process is gone.
/// Kill requests are honored both while pumping and while waiting for the
/// process to exit after its output closed.
pub fn supervise(
    spawned: Spawned,
    mut sink: PcmSink,
    feeder: Feeder,
    events: UnboundedSender<Event>,
    generation: u64,
) -> TranscodeHandle {
    let (kill_tx, mut kill_rx) = oneshot::channel::<KillRequest>();
    let Spawned {
        mut output,
        mut process,
    } = spawned;

    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut listening = true;
        let mut kill_request = None;

        loop {
            tokio::select! {
                read = output.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        feeder.feed();
                        if listening && !sink.push(&buf[..n]) {
                            debug!("voice source dropped, discarding transcoder output");
                            listening = false;
                        }
                    }
                    Err(e) => {
                        warn!("transcoder output error: {}", e);
                        break;
                    }
                },
                request = &mut kill_rx => {
                    kill_request = Some(request.ok());
                    break;
                }
            }
        }
        drop(sink);

        if kill_request.is_none() {
            kill_request = tokio::select! {
                exited = process.wait() => {
                    if let Err(e) = exited {
                        warn!("failed to reap transcoder: {}", e);
                    }
                    None
                }
                request = &mut kill_rx => Some(request.ok()),
            };
        }

        if let Some(signalled) = kill_request {
            if let Err(e) = process.start_kill() {
                debug!("transcoder kill failed: {}", e);
            }
            if let Some(signalled) = signalled {
                let _ = signalled.send(());
            }
            if let Err(e) = process.wait().await {
                warn!("failed to reap transcoder: {}", e);
            }
        }
        let _ = events.send(Event::TranscoderExited { generation });
    });

    TranscodeHandle {
        kill: Some(kill_tx),
    }
}
