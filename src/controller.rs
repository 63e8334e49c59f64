use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::resolver::Resolver;
use crate::scheduler::Scheduler;
use crate::session::{Phase, Session, SessionSnapshot};
use crate::transcoder::{self, Transcoder};
use crate::voice::{pcm_pipe, VoiceTarget, VoiceTransport};
use crate::watchdog::Watchdog;

#[derive(Debug)]
pub enum Event {
    /// A user asked to relay `source_url` into `target`.
    Play {
        source_url: String,
        target: VoiceTarget,
    },
    /// A scheduled retry fired.
    Retry { seq: u64 },
    /// Outcome of resolve number `seq`.
    Resolved {
        seq: u64,
        source_url: String,
        outcome: Result<String>,
    },
    TranscoderExited { generation: u64 },
    Stalled { generation: u64 },
    Shutdown,
}

/// Cloneable entry point used by the chat listener and `main`.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<SessionSnapshot>,
}

impl ControllerHandle {
    pub fn play(&self, source_url: String, target: VoiceTarget) -> bool {
        self.events.send(Event::Play { source_url, target }).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(Event::Shutdown);
    }

    pub fn status(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.clone()
    }
}

/// Owns the session and serializes every state transition on one task.
pub struct Controller {
    session: Session,
    resolver: Arc<dyn Resolver>,
    transcoder: Arc<dyn Transcoder>,
    voice: Arc<dyn VoiceTransport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    resolver_timeout: Option<Duration>,
    scheduler: Scheduler,
    retry_seq: u64,
    resolve_seq: u64,
    events_tx: mpsc::UnboundedSender<Event>,
    events: UnboundedReceiverStream<Event>,
    status: watch::Sender<SessionSnapshot>,
}

impl Controller {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        transcoder: Arc<dyn Transcoder>,
        voice: Arc<dyn VoiceTransport>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        resolver_timeout: Option<Duration>,
    ) -> (Self, ControllerHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(SessionSnapshot::default());

        let handle = ControllerHandle {
            events: events_tx.clone(),
            status: status_rx,
        };
        let controller = Controller {
            session: Session::new(),
            resolver,
            transcoder,
            voice,
            clock,
            policy,
            resolver_timeout,
            scheduler: Scheduler::new(events_tx.clone()),
            retry_seq: 0,
            resolve_seq: 0,
            events_tx,
            events: UnboundedReceiverStream::new(events_rx),
            status,
        };
        (controller, handle)
    }

    pub async fn run(mut self) {
        info!("session controller started");
        while let Some(event) = self.events.next().await {
            if !self.handle(event).await {
                break;
            }
        }
        info!("session controller stopped");
    }

    /// Applies one event. Returns false once the controller should stop.
    pub async fn handle(&mut self, event: Event) -> bool {
        let keep_running = match event {
            Event::Play { source_url, target } => {
                self.on_play(source_url, target).await;
                true
            }
            Event::Retry { seq } => {
                self.on_retry(seq).await;
                true
            }
            Event::Resolved {
                seq,
                source_url,
                outcome,
            } => {
                self.on_resolved(seq, source_url, outcome).await;
                true
            }
            Event::TranscoderExited { generation } => {
                self.on_transcoder_exit(generation);
                true
            }
            Event::Stalled { generation } => {
                self.on_stall(generation).await;
                true
            }
            Event::Shutdown => {
                self.on_shutdown().await;
                false
            }
        };
        self.status.send_replace(self.session.snapshot());
        keep_running
    }

    async fn on_play(&mut self, source_url: String, target: VoiceTarget) {
        if self.session.source_url() != Some(source_url.as_str()) {
            if let Some(previous) = self.session.source_url() {
                info!("switching source from {} to {}", previous, source_url);
            }
            self.session.clear_resolved();
            self.session.kill_transcoder().await;
            // A resolve still running for the old source reports back stale.
            self.session.resolving = false;
        }
        self.session.cancel_retry();
        self.session.restarting = false;
        self.session.set_source_url(source_url);

        if self.session.target != Some(target) {
            if let Some(previous) = self.session.target {
                if self.session.connected && previous.guild_id != target.guild_id {
                    self.disconnect(previous).await;
                }
            }
            self.session.target = Some(target);
            self.session.connected = false;
        }
        if !self.session.connected {
            self.connect(target).await;
        }

        self.ensure_stream().await;
    }

    async fn on_retry(&mut self, seq: u64) {
        if self.session.pending_retry.is_none() || seq != self.retry_seq {
            debug!("ignoring superseded retry #{}", seq);
            return;
        }
        self.session.pending_retry = None;
        self.session.restarting = false;
        self.ensure_stream().await;
    }

    /// Resolves the current source unless the cached media URL is still good,
    /// in which case that URL is (re)played.
    async fn ensure_stream(&mut self) {
        let Some(source_url) = self.session.source_url().map(str::to_owned) else {
            self.session.phase = Phase::Idle;
            return;
        };

        let now = self.clock.now();
        if self.session.has_valid_url(now, self.policy.expiry_margin) {
            if self.session.has_transcoder() {
                info!("current stream URL still valid, no need to refresh");
            } else if let Some(media_url) = self.session.resolved_url().map(str::to_owned) {
                info!("current stream URL still valid, replaying it");
                self.start_playback(media_url).await;
            }
            return;
        }

        if self.session.resolving {
            debug!("resolve already in flight for {}", source_url);
            return;
        }

        info!("extracting live stream: {}", source_url);
        self.session.resolving = true;
        self.session.phase = Phase::Resolving;
        self.resolve_seq = self.resolve_seq.wrapping_add(1);
        let seq = self.resolve_seq;

        let resolver = self.resolver.clone();
        let events = self.events_tx.clone();
        let limit = self.resolver_timeout;
        tokio::spawn(async move {
            let outcome = match limit {
                Some(limit) => tokio::time::timeout(limit, resolver.resolve(&source_url))
                    .await
                    .unwrap_or(Err(Error::ResolverTimeout(limit))),
                None => resolver.resolve(&source_url).await,
            };
            let _ = events.send(Event::Resolved {
                seq,
                source_url,
                outcome,
            });
        });
    }

    async fn on_resolved(&mut self, seq: u64, source_url: String, outcome: Result<String>) {
        if seq != self.resolve_seq || self.session.source_url() != Some(source_url.as_str()) {
            debug!("discarding superseded resolve #{} for {}", seq, source_url);
            return;
        }
        self.session.resolving = false;

        match outcome {
            Ok(media_url) => {
                self.session.set_resolved(media_url.clone());
                info!(
                    "stream URL expires at Unix timestamp: {}",
                    self.session.resolved_expiry()
                );
                self.start_playback(media_url).await;
            }
            Err(e) => {
                warn!(
                    "stream URL not found ({}), retrying in {:?}",
                    e, self.policy.resolve_retry_delay
                );
                self.session.phase = Phase::Resolving;
                self.schedule_retry(self.policy.resolve_retry_delay);
            }
        }
    }

    async fn start_playback(&mut self, media_url: String) {
        if self.session.kill_transcoder().await {
            debug!("terminated previous transcoder");
        }

        let Some(target) = self.session.target else {
            warn!("no voice channel to play into");
            self.session.phase = Phase::Idle;
            return;
        };
        if !self.session.connected && !self.connect(target).await {
            self.schedule_restart();
            return;
        }

        info!("playing stream from: {}", media_url);
        let spawned = match self.transcoder.spawn(&media_url) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!("failed to start transcoder: {}", e);
                self.schedule_restart();
                return;
            }
        };

        let (sink, source) = pcm_pipe();
        if let Err(e) = self.voice.play(target, source).await {
            warn!("voice playback failed: {}", e);
            self.session.connected = false;
            drop(spawned);
            self.schedule_restart();
            return;
        }

        let generation = self.session.next_generation();
        let watchdog = Watchdog::arm(
            self.policy.watchdog_timeout,
            self.events_tx.clone(),
            generation,
        );
        let handle = transcoder::supervise(
            spawned,
            sink,
            watchdog.feeder(),
            self.events_tx.clone(),
            generation,
        );
        self.session.attach_transcoder(handle, watchdog);
        self.session.phase = Phase::Playing;
        debug!("transcoder #{} started", self.session.generation());
    }

    fn on_transcoder_exit(&mut self, generation: u64) {
        if !self.session.is_current(generation) {
            debug!("ignoring exit of superseded transcoder #{}", generation);
            return;
        }
        warn!("stream stopped");
        self.session.release_transcoder();
        self.schedule_restart();
    }

    /// Picks the retry delay from the URL's remaining lifetime. Guarded so a
    /// burst of stop events yields a single retry.
    fn schedule_restart(&mut self) {
        if self.session.restarting {
            debug!("restart already scheduled");
            return;
        }
        self.session.restarting = true;

        let now = self.clock.now();
        let delay = if self.session.expires_after(now, self.policy.expiry_margin) {
            self.session.phase = Phase::StoppedEarlyRetry;
            info!(
                "stream ended early, refreshing stream URL in {:?}",
                self.policy.early_retry_delay
            );
            self.policy.early_retry_delay
        } else {
            self.session.phase = Phase::StoppedExpiredRetry;
            info!("stream URL expired, refreshing stream URL");
            self.policy.expired_retry_delay
        };
        self.schedule_retry(delay);
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.retry_seq = self.retry_seq.wrapping_add(1);
        let task = self
            .scheduler
            .schedule(delay, Event::Retry { seq: self.retry_seq });
        self.session.pending_retry = Some(task);
    }

    async fn on_stall(&mut self, generation: u64) {
        if !self.session.is_current(generation) || !self.session.has_transcoder() {
            debug!("ignoring stall of superseded transcoder #{}", generation);
            return;
        }
        warn!(
            "no audio for {:?}, restarting the pipeline",
            self.policy.watchdog_timeout
        );
        self.session.phase = Phase::WatchdogRestart;
        self.session.kill_transcoder().await;
        self.session.clear_resolved();
        self.session.cancel_retry();
        self.session.restarting = false;
        if let Some(target) = self.session.target {
            if self.session.connected {
                self.disconnect(target).await;
            }
        }

        self.ensure_stream().await;
    }

    async fn on_shutdown(&mut self) {
        info!("shutting down session");
        self.session.kill_transcoder().await;
        self.session.cancel_retry();
        self.session.restarting = false;
        if let Some(target) = self.session.target {
            if self.session.connected {
                self.disconnect(target).await;
            }
        }
        self.session.phase = Phase::Idle;
    }

    async fn connect(&mut self, target: VoiceTarget) -> bool {
        match self.voice.join(target).await {
            Ok(()) => {
                self.session.connected = true;
                true
            }
            Err(e) => {
                warn!(
                    "failed to join voice channel {}: {}",
                    target.channel_id, e
                );
                false
            }
        }
    }

    async fn disconnect(&mut self, target: VoiceTarget) {
        if let Err(e) = self.voice.leave(target).await {
            warn!("failed to leave voice in guild {}: {}", target.guild_id, e);
        }
        self.session.connected = false;
    }
}
