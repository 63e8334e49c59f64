use std::time::Duration;

use serde::Serialize;

use crate::expiry::expiry_from_url;
use crate::scheduler::ScheduledTask;
use crate::transcoder::TranscodeHandle;
use crate::voice::VoiceTarget;
use crate::watchdog::Watchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Resolving,
    Playing,
    StoppedEarlyRetry,
    StoppedExpiredRetry,
    WatchdogRestart,
}

/// The single live-stream session owned by the controller.
#[derive(Default)]
pub struct Session {
    source_url: Option<String>,
    resolved_url: Option<String>,
    resolved_expiry: u64,
    pub target: Option<VoiceTarget>,
    pub connected: bool,
    transcoder: Option<TranscodeHandle>,
    watchdog: Option<Watchdog>,
    generation: u64,
    pub restarting: bool,
    pub resolving: bool,
    pub pending_retry: Option<ScheduledTask>,
    pub phase: Phase,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn set_source_url(&mut self, source_url: String) {
        self.source_url = Some(source_url);
    }

    pub fn resolved_url(&self) -> Option<&str> {
        self.resolved_url.as_deref()
    }

    pub fn resolved_expiry(&self) -> u64 {
        self.resolved_expiry
    }

    pub fn set_resolved(&mut self, media_url: String) {
        self.resolved_expiry = expiry_from_url(&media_url);
        self.resolved_url = Some(media_url);
    }

    pub fn clear_resolved(&mut self) {
        self.resolved_url = None;
        self.resolved_expiry = 0;
    }

    /// Whether the cached media URL outlives `now + margin`.
    pub fn has_valid_url(&self, now: u64, margin: Duration) -> bool {
        self.resolved_url.is_some() && self.expires_after(now, margin)
    }

    /// Whether the recorded expiry lies beyond `now + margin`, regardless of
    /// whether a URL is cached.
    pub fn expires_after(&self, now: u64, margin: Duration) -> bool {
        self.resolved_expiry > now.saturating_add(margin.as_secs())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn has_transcoder(&self) -> bool {
        self.transcoder.is_some()
    }

    pub fn attach_transcoder(&mut self, handle: TranscodeHandle, watchdog: Watchdog) {
        self.transcoder = Some(handle);
        self.watchdog = Some(watchdog);
    }

    /// Reserves the generation for the next transcoder.
    pub fn next_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Signals the running transcoder to terminate and disarms its watchdog.
    /// Returns once the kill has been delivered. Events it emits afterwards
    /// are stale.
    pub async fn kill_transcoder(&mut self) -> bool {
        self.watchdog.take();
        match self.transcoder.take() {
            Some(handle) => {
                self.next_generation();
                handle.terminate().await;
                true
            }
            None => false,
        }
    }

    /// Forgets a transcoder that has already exited on its own.
    pub fn release_transcoder(&mut self) {
        self.watchdog.take();
        self.transcoder.take();
    }

    pub fn cancel_retry(&mut self) {
        if let Some(task) = self.pending_retry.take() {
            task.cancel();
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            source_url: self.source_url.clone(),
            resolved_url: self.resolved_url.clone(),
            resolved_expiry: self.resolved_expiry,
            streaming: self.transcoder.is_some(),
        }
    }
}

/// Read-only view published after every controller step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub source_url: Option<String>,
    pub resolved_url: Option<String>,
    pub resolved_expiry: u64,
    pub streaming: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARGIN: Duration = Duration::from_secs(10);

    fn with_expiry(expiry: u64) -> Session {
        let mut session = Session::new();
        session.set_resolved(format!("https://cdn.example/x?expires={}", expiry));
        session
    }

    #[test]
    fn reuse_iff_expiry_beyond_margin() {
        let now = 1_700_000_000;
        for (expiry, reusable) in [
            (now + 5000, true),
            (now + 11, true),
            (now + 10, false),
            (now + 9, false),
            (now, false),
            (now - 60, false),
        ] {
            assert_eq!(
                with_expiry(expiry).has_valid_url(now, MARGIN),
                reusable,
                "expiry {} at {}",
                expiry,
                now
            );
        }
    }

    #[test]
    fn unknown_expiry_always_refreshes() {
        let mut session = Session::new();
        session.set_resolved("https://cdn.example/x".to_owned());
        assert_eq!(session.resolved_expiry(), 0);
        assert!(!session.has_valid_url(0, MARGIN));
    }

    #[test]
    fn no_url_means_resolve() {
        let session = Session::new();
        assert!(!session.has_valid_url(0, MARGIN));
    }

    #[test]
    fn clearing_resets_expiry() {
        let mut session = with_expiry(42);
        session.clear_resolved();
        assert_eq!(session.resolved_url(), None);
        assert_eq!(session.resolved_expiry(), 0);
    }

    #[test]
    fn snapshot_mirrors_record() {
        let mut session = with_expiry(99);
        session.set_source_url("https://www.tiktok.com/@user/live".to_owned());
        session.phase = Phase::Resolving;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Resolving);
        assert_eq!(
            snapshot.source_url.as_deref(),
            Some("https://www.tiktok.com/@user/live")
        );
        assert_eq!(snapshot.resolved_expiry, 99);
        assert!(!snapshot.streaming);
    }
}
