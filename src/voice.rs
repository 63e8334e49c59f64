use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info};
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::{Input, RawAdapter};
use songbird::Songbird;
use symphonia_core::io::MediaSource;

use crate::error::{Error, Result};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u32 = 2;

/// Chunks buffered between the transcoder and the voice mixer.
const PIPE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceTarget {
    pub guild_id: u64,
    pub channel_id: u64,
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, target: VoiceTarget) -> Result<()>;
    async fn play(&self, target: VoiceTarget, source: PcmSource) -> Result<()>;
    async fn leave(&self, target: VoiceTarget) -> Result<()>;
}

pub fn pcm_pipe() -> (PcmSink, PcmSource) {
    let (tx, rx) = crossbeam_channel::bounded(PIPE_CAPACITY);
    (
        PcmSink { tx, carry: None },
        PcmSource {
            rx,
            pending: Vec::new(),
            offset: 0,
        },
    )
}

/// Producer half: takes s16le bytes, forwards f32le samples.
pub struct PcmSink {
    tx: Sender<Vec<u8>>,
    carry: Option<u8>,
}

impl PcmSink {
    /// Returns false once the consuming side is gone.
    pub fn push(&mut self, s16le: &[u8]) -> bool {
        let mut bytes = s16le;
        let mut samples = Vec::with_capacity((bytes.len() / 2 + 1) * 4);

        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    samples.extend_from_slice(&s16_to_f32le(low, high));
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return true;
                }
            }
        }

        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            samples.extend_from_slice(&s16_to_f32le(pair[0], pair[1]));
        }
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }

        if samples.is_empty() {
            return true;
        }

        match self.tx.try_send(samples) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("voice buffer full, dropping {} bytes", s16le.len());
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

fn s16_to_f32le(low: u8, high: u8) -> [u8; 4] {
    let sample = i16::from_le_bytes([low, high]);
    (f32::from(sample) / 32768.0).to_le_bytes()
}

/// Consumer half, read by the voice mixer. Blocks until audio arrives and
/// reports end of stream once the sink is dropped.
pub struct PcmSource {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl Read for PcmSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Seek for PcmSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live PCM stream cannot seek",
        ))
    }
}

impl MediaSource for PcmSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Voice transport backed by the songbird manager registered with the
/// gateway client.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        SongbirdTransport { manager }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn join(&self, target: VoiceTarget) -> Result<()> {
        self.manager
            .join(
                GuildId::new(target.guild_id),
                ChannelId::new(target.channel_id),
            )
            .await
            .map_err(|e| Error::Join(e.to_string()))?;
        info!(
            "joined voice channel {} in guild {}",
            target.channel_id, target.guild_id
        );
        Ok(())
    }

    async fn play(&self, target: VoiceTarget, source: PcmSource) -> Result<()> {
        let call = self
            .manager
            .get(GuildId::new(target.guild_id))
            .ok_or(Error::NotConnected(target.guild_id))?;

        let input: Input = RawAdapter::new(source, SAMPLE_RATE, CHANNELS).into();
        call.lock().await.play_only_input(input);
        Ok(())
    }

    async fn leave(&self, target: VoiceTarget) -> Result<()> {
        self.manager
            .remove(GuildId::new(target.guild_id))
            .await
            .map_err(|e| Error::Join(e.to_string()))?;
        info!("left voice in guild {}", target.guild_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mut source: PcmSource) -> Vec<u8> {
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        out
    }

    fn f32s(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn converts_s16_to_f32() {
        let (mut sink, source) = pcm_pipe();
        let mut input = Vec::new();
        for sample in [0i16, i16::MIN, 16384, -16384] {
            input.extend_from_slice(&sample.to_le_bytes());
        }
        assert!(sink.push(&input));
        drop(sink);

        assert_eq!(f32s(&read_all(source)), vec![0.0, -1.0, 0.5, -0.5]);
    }

    #[test]
    fn odd_bytes_carry_across_chunks() {
        let (mut sink, source) = pcm_pipe();
        let bytes = 16384i16.to_le_bytes();
        let more = (-16384i16).to_le_bytes();
        assert!(sink.push(&bytes[..1]));
        assert!(sink.push(&[bytes[1], more[0]]));
        assert!(sink.push(&more[1..]));
        drop(sink);

        assert_eq!(f32s(&read_all(source)), vec![0.5, -0.5]);
    }

    #[test]
    fn push_reports_dropped_consumer() {
        let (mut sink, source) = pcm_pipe();
        drop(source);
        assert!(!sink.push(&[0, 0]));
    }

    #[test]
    fn full_buffer_drops_instead_of_blocking() {
        let (mut sink, _source) = pcm_pipe();
        for _ in 0..PIPE_CAPACITY + 10 {
            assert!(sink.push(&[1, 0, 2, 0]));
        }
    }

    #[test]
    fn source_is_not_seekable() {
        let (_sink, mut source) = pcm_pipe();
        assert!(!source.is_seekable());
        assert_eq!(source.byte_len(), None);
        assert!(source.seek(SeekFrom::Start(0)).is_err());
    }
}
