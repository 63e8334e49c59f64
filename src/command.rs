use crate::voice::VoiceTarget;

pub const PLAY_LIVE: &str = "!playlive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayLive {
    pub source_url: String,
    pub target: VoiceTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotInVoice,
    InvalidLink,
}

impl Rejection {
    pub fn reply(&self) -> &'static str {
        match self {
            Rejection::NotInVoice => "❌ Join a voice channel first.",
            Rejection::InvalidLink => {
                "❌ Invalid link.\nUsage: `!playlive https://www.tiktok.com/@user/live`"
            }
        }
    }
}

pub fn is_play_live(content: &str) -> bool {
    content.split_whitespace().next() == Some(PLAY_LIVE)
}

/// Interprets a chat message. `None` means the message is not for us;
/// rejections leave the session untouched.
pub fn interpret(
    content: &str,
    from_bot: bool,
    voice: Option<VoiceTarget>,
) -> Option<Result<PlayLive, Rejection>> {
    if from_bot || !is_play_live(content) {
        return None;
    }

    let Some(target) = voice else {
        return Some(Err(Rejection::NotInVoice));
    };

    match content.split_whitespace().nth(1) {
        Some(url) if url.starts_with("http") => Some(Ok(PlayLive {
            source_url: url.to_owned(),
            target,
        })),
        _ => Some(Err(Rejection::InvalidLink)),
    }
}

pub fn now_streaming(source_url: &str) -> String {
    format!("🔊 Now streaming from: {}", source_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOICE: Option<VoiceTarget> = Some(VoiceTarget {
        guild_id: 1,
        channel_id: 2,
    });

    #[test]
    fn ignores_other_messages() {
        assert_eq!(interpret("hello there", false, VOICE), None);
        assert_eq!(interpret("!play https://x", false, VOICE), None);
        assert_eq!(interpret("!playlivex https://x", false, VOICE), None);
        assert_eq!(interpret("", false, VOICE), None);
    }

    #[test]
    fn ignores_bots() {
        assert_eq!(
            interpret("!playlive https://site/@user/live", true, VOICE),
            None
        );
    }

    #[test]
    fn requires_voice_channel() {
        assert_eq!(
            interpret("!playlive https://site/@user/live", false, None),
            Some(Err(Rejection::NotInVoice))
        );
    }

    #[test]
    fn requires_http_link() {
        assert_eq!(
            interpret("!playlive", false, VOICE),
            Some(Err(Rejection::InvalidLink))
        );
        assert_eq!(
            interpret("!playlive www.tiktok.com/@user/live", false, VOICE),
            Some(Err(Rejection::InvalidLink))
        );
        assert!(Rejection::InvalidLink.reply().contains("Usage: `!playlive"));
    }

    #[test]
    fn accepts_link_from_voice_member() {
        let play = interpret("!playlive   https://site/@user/live extra", false, VOICE)
            .unwrap()
            .unwrap();
        assert_eq!(play.source_url, "https://site/@user/live");
        assert_eq!(Some(play.target), VOICE);
        assert_eq!(
            now_streaming(&play.source_url),
            "🔊 Now streaming from: https://site/@user/live"
        );
    }
}
