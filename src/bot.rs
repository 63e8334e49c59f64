use std::sync::Arc;

use log::{info, warn};
use serenity::all::{Context, EventHandler, GatewayIntents, Message, Ready};
use serenity::async_trait;
use serenity::Client;
use songbird::{SerenityInit, Songbird};

use crate::command::{self, PlayLive};
use crate::controller::ControllerHandle;
use crate::voice::VoiceTarget;

pub struct Handler {
    controller: ControllerHandle,
}

impl Handler {
    pub fn new(controller: ControllerHandle) -> Self {
        Handler { controller }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("logged in as {}", ready.user.name);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || !command::is_play_live(&msg.content) {
            return;
        }

        let voice = author_voice_channel(&ctx, &msg);
        let reply = dispatch(&msg.content, msg.author.bot, voice, |play| {
            self.controller.play(play.source_url, play.target)
        });

        if let Some(reply) = reply {
            if let Err(e) = msg.reply(&ctx, reply).await {
                warn!("failed to reply in channel {}: {}", msg.channel_id, e);
            }
        }
    }
}

/// Runs a message through the command rules, handing accepted requests to
/// `play`. Returns the reply to send, if any.
pub fn dispatch<F>(
    content: &str,
    from_bot: bool,
    voice: Option<VoiceTarget>,
    play: F,
) -> Option<String>
where
    F: FnOnce(PlayLive) -> bool,
{
    match command::interpret(content, from_bot, voice)? {
        Ok(request) => {
            let source_url = request.source_url.clone();
            if !play(request) {
                warn!("session controller is gone, dropping request for {}", source_url);
            }
            Some(command::now_streaming(&source_url))
        }
        Err(rejection) => Some(rejection.reply().to_owned()),
    }
}

fn author_voice_channel(ctx: &Context, msg: &Message) -> Option<VoiceTarget> {
    let guild_id = msg.guild_id?;
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    let channel_id = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|state| state.channel_id)?;

    Some(VoiceTarget {
        guild_id: guild_id.get(),
        channel_id: channel_id.get(),
    })
}

pub async fn client(
    token: &str,
    controller: ControllerHandle,
    songbird: Arc<Songbird>,
) -> serenity::Result<Client> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::MESSAGE_CONTENT;

    Client::builder(token, intents)
        .event_handler(Handler::new(controller))
        .register_songbird_with(songbird)
        .await
}
