use std::sync::Arc;

use dotenv::dotenv;
use log::{error, info};
use songbird::Songbird;
use tokio::net::TcpListener;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::controller::Controller;
use crate::resolver::Streamlink;
use crate::transcoder::Ffmpeg;
use crate::voice::SongbirdTransport;

mod bot;
mod clock;
mod command;
mod config;
mod controller;
mod error;
mod expiry;
mod resolver;
mod scheduler;
mod session;
mod status;
mod transcoder;
mod voice;
mod watchdog;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let songbird = Songbird::serenity();

    let (controller, handle) = Controller::new(
        Arc::new(Streamlink::new(
            config.streamlink_program.clone(),
            config.stream_quality.clone(),
        )),
        Arc::new(Ffmpeg::new(config.ffmpeg_program.clone())),
        Arc::new(SongbirdTransport::new(songbird.clone())),
        clock.clone(),
        config.policy.clone(),
        config.resolver_timeout,
    );
    let session_task = tokio::spawn(controller.run());

    let listener = TcpListener::bind((config.bind_host.as_str(), config.http_port)).await?;
    info!("web server running on {}", listener.local_addr()?);
    let (stop_http, http_stopped) = tokio::sync::oneshot::channel::<()>();
    let router = status::router(handle.status(), clock);
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = http_stopped.await;
        };
        if let Err(e) = status::serve(listener, router, shutdown).await {
            error!("web server failed: {}", e);
        }
    });

    // Give hosting platforms time to see the open port before logging in.
    tokio::time::sleep(config.bot_start_delay).await;

    let mut client = bot::client(&config.discord_token, handle.clone(), songbird).await?;
    let shards = client.shard_manager.clone();

    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!("gateway client stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
            shards.shutdown_all().await;
        }
    }

    handle.shutdown();
    let _ = session_task.await;
    let _ = stop_http.send(());
    Ok(())
}
