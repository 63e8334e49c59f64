use std::process::Stdio;

use async_trait::async_trait;
use log::warn;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Turns a live-stream page URL into a direct, time-limited media URL.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, source_url: &str) -> Result<String>;
}

pub struct Streamlink {
    program: String,
    quality: String,
}

impl Streamlink {
    pub fn new(program: impl Into<String>, quality: impl Into<String>) -> Self {
        Streamlink {
            program: program.into(),
            quality: quality.into(),
        }
    }
}

#[async_trait]
impl Resolver for Streamlink {
    async fn resolve(&self, source_url: &str) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--stream-url")
            .arg(source_url)
            .arg(&self.quality)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::spawn(&self.program, e))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("{} error: {}", self.program, stderr.trim());
        }

        media_url_from_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Resolver output counts only when it is a single URL.
pub fn media_url_from_output(stdout: &str) -> Result<String> {
    let candidate = stdout.trim();
    if candidate.starts_with("http") {
        Ok(candidate.to_owned())
    } else {
        Err(Error::NoStreamUrl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_trimmed_url() {
        let url = media_url_from_output("  https://cdn.example/x.flv?expires=10\n").unwrap();
        assert_eq!(url, "https://cdn.example/x.flv?expires=10");
    }

    #[test]
    fn rejects_non_urls() {
        assert!(matches!(media_url_from_output(""), Err(Error::NoStreamUrl)));
        assert!(matches!(media_url_from_output("\n\n"), Err(Error::NoStreamUrl)));
        assert!(matches!(
            media_url_from_output("error: No playable streams found on this URL"),
            Err(Error::NoStreamUrl)
        ));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let resolver = Streamlink::new("/nonexistent/streamlink-binary", "best");
        let err = resolver
            .resolve("https://www.tiktok.com/@user/live")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
