use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to write overlay text {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

/// Periodically refreshed plain-text overlay source (wttr.in-style report).
/// Staleness and absence are tolerated by the overlay; callers log refresh
/// failures and move on.
#[derive(Debug, Clone)]
pub struct WeatherFetcher {
    client: reqwest::Client,
    url: String,
    output_path: PathBuf,
}

impl WeatherFetcher {
    pub fn new(url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            output_path: output_path.into(),
        }
    }

    pub async fn refresh(&self) -> Result<(), WeatherError> {
        let report = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        // drawtext reads the file raw; backslashes would start escapes.
        let report = report.replace('\\', "\\\\");
        tokio::fs::write(&self.output_path, report)
            .await
            .map_err(|source| WeatherError::Io {
                source,
                path: self.output_path.clone(),
            })?;
        info!(path = %self.output_path.display(), "weather overlay refreshed");
        Ok(())
    }
}
