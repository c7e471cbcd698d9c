use async_trait::async_trait;
use serde_json::Value;

use super::BackendError;

pub const CURRENT_FIELDS: &str = "temperature_2m,wind_speed_10m,weather_code";
pub const HOURLY_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m";

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Structured forecast for a coordinate pair, as returned by the provider.
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<Value, BackendError>;
}

/// Open-Meteo forecast API (no credentials required).
#[derive(Debug, Clone)]
pub struct OpenMeteo {
    client: reqwest::Client,
    base_url: String,
}

impl OpenMeteo {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteo {
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<Value, BackendError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("hourly", HOURLY_FIELDS.to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}
