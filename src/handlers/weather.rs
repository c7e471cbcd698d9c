//! Weather lookup deployment. Coordinate bounds are schema constraints; there
//! is no policy beyond them.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::backends::weather::WeatherProvider;
use crate::backends::BackendError;
use crate::dispatch::Deployment;
use crate::registry::{OperationDescriptor, Registry, RegistryError};
use crate::schema::{Arguments, FieldSchema, InputSchema};

/// Hourly rows shown after the current conditions.
const FORECAST_HOURS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherOperation {
    GetWeather,
}

/// The weather deployment exposes no resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherResource {}

pub struct WeatherDeployment {
    provider: Arc<dyn WeatherProvider>,
    registry: Registry<WeatherOperation, WeatherResource>,
}

impl WeatherDeployment {
    pub fn new(provider: Arc<dyn WeatherProvider>) -> Result<Self, RegistryError> {
        Ok(Self {
            provider,
            registry: registry()?,
        })
    }
}

fn registry() -> Result<Registry<WeatherOperation, WeatherResource>, RegistryError> {
    Registry::new(
        vec![OperationDescriptor::new(
            "get_weather",
            "Get current weather and hourly forecast for a location using coordinates",
            InputSchema::new()
                .field(
                    FieldSchema::number("latitude", "Latitude of the location (-90 to 90)")
                        .range(-90.0, 90.0)
                        .required(),
                )
                .field(
                    FieldSchema::number("longitude", "Longitude of the location (-180 to 180)")
                        .range(-180.0, 180.0)
                        .required(),
                ),
            WeatherOperation::GetWeather,
        )],
        Vec::new(),
    )
}

/// Render a provider payload as the human-readable report.
pub fn format_forecast(data: &Value) -> String {
    let current = data.get("current");
    let field = |section: Option<&Value>, key: &str| display(section.and_then(|s| s.get(key)));

    let mut out = format!(
        "Current Weather at ({}, {}):\n",
        display(data.get("latitude")),
        display(data.get("longitude"))
    );
    let _ = writeln!(out, "- Temperature: {}°C", field(current, "temperature_2m"));
    let _ = writeln!(out, "- Wind Speed: {} km/h", field(current, "wind_speed_10m"));
    let _ = writeln!(out, "- Timezone: {}", display(data.get("timezone")));

    let hourly = data.get("hourly");
    let times = hourly
        .and_then(|h| h.get("time"))
        .and_then(Value::as_array)
        .filter(|times| !times.is_empty());

    if let Some(times) = times {
        let column = |key: &str, index: usize| {
            display(hourly.and_then(|h| h.get(key)).and_then(|values| values.get(index)))
        };
        out.push_str("\nNext 3 hours forecast:\n");
        for (index, time) in times.iter().take(FORECAST_HOURS).enumerate() {
            let _ = writeln!(
                out,
                "  {}: {}°C, {}% humidity",
                display(Some(time)),
                column("temperature_2m", index),
                column("relative_humidity_2m", index)
            );
        }
    }

    out
}

/// Missing and null values print as `N/A`; integral numbers drop the fraction.
fn display(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            Some(f) => format!("{f}"),
            None => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl Deployment for WeatherDeployment {
    type Operation = WeatherOperation;
    type Resource = WeatherResource;

    fn name(&self) -> &'static str {
        "weather-server"
    }

    fn registry(&self) -> &Registry<WeatherOperation, WeatherResource> {
        &self.registry
    }

    async fn execute(&self, operation: WeatherOperation, args: &Arguments) -> Result<String, BackendError> {
        match operation {
            WeatherOperation::GetWeather => {
                let coordinate = |key: &str| args.get(key).and_then(Value::as_f64).unwrap_or_default();
                let data = self
                    .provider
                    .fetch(coordinate("latitude"), coordinate("longitude"))
                    .await?;
                Ok(format_forecast(&data))
            }
        }
    }

    async fn produce(&self, resource: WeatherResource) -> Result<String, BackendError> {
        match resource {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn report_includes_current_and_three_hours() {
        let data = json!({
            "latitude": 10.0,
            "longitude": 10.25,
            "timezone": "Africa/Lagos",
            "current": { "temperature_2m": 27.4, "wind_speed_10m": 8 },
            "hourly": {
                "time": ["2026-10-18T00:00", "2026-10-18T01:00", "2026-10-18T02:00", "2026-10-18T03:00"],
                "temperature_2m": [26.1, 25.8, null, 25.0],
                "relative_humidity_2m": [80, 82]
            }
        });

        let expected = "Current Weather at (10, 10.25):\n\
- Temperature: 27.4°C\n\
- Wind Speed: 8 km/h\n\
- Timezone: Africa/Lagos\n\
\n\
Next 3 hours forecast:\n  \
2026-10-18T00:00: 26.1°C, 80% humidity\n  \
2026-10-18T01:00: 25.8°C, 82% humidity\n  \
2026-10-18T02:00: N/A°C, N/A% humidity\n";

        assert_eq!(format_forecast(&data), expected);
    }

    #[test]
    fn missing_sections_print_placeholders() {
        let report = format_forecast(&json!({ "latitude": -5, "longitude": 3.5 }));
        assert_eq!(
            report,
            "Current Weather at (-5, 3.5):\n- Temperature: N/A°C\n- Wind Speed: N/A km/h\n- Timezone: N/A\n"
        );
    }
}
