//! Current weather from OpenWeatherMap

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::tools::{Tool, ToolArgs, ToolHandler, ToolOutput, required_str};
use crate::{Error, Result};

const ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    name: Option<String>,
    #[serde(default)]
    sys: WeatherSys,
    main: WeatherMain,
    weather: Vec<WeatherCondition>,
    wind: WeatherWind,
}

#[derive(Debug, Default, Deserialize)]
struct WeatherSys {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WeatherMain {
    temp: f64,
    feels_like: f64,
    humidity: u32,
}

#[derive(Debug, Deserialize)]
struct WeatherCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct WeatherWind {
    speed: f64,
}

fn format_report(location: &str, data: &WeatherResponse) -> String {
    let city = data.name.as_deref().unwrap_or(location);
    let country = data.sys.country.as_deref().unwrap_or_default();
    let conditions = data
        .weather
        .first()
        .map_or("unknown", |w| w.description.as_str());

    format!(
        "Weather in {city}, {country}:\n  Conditions: {conditions}\n  Temperature: {:.1}°C (feels like {:.1}°C)\n  Humidity: {}%\n  Wind: {} m/s",
        data.main.temp, data.main.feels_like, data.main.humidity, data.wind.speed
    )
}

struct WeatherHandler {
    api_key: String,
    client: reqwest::Client,
}

#[async_trait]
impl ToolHandler for WeatherHandler {
    async fn call(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let location = required_str(args, "location")?;

        let response = self
            .client
            .get(ENDPOINT)
            .query(&[("q", location), ("appid", &self.api_key), ("units", "metric")])
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Ok(ToolOutput::Text(format!(
                    "Could not find weather data for '{location}'. Please check the city name."
                )));
            }
            StatusCode::UNAUTHORIZED => {
                return Err(Error::Tool("invalid OpenWeatherMap API key".to_string()));
            }
            _ => {}
        }

        let data: WeatherResponse = response.error_for_status()?.json().await?;
        Ok(ToolOutput::Text(format_report(location, &data)))
    }
}

/// The `get_weather` tool
#[must_use]
pub fn tool(api_key: String) -> Tool {
    Tool::new(
        "get_weather",
        "Get current weather for a location. Use this when the user asks about the weather, temperature, or forecast for a city or place.",
        WeatherHandler {
            api_key,
            client: reqwest::Client::new(),
        },
    )
    .parameters(json!({
        "type": "object",
        "properties": {
            "location": {
                "type": "string",
                "description": "City name (e.g., 'London', 'New York', 'Tokyo')"
            }
        },
        "required": ["location"]
    }))
    .usage_rule("get_weather: weather, temperature, rain, or forecast for a place")
}
