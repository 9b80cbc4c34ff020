//! Demo weather provider with canned readings.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use switchboard_core::capability::{
    CallContext, Capability, CapabilityDefinition, CapabilityError, CapabilityHandler,
    CapabilityProvider,
};
use switchboard_core::ids::ResponseId;
use switchboard_core::protocol::{ProtocolResponse, ProtocolResult};
use switchboard_core::schema::{object_schema, string_schema};

pub const PROVIDER_NAME: &str = "weatherService";
pub const GET_CURRENT_WEATHER: &str = "get_current_weather";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Unit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl Unit {
    fn reading(self) -> (i64, &'static str, &'static str) {
        match self {
            Self::Celsius => (22, "°C", "celsius"),
            Self::Fahrenheit => (72, "°F", "fahrenheit"),
        }
    }
}

#[derive(Deserialize)]
struct WeatherArgs {
    location: Option<String>,
    #[serde(default)]
    unit: Option<Unit>,
}

struct CurrentWeather;

#[async_trait]
impl CapabilityHandler for CurrentWeather {
    async fn call(
        &self,
        args: Value,
        _ctx: &CallContext,
    ) -> Result<ProtocolResponse, CapabilityError> {
        let args: WeatherArgs = serde_json::from_value(args)?;
        let location = args
            .location
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| CapabilityError::InvalidArguments("location is required".into()))?;
        let (temperature, symbol, unit) = args.unit.unwrap_or_default().reading();

        let text = format!("Current weather in {location}: {temperature}{symbol}");
        let result = ProtocolResult::text(text).with_structured(json!({
            "location": location,
            "temperature": temperature,
            "unit": unit,
        }));
        Ok(ProtocolResponse::ok(ResponseId::new(), result))
    }
}

pub fn definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        GET_CURRENT_WEATHER,
        "Get the current weather for a location",
        object_schema(
            &[
                ("location", string_schema("City name, e.g. Paris")),
                (
                    "unit",
                    json!({
                        "type": "string",
                        "enum": ["celsius", "fahrenheit"],
                        "description": "Temperature unit",
                    }),
                ),
            ],
            &["location"],
        ),
    )
}

pub fn provider() -> CapabilityProvider {
    CapabilityProvider::new(PROVIDER_NAME).with(Capability::new(definition(), CurrentWeather))
}
