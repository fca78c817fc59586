//! Kasa JSON request and reply types
//!
//! Requests are deserialized once into partial structs where every field is
//! optional. Fields that are present but of the wrong JSON type are treated as
//! absent instead of failing the whole message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const LIGHTING_SERVICE: &str = "smartlife.iot.smartbulb.lightingservice";
pub const SYSTEM: &str = "system";
pub const CLOUD: &str = "smartlife.iot.common.cloud";

pub const TRANSITION_LIGHT_STATE: &str = "transition_light_state";
pub const GET_LIGHT_STATE: &str = "get_light_state";
pub const GET_SYSINFO: &str = "get_sysinfo";
pub const GET_INFO: &str = "get_info";
pub const BIND: &str = "bind";

/// Top-level request, one optional entry per module
#[derive(Debug, Default, Deserialize)]
pub struct Request {
    #[serde(rename = "smartlife.iot.smartbulb.lightingservice", default, deserialize_with = "lenient")]
    pub lighting: Option<LightingService>,
    #[serde(default, deserialize_with = "lenient")]
    pub system: Option<SystemService>,
    #[serde(rename = "smartlife.iot.common.cloud", default, deserialize_with = "lenient")]
    pub cloud: Option<CloudService>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LightingService {
    #[serde(default, deserialize_with = "lenient")]
    pub transition_light_state: Option<TransitionLightState>,
    #[serde(default, deserialize_with = "present")]
    pub get_light_state: Option<JsonValue>,
}

/// Partial light update, every field applied independently
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct TransitionLightState {
    #[serde(default, deserialize_with = "number")]
    pub hue: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub saturation: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub brightness: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub color_temp: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub on_off: Option<f64>,
}

impl TransitionLightState {
    /// True if any field changing the colour is present
    pub fn has_colour(&self) -> bool {
        self.hue.is_some() || self.saturation.is_some() || self.brightness.is_some() || self.color_temp.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SystemService {
    #[serde(default, deserialize_with = "present")]
    pub get_sysinfo: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloudService {
    #[serde(default, deserialize_with = "present")]
    pub get_info: Option<JsonValue>,
    #[serde(default, deserialize_with = "present")]
    pub bind: Option<JsonValue>,
}

impl Request {
    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

/// Keep a key even when its value is `null`
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<JsonValue>, D::Error> {
    JsonValue::deserialize(deserializer).map(Some)
}

fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(JsonValue::deserialize(deserializer)?.as_f64())
}

fn lenient<'de, D: Deserializer<'de>, T: DeserializeOwned>(deserializer: D) -> Result<Option<T>, D::Error> {
    let value = JsonValue::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Colour part of a light state reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LightDetails {
    pub mode: &'static str,
    pub hue: u16,
    pub saturation: u8,
    pub brightness: u8,
    pub color_temp: u16,
}

/// `light_state` object as the Kasa app expects it
///
/// While the bulb is on the colour sits next to `on_off`; while it is off the
/// colour it will resume at goes under `dft_on_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LightStateReply {
    pub on_off: u8,
    #[serde(flatten)]
    pub current: Option<LightDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dft_on_state: Option<LightDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_code: Option<i32>,
}

impl LightStateReply {
    pub fn new(on: bool, details: LightDetails) -> Self {
        if on {
            Self { on_off: 1, current: Some(details), dft_on_state: None, err_code: None }
        } else {
            Self { on_off: 0, current: None, dft_on_state: Some(details), err_code: None }
        }
    }

    /// Minimal acknowledgement of an "off" transition
    pub fn off_ack() -> Self {
        Self { on_off: 0, current: None, dft_on_state: None, err_code: Some(0) }
    }

    pub fn with_err_code(mut self, code: i32) -> Self {
        self.err_code = Some(code);
        self
    }
}

/// `err_code` only body, used for `bind`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ErrCode {
    pub err_code: i32,
}

pub const OK: ErrCode = ErrCode { err_code: 0 };

/// Reply assembled one module method at a time
#[derive(Debug, Default)]
pub struct Reply {
    root: Map<String, JsonValue>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `{module: {method: body}}`, keeping other methods of the module
    pub fn insert<T: Serialize>(&mut self, module: &str, method: &str, body: &T) -> serde_json::Result<()> {
        let body = serde_json::to_value(body)?;
        let entry = self
            .root
            .entry(module.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let JsonValue::Object(methods) = entry {
            methods.insert(method.to_string(), body);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn get(&self, module: &str, method: &str) -> Option<&JsonValue> {
        self.root.get(module)?.get(method)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.root)
    }
}
