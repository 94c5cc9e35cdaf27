use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Canonical ledger header, in file order
pub const LEDGER_COLUMNS: [&str; 9] = [
    "id",
    "organization_id",
    "name",
    "angle_of_view",
    "elevation",
    "lat",
    "lon",
    "is_trustable",
    "real_api_id",
];

pub const DEFAULT_ANGLE_OF_VIEW: f64 = 54.2;
pub const DEFAULT_ELEVATION: f64 = 0.0;

/// Camera as returned by the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCamera {
    pub id: i64,
    pub organization_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub angle_of_view: Option<f64>,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub is_trustable: Option<bool>,
}

impl RemoteCamera {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// One row of the local camera ledger.
///
/// Field order is the canonical column order. Every field is optional so that
/// files written by older tooling (missing columns, blank cells) still load;
/// unknown columns are ignored on read and therefore dropped on the next write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalCameraRow {
    #[serde(deserialize_with = "lenient_int")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub organization_id: Option<i64>,
    pub name: Option<String>,
    pub angle_of_view: Option<f64>,
    pub elevation: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(
        deserialize_with = "bool_like::deserialize",
        serialize_with = "bool_like::serialize"
    )]
    pub is_trustable: Option<bool>,
    #[serde(deserialize_with = "lenient_int")]
    pub real_api_id: Option<i64>,
}

impl LocalCameraRow {
    /// New row mirroring a remote camera. `organization_id` still holds the
    /// remote organization id and `id` is unassigned.
    pub fn from_remote(camera: &RemoteCamera) -> Self {
        Self {
            id: None,
            organization_id: Some(camera.organization_id),
            name: Some(camera.display_name().to_string()),
            angle_of_view: Some(camera.angle_of_view.unwrap_or(DEFAULT_ANGLE_OF_VIEW)),
            elevation: Some(camera.elevation.unwrap_or(DEFAULT_ELEVATION)),
            lat: camera.lat,
            lon: camera.lon,
            is_trustable: camera.is_trustable,
            real_api_id: Some(camera.id),
        }
    }
}

/// Integers written by spreadsheet tools may carry a `.0` suffix. Anything
/// that is not a whole number reads as missing.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| parse_whole_number(value.trim())))
}

fn parse_whole_number(value: &str) -> Option<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}

mod bool_like {
    use super::*;
    use serde::de::Error as _;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(Some(true)),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(Some(false)),
            Some(v) => Err(D::Error::custom(format!("invalid boolean: {}", v))),
        }
    }

    pub fn serialize<S>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(true) => serializer.serialize_str("True"),
            Some(false) => serializer.serialize_str("False"),
            None => serializer.serialize_none(),
        }
    }
}
