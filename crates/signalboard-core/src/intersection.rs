use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type JsonObject = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntersectionStatus {
    Operational,
    Maintenance,
    Stopped,
}

impl IntersectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntersectionStatus::Operational => "operational",
            IntersectionStatus::Maintenance => "maintenance",
            IntersectionStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for IntersectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntersectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "operational" => Ok(IntersectionStatus::Operational),
            "maintenance" => Ok(IntersectionStatus::Maintenance),
            "stopped" => Ok(IntersectionStatus::Stopped),
            other => Err(format!("unknown intersection status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionRecord {
    pub id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: IntersectionStatus,
    pub last_seen: Option<String>,
    #[serde(default)]
    pub location: Option<JsonObject>,
    #[serde(default)]
    pub meta: Option<JsonObject>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionsList {
    pub intersections: Vec<IntersectionRecord>,
    #[serde(default)]
    pub status_options: Vec<IntersectionStatus>,
    #[serde(default)]
    pub persistence_disabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionMutation {
    pub intersection: IntersectionRecord,
    #[serde(default)]
    pub status_options: Vec<IntersectionStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateIntersection {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IntersectionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<JsonObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntersectionFilters {
    pub status: Option<IntersectionStatus>,
    pub ids: Vec<String>,
}

impl IntersectionFilters {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if !self.ids.is_empty() {
            pairs.push(("ids", self.ids.join(",")));
        }
        pairs
    }
}
