//! WebSocket message types: browser requests, commands and replies.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};

use crate::error::GatewayError;
use crate::protocol::{BrowsePath, NodeRef, QualifiedName};

/// A browser request: a JSON object with at least a `command`.
///
/// The whole object is kept because `set settings` and
/// `set connectionpoints` store it verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct WsRequest {
    /// Raw command string.
    pub command: String,
    /// Target endpoint, for connection-scoped commands.
    pub endpoint: Option<String>,
    /// Correlation id echoed in the reply.
    pub uniqueid: Option<Json>,
    raw: Map<String, Json>,
}

impl WsRequest {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Json`] if the frame is not JSON.
    /// - [`GatewayError::InvalidRequest`] if it is not an object with a
    ///   string `command`.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let Json::Object(raw) = serde_json::from_str::<Json>(text)? else {
            return Err(GatewayError::InvalidRequest("request must be a JSON object".into()));
        };
        let command = raw
            .get("command")
            .and_then(Json::as_str)
            .ok_or_else(|| GatewayError::InvalidRequest("missing command".into()))?
            .to_string();
        let endpoint = raw.get("endpoint").and_then(Json::as_str).map(str::to_string);
        let uniqueid = raw.get("uniqueid").filter(|v| is_truthy(v)).cloned();
        Ok(Self {
            command,
            endpoint,
            uniqueid,
            raw,
        })
    }

    /// Optional string field.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.raw.get(name).and_then(Json::as_str)
    }

    /// The endpoint, required by connection-scoped commands.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if it is missing.
    pub fn require_endpoint(&self) -> Result<&str, GatewayError> {
        self.endpoint
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidRequest(format!("'{}' needs an endpoint", self.command)))
    }

    /// The request as a JSON document.
    #[must_use]
    pub fn document(&self) -> Json {
        Json::Object(self.raw.clone())
    }

    /// Start node and relative path of a `pathtoid` request.
    ///
    /// `nodeid` is a node id string or `{"NamespaceIndex", "Identifier"}`.
    /// `path` is a list of `{"namespaceindex", "identifier"}` steps, either
    /// inline or encoded as a JSON string.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidRequest`] if either field is missing.
    /// - [`GatewayError::Json`] if a field has the wrong shape.
    pub fn path_request(&self) -> Result<(NodeRef, BrowsePath), GatewayError> {
        let start = match self.raw.get("nodeid") {
            Some(Json::String(id)) => NodeRef::new(id.as_str()),
            Some(id @ Json::Object(_)) => StartNode::deserialize(id)?.node(),
            _ => return Err(GatewayError::InvalidRequest("'pathtoid' needs a nodeid".into())),
        };
        let steps: Vec<PathStep> = match self.raw.get("path") {
            Some(Json::String(encoded)) => serde_json::from_str(encoded)?,
            Some(inline) => Vec::deserialize(inline)?,
            None => return Err(GatewayError::InvalidRequest("'pathtoid' needs a path".into())),
        };
        let path = BrowsePath::new(
            steps
                .into_iter()
                .map(|step| QualifiedName::new(step.namespaceindex, step.identifier))
                .collect(),
        );
        Ok((start, path))
    }
}

#[derive(Debug, Deserialize)]
struct StartNode {
    #[serde(rename = "NamespaceIndex")]
    namespace_index: u16,
    #[serde(rename = "Identifier")]
    identifier: Json,
}

impl StartNode {
    fn node(&self) -> NodeRef {
        match &self.identifier {
            Json::String(name) => NodeRef::new(format!("ns={};s={name}", self.namespace_index)),
            other => NodeRef::new(format!("ns={};s={other}", self.namespace_index)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PathStep {
    namespaceindex: u16,
    identifier: String,
}

fn is_truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::String(s) => !s.is_empty(),
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

/// Commands the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsCommand {
    /// `connect to`.
    ConnectTo,
    /// `terminate connection`.
    TerminateConnection,
    /// `subscribe`.
    Subscribe,
    /// `read`.
    Read,
    /// `pathtoid`.
    PathToId,
    /// `namespaces`.
    Namespaces,
    /// `get settings`.
    GetSettings,
    /// `set settings`.
    SetSettings,
    /// `get connectionpoints`.
    GetConnectionPoints,
    /// `set connectionpoints`.
    SetConnectionPoints,
}

impl WsCommand {
    /// Whether the browser expects a reply.
    #[must_use]
    pub const fn replies(&self) -> bool {
        !matches!(self, Self::SetSettings | Self::SetConnectionPoints)
    }
}

impl FromStr for WsCommand {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect to" => Ok(Self::ConnectTo),
            "terminate connection" => Ok(Self::TerminateConnection),
            "subscribe" => Ok(Self::Subscribe),
            "read" => Ok(Self::Read),
            "pathtoid" => Ok(Self::PathToId),
            "namespaces" => Ok(Self::Namespaces),
            "get settings" => Ok(Self::GetSettings),
            "set settings" => Ok(Self::SetSettings),
            "get connectionpoints" => Ok(Self::GetConnectionPoints),
            "set connectionpoints" => Ok(Self::SetConnectionPoints),
            other => Err(GatewayError::UnknownCommand(other.to_string())),
        }
    }
}

/// Reply envelope sent for every request that expects one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsReply {
    /// Echoed correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uniqueid: Option<Json>,
    /// Echoed command.
    pub command: Option<String>,
    /// Echoed endpoint.
    pub endpoint: Option<String>,
    /// Command result or exception object.
    pub data: Json,
}

impl WsReply {
    /// Reply to `request` carrying `data`.
    #[must_use]
    pub fn to(request: &WsRequest, data: Json) -> Self {
        Self {
            uniqueid: request.uniqueid.clone(),
            command: Some(request.command.clone()),
            endpoint: request.endpoint.clone(),
            data,
        }
    }

    /// Reply to a frame that could not be parsed as a request.
    #[must_use]
    pub fn unparsed(error: &GatewayError) -> Self {
        Self {
            uniqueid: None,
            command: None,
            endpoint: None,
            data: exception(error),
        }
    }
}

/// `{"exception": <message>, "code": <code>}` for `error`.
#[must_use]
pub fn exception(error: &GatewayError) -> Json {
    json!({
        "exception": error.to_string(),
        "code": error.error_code(),
    })
}
