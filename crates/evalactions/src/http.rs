use async_trait::async_trait;
use evalcore::{ActionContext, ActionHandler, FlowNode, Map, NodeError, NodeOutput, NodeType, Value};
use evalruntime::{ActionDefinition, ActionParam, ActionParamType};

/// HTTP request action
pub struct HttpRequestAction {
    client: reqwest::Client,
}

impl HttpRequestAction {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for HttpRequestAction {
    async fn call(&self, _node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError> {
        let url = ctx.require_str("url")?;
        let method_value = ctx.param_or("method", Value::from("GET"));
        let method = method_value.as_str().unwrap_or("GET").to_uppercase();

        ctx.events.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        if let Some(body) = ctx.param("body") {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(&other.to_json()),
            };
        }

        if let Some(Value::Object(headers)) = ctx.param("headers") {
            for (key, value) in headers {
                request = request.header(key.as_str(), value.render());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers_map: Map = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status));
        tracing::debug!(url, status, bytes = body_text.len(), "HTTP request finished");

        let json = serde_json::from_str::<serde_json::Value>(&body_text)
            .map(Value::from)
            .unwrap_or(Value::Null);

        Ok(NodeOutput::new()
            .with_output("status", status as f64)
            .with_output("ok", (200..300).contains(&status))
            .with_output("body", body_text)
            .with_output("json", json)
            .with_output("headers", Value::Object(headers_map)))
    }
}

pub(crate) fn definition() -> ActionDefinition {
    ActionDefinition::new("http.request", "HTTP request", NodeType::Action)
        .with_description("Make HTTP requests")
        .with_param(ActionParam::new("url", "URL", ActionParamType::String))
        .with_param(
            ActionParam::new("method", "Method", ActionParamType::Select)
                .with_options(["GET", "POST", "PUT", "PATCH", "DELETE"])
                .optional(Some("GET".into())),
        )
        .with_param(ActionParam::new("headers", "Headers", ActionParamType::Json).optional(None))
        .with_param(ActionParam::new("body", "Body", ActionParamType::Json).optional(None))
}
