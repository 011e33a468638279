//! Tools and resources a session exposes to its client.
//!
//! Each session gets its own [`CapabilitySet`], installed once by
//! [`DefaultCapabilities`] before the handshake is answered.

use super::requests::AddRequest;
use super::McpTransport;
use crate::error::{InstallError, ToolError};
use crate::session::CapabilityInstaller;
use rmcp::model::{
    CallToolResult, Content, ResourcesCapability, ServerCapabilities, Tool, ToolsCapability,
};
use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

type ToolHandler = Box<dyn Fn(Map<String, Value>) -> Result<CallToolResult, ToolError> + Send + Sync>;
type ResourceHandler =
    Box<dyn Fn(&str, &HashMap<String, String>) -> Result<Vec<ResourceContents>, ToolError> + Send + Sync>;

/// One entry of a `resources/read` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

/// Public description of a resource template (`resources/templates/list`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateInfo {
    pub uri_template: String,
    pub name: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

struct ToolEntry {
    tool: Tool,
    handler: ToolHandler,
}

struct TemplateEntry {
    info: ResourceTemplateInfo,
    template: UriTemplate,
    handler: ResourceHandler,
}

/// Registered tools and resource templates of one session.
#[derive(Default)]
pub struct CapabilitySet {
    tools: Vec<ToolEntry>,
    templates: Vec<TemplateEntry>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tools and resources every session of this server exposes.
    pub fn standard() -> Self {
        let mut set = Self::new();
        set.register_tool(
            make_tool::<AddRequest>("add", "Addition Tool", "Add two numbers"),
            |args| {
                let req: AddRequest = parse_args("add", args)?;
                let sum = req.a + req.b;
                Ok(CallToolResult {
                    content: vec![Content::text(sum.to_string())],
                    structured_content: Some(json!({
                        "type": "text",
                        "text": format!("A soma de {} e {} is {}.", req.a, req.b, sum),
                    })),
                    is_error: Some(false),
                    meta: None,
                })
            },
        );
        set.register_template(
            ResourceTemplateInfo {
                uri_template: "greeting://{name}".to_string(),
                name: "greeting".to_string(),
                title: "Greeting Resource".to_string(),
                description: "Dynamic greeting generator".to_string(),
                mime_type: Some("text/plain".to_string()),
            },
            |uri, vars| {
                let name = vars
                    .get("name")
                    .ok_or_else(|| ToolError::ResourceNotFound(uri.to_string()))?;
                Ok(vec![ResourceContents {
                    uri: uri.to_string(),
                    mime_type: Some("text/plain".to_string()),
                    text: format!("Hello, {name}!"),
                }])
            },
        );
        set
    }

    pub fn register_tool(
        &mut self,
        tool: Tool,
        handler: impl Fn(Map<String, Value>) -> Result<CallToolResult, ToolError> + Send + Sync + 'static,
    ) {
        self.tools.retain(|t| t.tool.name != tool.name);
        self.tools.push(ToolEntry {
            tool,
            handler: Box::new(handler),
        });
    }

    pub fn register_template(
        &mut self,
        info: ResourceTemplateInfo,
        handler: impl Fn(&str, &HashMap<String, String>) -> Result<Vec<ResourceContents>, ToolError>
            + Send
            + Sync
            + 'static,
    ) {
        let template = UriTemplate::parse(&info.uri_template);
        self.templates.push(TemplateEntry {
            info,
            template,
            handler: Box::new(handler),
        });
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.tool.clone()).collect()
    }

    pub fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, ToolError> {
        let entry = self
            .tools
            .iter()
            .find(|t| t.tool.name == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        (entry.handler)(arguments.unwrap_or_default())
    }

    pub fn list_templates(&self) -> Vec<ResourceTemplateInfo> {
        self.templates.iter().map(|t| t.info.clone()).collect()
    }

    pub fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, ToolError> {
        for entry in &self.templates {
            if let Some(vars) = entry.template.matches(uri) {
                return (entry.handler)(uri, &vars);
            }
        }
        Err(ToolError::ResourceNotFound(uri.to_string()))
    }

    /// Capabilities advertised in the `initialize` result.
    pub fn server_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            logging: Some(Map::new()),
            resources: Some(ResourcesCapability {
                subscribe: Some(true),
                list_changed: Some(true),
            }),
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
            ..Default::default()
        }
    }
}

/// Installs [`CapabilitySet::standard`] into each new session.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCapabilities;

impl CapabilityInstaller<McpTransport> for DefaultCapabilities {
    fn install(&self, transport: &McpTransport) -> Result<(), InstallError> {
        transport.install_capabilities(CapabilitySet::standard());
        Ok(())
    }
}

/// Create a Tool whose input schema is generated from `T`.
fn make_tool<T: JsonSchema>(
    name: &'static str,
    title: &'static str,
    description: &'static str,
) -> Tool {
    let mut schema = serde_json::to_value(schema_for!(T))
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    schema.remove("$schema");
    Tool {
        name: Cow::Borrowed(name),
        description: Some(Cow::Borrowed(description)),
        input_schema: Arc::new(schema),
        annotations: None,
        execution: None,
        icons: None,
        meta: None,
        output_schema: None,
        title: Some(title.to_string()),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    tool: &str,
    args: Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args)).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// Level-1 RFC 6570 template: literals and simple `{var}` expressions.
#[derive(Debug, Clone)]
struct UriTemplate {
    segments: Vec<Segment>,
}

impl UriTemplate {
    fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            segments.push(Segment::Var(rest[open + 1..open + close].to_string()));
            rest = &rest[open + close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Self { segments }
    }

    /// Match `uri` and extract variables. A variable matches a non-empty run
    /// without `/`, up to the next literal.
    fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let mut vars = HashMap::new();
        let mut rest = uri;
        let mut iter = self.segments.iter().peekable();
        while let Some(segment) = iter.next() {
            match segment {
                Segment::Literal(lit) => rest = rest.strip_prefix(lit.as_str())?,
                Segment::Var(name) => {
                    let end = match iter.peek() {
                        Some(Segment::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    let value = &rest[..end];
                    if value.is_empty() || value.contains('/') {
                        return None;
                    }
                    vars.insert(name.clone(), value.to_string());
                    rest = &rest[end..];
                }
            }
        }
        rest.is_empty().then_some(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Option<Map<String, Value>> {
        value.as_object().cloned()
    }

    #[test]
    fn add_returns_sum_as_text_and_structured_content() {
        let set = CapabilitySet::standard();
        let result = set.call_tool("add", args(json!({"a": 2, "b": 3}))).unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "5");
        assert_eq!(
            value["structuredContent"]["text"],
            "A soma de 2 e 3 is 5."
        );
        assert_eq!(result.is_error, Some(false));
    }

    #[test]
    fn add_keeps_fractions() {
        let set = CapabilitySet::standard();
        let result = set
            .call_tool("add", args(json!({"a": 0.5, "b": 1.25})))
            .unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["content"][0]["text"], "1.75");
    }

    #[test]
    fn add_rejects_bad_arguments() {
        let set = CapabilitySet::standard();
        for bad in [json!({"a": 2}), json!({"a": "2", "b": 3}), json!({})] {
            let err = set.call_tool("add", args(bad)).unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments { .. }));
        }
        assert!(matches!(
            set.call_tool("add", None).unwrap_err(),
            ToolError::InvalidArguments { .. }
        ));
    }

    #[test]
    fn unknown_tool_is_reported() {
        let set = CapabilitySet::standard();
        assert!(matches!(
            set.call_tool("subtract", None).unwrap_err(),
            ToolError::UnknownTool(name) if name == "subtract"
        ));
    }

    #[test]
    fn add_schema_lists_both_numbers() {
        let tools = CapabilitySet::standard().list_tools();
        assert_eq!(tools.len(), 1);
        let schema = &tools[0].input_schema;
        assert!(schema.get("$schema").is_none());
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("a") && props.contains_key("b"));
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"a") && required.contains(&"b"));
    }

    #[test]
    fn greeting_template_reads_name() {
        let set = CapabilitySet::standard();
        let contents = set.read_resource("greeting://Ada").unwrap();
        assert_eq!(
            contents,
            vec![ResourceContents {
                uri: "greeting://Ada".to_string(),
                mime_type: Some("text/plain".to_string()),
                text: "Hello, Ada!".to_string(),
            }]
        );
    }

    #[test]
    fn unmatched_uri_is_not_found() {
        let set = CapabilitySet::standard();
        for uri in ["greeting://", "greeting://a/b", "file:///etc/passwd"] {
            assert!(matches!(
                set.read_resource(uri).unwrap_err(),
                ToolError::ResourceNotFound(_)
            ));
        }
    }

    #[test]
    fn uri_template_with_inner_literals() {
        let template = UriTemplate::parse("users://{id}/posts/{post}");
        let vars = template.matches("users://42/posts/7").unwrap();
        assert_eq!(vars["id"], "42");
        assert_eq!(vars["post"], "7");
        assert!(template.matches("users://42/posts/").is_none());
        assert!(template.matches("users://42/comments/7").is_none());
    }
}
