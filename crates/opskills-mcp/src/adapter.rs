//! Translation between skills and MCP tools, resources and content.
//!
//! Everything here is pure: callers supply file listings and contents.

use opskills_core::skill::SCRIPT_EXTENSION;
use opskills_core::{ExecutionParams, ExecutionResult, FailureKind, ParamValue, Skill};
use serde_json::{json, Map, Value};

use crate::error::McpError;
use crate::protocol::{CallToolResult, McpToolDefinition, Resource, ToolContent};

/// URI scheme prefix of skill resources.
pub const SKILL_URI_PREFIX: &str = "skill://";

const DOC_RESOURCE: &str = "skill.md";
const SCRIPT_KIND: &str = "script";
const CONFIG_KIND: &str = "config";

const MARKDOWN_MIME: &str = "text/markdown";
const SHELL_MIME: &str = "text/x-shellscript";
const YAML_MIME: &str = "application/yaml";

/// The input schema shared by every skill tool.
///
/// Skills interpret their own parameters, so the schema only names the
/// `action` and leaves `params` free-form.
pub fn tool_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "description": "The action to perform (e.g., create_cluster, add_nodes, etc.)"
            },
            "params": {
                "type": "object",
                "description": "Additional parameters for the action",
                "properties": {}
            }
        },
        "required": ["action"]
    })
}

/// Describe a skill as a tool.
pub fn skill_to_tool(skill: &Skill) -> McpToolDefinition {
    McpToolDefinition {
        name: skill.name.clone(),
        description: Some(skill.description.clone()),
        input_schema: tool_input_schema(),
    }
}

/// Build execution parameters from tool-call arguments.
///
/// `action` is kept at the top level, an object under `params` is
/// flattened one level, and every other argument is copied as-is, winning
/// over a flattened key of the same name. A non-object `params` is kept
/// under its own name.
pub fn arguments_to_params(arguments: Option<&Map<String, Value>>) -> ExecutionParams {
    let mut params = ExecutionParams::new();
    let Some(arguments) = arguments else {
        return params;
    };

    if let Some(action) = arguments.get("action") {
        params.insert("action", ParamValue::from(action.clone()));
    }

    match arguments.get("params") {
        Some(Value::Object(nested)) => {
            for (key, value) in nested {
                params.insert(key.clone(), ParamValue::from(value.clone()));
            }
        }
        Some(other) => {
            params.insert("params", ParamValue::from(other.clone()));
        }
        None => {}
    }

    for (key, value) in arguments {
        if key != "action" && key != "params" {
            params.insert(key.clone(), ParamValue::from(value.clone()));
        }
    }
    params
}

/// Tool-call arguments for forwarding `params` to a remote skill tool.
pub fn params_to_arguments(params: &ExecutionParams) -> Map<String, Value> {
    params.to_json_map()
}

/// Describe an execution result as a tool-call result.
///
/// A failed run is still a successful call: the result is flagged with
/// `isError` and carries the message and exit code.
pub fn result_to_tool_result(result: &ExecutionResult) -> CallToolResult {
    if result.success {
        return CallToolResult {
            content: vec![ToolContent::text(result.output.clone())],
            is_error: false,
        };
    }

    let message = result.error_message();
    CallToolResult {
        content: vec![ToolContent::text_with_data(
            format!("Error: {}", message),
            json!({
                "error": message,
                "exit_code": result.exit_code,
            }),
        )],
        is_error: true,
    }
}

/// Turn a remote tool-call result back into an execution result.
pub fn tool_result_to_result(result: &CallToolResult) -> ExecutionResult {
    let text = result.text();
    if !result.is_error {
        return ExecutionResult::success(text);
    }

    let exit_code = result
        .content
        .iter()
        .filter_map(ToolContent::data)
        .find_map(|data| data.get("exit_code").and_then(Value::as_i64))
        .and_then(|code| i32::try_from(code).ok())
        .unwrap_or(-1);

    let error = text.strip_prefix("Error: ").unwrap_or(&text).to_string();
    ExecutionResult::failure(FailureKind::Remote, error).with_exit_code(exit_code)
}

/// URI of a skill resource.
pub fn resource_uri(skill: &str, path: &str) -> String {
    format!("{}{}/{}", SKILL_URI_PREFIX, skill, path)
}

/// Resources advertised for `skill`.
///
/// The documentation resource is listed only when the skill has a
/// descriptor file; `scripts` are file names in the scripts directory.
pub fn skill_resources(skill: &Skill, scripts: &[String]) -> Vec<Resource> {
    let mut resources = Vec::with_capacity(scripts.len() + 1);

    if skill.descriptor_path.is_some() {
        resources.push(Resource {
            uri: resource_uri(&skill.name, DOC_RESOURCE),
            name: format!("{} Skill Documentation", skill.name),
            description: Some(skill.description.clone()),
            mime_type: Some(MARKDOWN_MIME.to_string()),
        });
    }

    let mut scripts: Vec<&String> = scripts
        .iter()
        .filter(|s| s.ends_with(&format!(".{}", SCRIPT_EXTENSION)))
        .collect();
    scripts.sort();
    for script in scripts {
        resources.push(Resource {
            uri: resource_uri(&skill.name, &format!("{}/{}", SCRIPT_KIND, script)),
            name: format!("{}: {}", skill.name, script),
            description: None,
            mime_type: Some(SHELL_MIME.to_string()),
        });
    }
    resources
}

/// A parsed `skill://<name>/<path>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillUri {
    /// Skill name.
    pub skill: String,
    /// Everything after the first `/`; may be empty.
    pub path: String,
}

/// What a skill URI points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// The skill's descriptor document.
    Documentation,
    /// A file in the scripts directory.
    Script(String),
    /// A file in the examples directory.
    Config(String),
}

impl ResourceKind {
    /// MIME type reported when the resource is read.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Documentation => MARKDOWN_MIME,
            Self::Script(_) => SHELL_MIME,
            Self::Config(_) => YAML_MIME,
        }
    }
}

impl SkillUri {
    /// Parse a URI, splitting on the first `/` after the prefix.
    pub fn parse(uri: &str) -> Result<Self, McpError> {
        let rest = uri
            .strip_prefix(SKILL_URI_PREFIX)
            .ok_or_else(|| McpError::InvalidUri(uri.to_string()))?;

        let (skill, path) = rest.split_once('/').unwrap_or((rest, ""));
        if skill.is_empty() {
            return Err(McpError::InvalidUri(uri.to_string()));
        }
        Ok(Self {
            skill: skill.to_string(),
            path: path.to_string(),
        })
    }

    /// Classify the path. Unrecognized shapes and unsafe file names are
    /// unknown resources.
    pub fn kind(&self) -> Result<ResourceKind, McpError> {
        let unknown = || McpError::UnknownResource(self.to_string());

        if self.path == DOC_RESOURCE {
            return Ok(ResourceKind::Documentation);
        }
        let (kind, file) = self.path.split_once('/').ok_or_else(unknown)?;
        if !is_plain_file_name(file) {
            return Err(unknown());
        }
        match kind {
            SCRIPT_KIND => Ok(ResourceKind::Script(file.to_string())),
            CONFIG_KIND => Ok(ResourceKind::Config(file.to_string())),
            _ => Err(unknown()),
        }
    }
}

impl std::fmt::Display for SkillUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", resource_uri(&self.skill, &self.path))
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kubekey() -> Skill {
        Skill::new("kubekey", "Deploy Kubernetes clusters", "/skills/kubekey")
    }

    #[test]
    fn test_skill_to_tool() {
        let tool = skill_to_tool(&kubekey());
        assert_eq!(tool.name, "kubekey");
        assert_eq!(tool.description.as_deref(), Some("Deploy Kubernetes clusters"));
        assert_eq!(tool.input_schema["required"], json!(["action"]));
        assert_eq!(tool.input_schema["properties"]["action"]["type"], "string");
        assert_eq!(tool.input_schema["properties"]["params"]["type"], "object");
    }

    #[test]
    fn test_arguments_flatten_params() {
        let arguments = json!({"action": "create", "params": {"foo": "bar"}});
        let params = arguments_to_params(arguments.as_object());

        let expected = ExecutionParams::new().with("action", "create").with("foo", "bar");
        assert_eq!(params, expected);
    }

    #[test]
    fn test_arguments_top_level_wins_and_passthrough() {
        let arguments = json!({
            "action": "add_nodes",
            "params": {"count": 2, "region": "eu"},
            "region": "us",
            "dry_run": true
        });
        let params = arguments_to_params(arguments.as_object());

        assert_eq!(params.get_str("region"), Some("us"));
        assert_eq!(params.get("count").and_then(ParamValue::as_i64), Some(2));
        assert_eq!(params.get("dry_run").and_then(ParamValue::as_bool), Some(true));
        assert!(!params.contains_key("params"));
    }

    #[test]
    fn test_arguments_edge_cases() {
        assert!(arguments_to_params(None).is_empty());
        assert!(arguments_to_params(json!({}).as_object()).is_empty());

        let params = arguments_to_params(json!({"params": "raw"}).as_object());
        assert_eq!(params.get_str("params"), Some("raw"));
    }

    #[test]
    fn test_success_result() {
        let result = result_to_tool_result(&ExecutionResult::success("cluster ready\n"));
        assert!(!result.is_error);
        assert_eq!(result.content, vec![ToolContent::text("cluster ready\n")]);
    }

    #[test]
    fn test_failure_result_carries_error_and_code() {
        let failed = ExecutionResult::failure(FailureKind::NonZeroExit, "boom").with_exit_code(2);
        let result = result_to_tool_result(&failed);

        assert!(result.is_error);
        assert_eq!(result.content.len(), 1);
        let text = result.content[0].as_text().unwrap();
        assert!(text.starts_with("Error: "));
        assert!(text.contains("boom"));
        let data = result.content[0].data().unwrap();
        assert_eq!(data["exit_code"], 2);

        let back = tool_result_to_result(&result);
        assert!(!back.success);
        assert_eq!(back.exit_code, 2);
        assert_eq!(back.failure, Some(FailureKind::Remote));
        assert!(back.error.contains("boom"));
    }

    #[test]
    fn test_remote_success_to_result() {
        let result = CallToolResult {
            content: vec![ToolContent::text("done")],
            is_error: false,
        };
        let back = tool_result_to_result(&result);
        assert!(back.success);
        assert_eq!(back.output, "done");
    }

    #[test]
    fn test_skill_resources() {
        let skill = kubekey().with_descriptor("/skills/kubekey/SKILL.md");
        let scripts = vec!["upgrade.sh".to_string(), "create_cluster.sh".to_string()];

        let resources = skill_resources(&skill, &scripts);
        let uris: Vec<_> = resources.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "skill://kubekey/skill.md",
                "skill://kubekey/script/create_cluster.sh",
                "skill://kubekey/script/upgrade.sh",
            ]
        );
        assert_eq!(resources[0].name, "kubekey Skill Documentation");
        assert_eq!(resources[1].name, "kubekey: create_cluster.sh");
        assert_eq!(resources[1].mime_type.as_deref(), Some("text/x-shellscript"));

        assert_eq!(skill_resources(&kubekey(), &scripts).len(), 2);
    }

    #[test]
    fn test_parse_uri() {
        let uri = SkillUri::parse("skill://kubekey/script/create_cluster.sh").unwrap();
        assert_eq!(uri.skill, "kubekey");
        assert_eq!(uri.path, "script/create_cluster.sh");
        assert_eq!(uri.kind().unwrap(), ResourceKind::Script("create_cluster.sh".into()));
        assert_eq!(uri.to_string(), "skill://kubekey/script/create_cluster.sh");

        let bare = SkillUri::parse("skill://kubekey").unwrap();
        assert_eq!(bare.path, "");

        assert!(matches!(
            SkillUri::parse("file:///etc/passwd"),
            Err(McpError::InvalidUri(_))
        ));
        assert!(matches!(SkillUri::parse("skill:///x"), Err(McpError::InvalidUri(_))));
    }

    #[test]
    fn test_uri_kinds() {
        let kind = |uri: &str| SkillUri::parse(uri).unwrap().kind();

        assert_eq!(kind("skill://k/skill.md").unwrap(), ResourceKind::Documentation);
        assert_eq!(
            kind("skill://k/config/cluster.yaml").unwrap(),
            ResourceKind::Config("cluster.yaml".into())
        );
        for bad in [
            "skill://k",
            "skill://k/other/file",
            "skill://k/script/../SKILL.md",
            "skill://k/script/a/b.sh",
            "skill://k/script/",
        ] {
            assert!(
                matches!(kind(bad), Err(McpError::UnknownResource(_))),
                "accepted: {}",
                bad
            );
        }
    }
}
