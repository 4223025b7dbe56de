//! Tool registry and dispatch.
//!
//! Tools are registered once at startup into a flat namespace shared by
//! canonical names and aliases; registration fails fast on any collision.
//! Dispatch never raises: unknown tools and handler panics come back as
//! error strings, which is what the LLM sees.

pub mod basic;
pub mod memory_tools;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// Handler signature: every tool validates its own arguments.
pub type ToolHandler = Arc<dyn Fn(&Map<String, Value>) -> String + Send + Sync>;

/// Registration descriptor for one tool.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub category: String,
    pub example: Option<String>,
    /// Optional JSON-schema fragment describing the argument map.
    pub parameters: Option<Value>,
    pub handler: ToolHandler,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            aliases: Vec::new(),
            category: "General".to_string(),
            example: None,
            parameters: None,
            handler,
        }
    }

    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// A tool intent extracted from LLM output. Lives for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool name '{0}' is already registered")]
    NameTaken(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeFormat {
    Text,
    Markdown,
    Json,
}

/// Registry of named tools with alias resolution.
pub struct ToolRouter {
    /// canonical name → spec
    tools: RwLock<HashMap<String, Arc<ToolSpec>>>,
    /// any name or alias → canonical name
    names: RwLock<HashMap<String, String>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Every name and alias must be unused; on collision
    /// nothing is registered.
    pub fn register(&self, spec: ToolSpec) -> Result<(), ToolError> {
        let mut names = self.names.write().unwrap();
        let mut all: Vec<&str> = vec![spec.name.as_str()];
        all.extend(spec.aliases.iter().map(String::as_str));
        for name in &all {
            if names.contains_key(*name) {
                return Err(ToolError::NameTaken(name.to_string()));
            }
        }
        for name in &all {
            names.insert(name.to_string(), spec.name.clone());
        }
        info!(tool = %spec.name, aliases = spec.aliases.len(), "registered tool");
        self.tools
            .write()
            .unwrap()
            .insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Resolve a name or alias to its canonical tool name.
    pub fn canonical(&self, name: &str) -> Option<String> {
        self.names.read().unwrap().get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.names.read().unwrap().contains_key(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    /// Dispatch by name or alias. Never raises: unknown tools and handler
    /// panics are reported in the returned string.
    pub fn execute(&self, name: &str, args: &Map<String, Value>) -> String {
        let Some(canonical) = self.canonical(name) else {
            warn!(tool = name, "unknown tool requested");
            return format!("Error: Unknown tool '{name}'");
        };
        let Some(spec) = self.tools.read().unwrap().get(&canonical).cloned() else {
            return format!("Error: Unknown tool '{name}'");
        };

        debug!(tool = %canonical, "executing tool");
        let handler = Arc::clone(&spec.handler);
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(args))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "panic".to_string());
                warn!(tool = %canonical, message, "tool handler panicked");
                format!("Error executing tool '{canonical}': {message}")
            }
        }
    }

    /// Render the catalog for prompts or observers.
    pub fn describe_tools(&self, category: Option<&str>, format: DescribeFormat) -> String {
        let tools = self.tools.read().unwrap();
        let mut specs: Vec<&Arc<ToolSpec>> = tools
            .values()
            .filter(|s| category.map_or(true, |c| s.category.eq_ignore_ascii_case(c)))
            .collect();
        specs.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));

        match format {
            DescribeFormat::Json => {
                let list: Vec<Value> = specs
                    .iter()
                    .map(|s| {
                        json!({
                            "name": s.name,
                            "description": s.description,
                            "aliases": s.aliases,
                            "category": s.category,
                            "example": s.example,
                            "parameters": s.parameters,
                        })
                    })
                    .collect();
                serde_json::to_string_pretty(&list).unwrap_or_else(|_| "[]".to_string())
            }
            DescribeFormat::Markdown => {
                let mut out = String::from("## Available tools\n");
                let mut current = "";
                for s in specs {
                    if s.category != current {
                        out.push_str(&format!("\n### {}\n", s.category));
                        current = &s.category;
                    }
                    out.push_str(&format!("- **{}** — {}\n", s.name, s.description));
                    if let Some(example) = &s.example {
                        out.push_str(&format!("  - e.g. \"{example}\"\n"));
                    }
                }
                out
            }
            DescribeFormat::Text => {
                let mut out = String::from("Available tools:\n");
                for s in specs {
                    out.push_str(&format!("- {}: {}\n", s.name, s.description));
                }
                out
            }
        }
    }

    /// Catalog rendering injected into the pass-1 system prompt.
    pub fn prompt_descriptions(&self) -> String {
        self.describe_tools(None, DescribeFormat::Text)
    }

    /// Extract an embedded tool-call object from free text.
    ///
    /// Scans for balanced `{…}` substrings left to right; the first one
    /// that parses to a map holding `tool_call: {name, args}` wins.
    /// Anything else — no braces, malformed JSON, or JSON without a
    /// `tool_call` key — yields `None`.
    pub fn extract_tool_call(&self, text: &str) -> Option<ToolCall> {
        let mut search_from = 0;
        while let Some(offset) = text[search_from..].find('{') {
            let start = search_from + offset;
            let Some(candidate) = balanced_object(&text[start..]) else {
                search_from = start + 1;
                continue;
            };

            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
                if let Some(Value::Object(call)) = map.get("tool_call") {
                    let name = call.get("name").and_then(Value::as_str)?.to_string();
                    let args = match call.get("args") {
                        Some(Value::Object(args)) => args.clone(),
                        _ => Map::new(),
                    };
                    debug!(tool = %name, "extracted tool call");
                    return Some(ToolCall { name, args });
                }
                // A parsed object without tool_call is plain content, but
                // a later object in the same text may still be the call.
            }
            search_from = start + candidate.len();
        }
        None
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// The shortest balanced `{…}` prefix of `text`, string-literal aware.
fn balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes.first(), Some(&b'{'));
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// First balanced JSON object found anywhere in `text`, if any.
/// Shared with the structured-output path of the LLM contract.
pub fn first_json_object(text: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        match balanced_object(&text[start..]) {
            Some(candidate) if serde_json::from_str::<Value>(candidate).is_ok() => {
                return Some(candidate.to_string());
            }
            Some(candidate) => search_from = start + candidate.len(),
            None => search_from = start + 1,
        }
    }
    None
}
