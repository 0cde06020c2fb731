//! WASM bindings for story-flow — powers browser hosts.
//!
//! String-in/string-out API: the host hands over the project JSON once,
//! then drives the cursor and receives outcomes, text, and choices as JSON
//! payloads.

use wasm_bindgen::prelude::*;

use story_flow::core::runtime::Runtime;
use story_flow::core::walker::StepOutcome;
use story_flow::schema::node::NodeType;

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------

#[derive(serde::Serialize)]
struct OutcomeInfo {
    status: String,
    node_id: Option<String>,
    node_type: Option<String>,
    actor: Option<String>,
}

#[derive(serde::Serialize)]
struct ChoiceInfo {
    element_id: String,
    text: String,
    not_translated: bool,
}

#[derive(serde::Serialize)]
struct TextInfo {
    text: String,
    not_translated: bool,
}

/// A playable story session over one loaded project.
#[wasm_bindgen]
pub struct StoryPlayer {
    runtime: Runtime,
}

#[wasm_bindgen]
impl StoryPlayer {
    /// Load a project from its JSON source document.
    #[wasm_bindgen(constructor)]
    pub fn new(project_json: &str, seed: u64) -> Result<StoryPlayer, JsValue> {
        let runtime = Runtime::builder()
            .seed(seed)
            .with_source(project_json)
            .build()
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        Ok(StoryPlayer { runtime })
    }

    /// Place the cursor on a flow's Start (default flow when empty).
    pub fn start(&mut self, flow_name: Option<String>) -> bool {
        self.runtime.start(None, flow_name.as_deref())
    }

    pub fn restart(&mut self) -> bool {
        self.runtime.restart()
    }

    pub fn set_locale(&mut self, locale: &str) {
        self.runtime.set_locale(locale);
    }

    /// Advance the cursor; `element_id` names the chosen alternative when
    /// the current node is a Choice. Returns a JSON outcome object.
    pub fn next(&mut self, element_id: Option<String>) -> String {
        let outcome = self.runtime.next_node(element_id.as_deref());
        let info = match outcome {
            StepOutcome::Emitted(node_id) => OutcomeInfo {
                status: "emitted".to_string(),
                node_type: self
                    .runtime
                    .get_node(Some(&node_id), None)
                    .map(|n| type_label(n.node_type).to_string()),
                actor: self
                    .runtime
                    .get_node_actor(Some(&node_id))
                    .map(|a| a.name.clone()),
                node_id: Some(node_id),
            },
            StepOutcome::Ended => OutcomeInfo {
                status: "ended".to_string(),
                node_id: None,
                node_type: None,
                actor: None,
            },
            StepOutcome::BadJump { node_id, .. } => OutcomeInfo {
                status: "bad_jump".to_string(),
                node_id: Some(node_id),
                node_type: None,
                actor: None,
            },
        };
        serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
    }

    /// Rendered text of the current node (a Choice node yields its header),
    /// as a JSON object with the localization flag.
    pub fn current_text(&mut self) -> String {
        match self.runtime.get_parsed_text(None, false) {
            Some(parsed) => serde_json::to_string(&TextInfo {
                text: parsed.text,
                not_translated: parsed.not_translated,
            })
            .unwrap_or_else(|_| "null".to_string()),
            None => "null".to_string(),
        }
    }

    /// Currently offerable alternatives of the current Choice node, as a
    /// JSON array.
    pub fn choices(&mut self) -> String {
        let choices: Vec<ChoiceInfo> = self
            .runtime
            .get_available_choices(None)
            .into_iter()
            .map(|c| ChoiceInfo {
                element_id: c.element_id,
                text: c.text,
                not_translated: c.not_translated,
            })
            .collect();
        serde_json::to_string(&choices).unwrap_or_else(|_| "[]".to_string())
    }

    /// Names of all flows, as a JSON array.
    pub fn flows(&self) -> String {
        let names: Vec<&str> = self
            .runtime
            .get_flows()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
    }
}

fn type_label(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Start => "start",
        NodeType::Text => "text",
        NodeType::Note => "note",
        NodeType::Choice => "choice",
        NodeType::Variables => "variables",
        NodeType::Condition => "condition",
        NodeType::FailCondition => "fail_condition",
        NodeType::Random => "random",
        NodeType::Sequence => "sequence",
        NodeType::JumpToNode => "jump_to_node",
        NodeType::Layout => "layout",
        NodeType::SubFlow => "sub_flow",
    }
}
