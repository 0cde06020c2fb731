/// Graph vertex model — nodes, their elements, and typed connections.

use serde::{Deserialize, Serialize};

/// Node classification. The type determines which outgoing connection the
/// walker picks and whether the node is emitted to the host at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Start,
    Text,
    Note,
    Choice,
    Variables,
    Condition,
    FailCondition,
    Random,
    Sequence,
    JumpToNode,
    Layout,
    SubFlow,
}

impl NodeType {
    /// Internal nodes are walked through without being emitted; the walker
    /// keeps stepping until it reaches a node the host should present.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            NodeType::Start
                | NodeType::Note
                | NodeType::Sequence
                | NodeType::Random
                | NodeType::Variables
                | NodeType::Layout
                | NodeType::SubFlow
                | NodeType::JumpToNode
                | NodeType::Condition
        )
    }
}

/// Selection policy over a node's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CycleType {
    /// Linear, sticks on the last element once exhausted.
    List,
    /// Linear, wraps around after the last element.
    Loop,
    /// Uniform with replacement.
    Random,
    /// Uniform without replacement, reset on exhaustion.
    SmartRandom,
    /// No selection policy (e.g. Choice nodes, where the host picks).
    #[default]
    None,
}

/// Edge classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionKind {
    #[default]
    Default,
    /// The call edge of a SubFlow node.
    SubFlow,
    /// Taken when a Condition/Sequence/Choice runs out of candidates.
    FailCondition,
}

/// Target of a JumpToNode node. May cross flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpTarget {
    pub flow_id: String,
    pub node_id: String,
}

/// One translation of an element's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedContent {
    pub locale_code: String,
    pub text: String,
}

/// A child of a node carrying localized text: one per alternative for
/// Choice nodes, one per variant for Text/Sequence nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeElement {
    pub id: String,
    pub node_id: String,
    pub kind: Option<String>,
    pub localized_contents: Vec<LocalizedContent>,
}

impl NodeElement {
    /// The stored content for an exact locale code, if any.
    pub fn content_for(&self, locale: &str) -> Option<&LocalizedContent> {
        self.localized_contents
            .iter()
            .find(|c| c.locale_code == locale)
    }
}

/// A directed edge. For per-element dispatch (Choice/Condition/Sequence)
/// the edge is bound to the element it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub from_node_id: String,
    pub to: String,
    pub node_element_id: Option<String>,
    pub kind: ConnectionKind,
}

/// A vertex of the story graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub permalink: Option<String>,
    pub node_type: NodeType,
    pub actor_id: Option<String>,
    /// Metadata value ids attached to this node.
    pub metadata: Vec<String>,
    pub elements: Vec<NodeElement>,
    pub connections: Vec<Connection>,
    pub cycle_type: CycleType,
    pub translatable: bool,
    pub jump_to: Option<JumpTarget>,
    pub image: Option<String>,
    /// Prompt element of a Choice node.
    pub header: Option<NodeElement>,
}

impl Node {
    /// First outgoing non-fail connection, used by single-exit node types.
    pub fn first_connection(&self) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.kind != ConnectionKind::FailCondition)
    }

    /// The fail connection, if the author attached one.
    pub fn fail_connection(&self) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.kind == ConnectionKind::FailCondition)
    }

    /// The non-fail connection bound to a given element.
    pub fn connection_for_element(&self, element_id: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| {
            c.kind != ConnectionKind::FailCondition
                && c.node_element_id.as_deref() == Some(element_id)
        })
    }

    /// Look up an element of this node by id.
    pub fn element(&self, element_id: &str) -> Option<&NodeElement> {
        self.elements.iter().find(|e| e.id == element_id)
    }
}
