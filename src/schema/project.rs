/// Project model — the typed, immutable representation of a loaded story
/// project, plus parsing of the external JSON source document.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::node::{
    Connection, ConnectionKind, CycleType, JumpTarget, LocalizedContent, Node, NodeElement,
    NodeType,
};
use super::value::Value;

/// Project source format version this runtime targets. A mismatch on load
/// is logged, not fatal.
pub const API_VERSION: &str = "1.4";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unparseable API version: {0:?}")]
    BadVersion(String),
    #[error("malformed project: {0}")]
    Malformed(String),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A locale offered by the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleInfo {
    pub code: String,
    pub description: String,
}

/// Ordered grouping of flows; the first group's first flow is the default
/// entry point of the whole project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGroup {
    pub id: String,
    pub name: String,
    pub flow_ids: Vec<String>,
}

/// A named directed subgraph with a single Start node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub nodes: Vec<Node>,
}

impl Flow {
    /// The flow's entry node.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.node_type == NodeType::Start)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// A speaking (or narrating) character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub uid: String,
    pub name: String,
    pub is_narrator: bool,
}

/// Declared type of a project variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarType {
    Bool,
    String,
    Int,
    Float,
    /// Fixed-precision display number; loads as a float.
    Fixed,
    /// Display-only divider in the editor; never reaches the store.
    Separator,
}

/// A project variable declaration, value already coerced to its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    pub var_type: VarType,
    pub value: Value,
}

/// A localized UI string, reusing the element content shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub localized_contents: Vec<LocalizedContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataValue {
    pub id: String,
    pub uid: String,
    pub value: String,
    pub icon: Option<String>,
    pub metadata_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub uid: String,
    pub name: String,
    pub icon: Option<String>,
    pub values: Vec<MetadataValue>,
}

/// The whole loaded project. Immutable at runtime: per-story mutable state
/// (visitation, variation rotation, variables) lives in the `Runtime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub api_version: String,
    pub locale: String,
    pub main_locale: String,
    pub available_locales: Vec<LocaleInfo>,
    pub flow_groups: Vec<FlowGroup>,
    pub flows: Vec<Flow>,
    pub actors: Vec<Actor>,
    pub variables: Vec<Variable>,
    pub labels: Vec<Label>,
    pub metadata: Vec<Metadata>,
}

impl Project {
    pub fn flow(&self, flow_id: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.id == flow_id)
    }

    /// Flow lookup by id, name, or slug — whichever matches first.
    pub fn flow_by_any(&self, key: &str) -> Option<&Flow> {
        self.flows
            .iter()
            .find(|f| f.id == key || f.name == key || f.slug == key)
    }

    /// The default flow: the first flow of the first flow group, falling
    /// back to the first declared flow.
    pub fn default_flow(&self) -> Option<&Flow> {
        self.flow_groups
            .first()
            .and_then(|g| g.flow_ids.first())
            .and_then(|id| self.flow(id))
            .or_else(|| self.flows.first())
    }

    /// Locate a node anywhere in the project, preferring the given flow.
    pub fn find_node(&self, node_id: &str, prefer_flow: Option<&str>) -> Option<(&Flow, &Node)> {
        if let Some(flow_id) = prefer_flow {
            if let Some(flow) = self.flow(flow_id) {
                if let Some(node) = flow.node(node_id) {
                    return Some((flow, node));
                }
            }
        }
        self.flows
            .iter()
            .find_map(|f| f.node(node_id).map(|n| (f, n)))
    }

    /// Locate an element and its owning node anywhere in the project.
    pub fn find_element(&self, element_id: &str) -> Option<(&Node, &NodeElement)> {
        self.flows.iter().find_map(|f| {
            f.nodes.iter().find_map(|n| {
                n.elements
                    .iter()
                    .chain(n.header.iter())
                    .find(|e| e.id == element_id)
                    .map(|e| (n, e))
            })
        })
    }

    pub fn actor(&self, actor_id: &str) -> Option<&Actor> {
        self.actors.iter().find(|a| a.id == actor_id)
    }

    pub fn actor_by_uid(&self, uid: &str) -> Option<&Actor> {
        self.actors.iter().find(|a| a.uid == uid)
    }

    pub fn label(&self, key: &str) -> Option<&Label> {
        self.labels.iter().find(|l| l.key == key)
    }

    /// Resolve a metadata value id to the value and its defining metadata.
    pub fn metadata_value(&self, value_id: &str) -> Option<(&Metadata, &MetadataValue)> {
        self.metadata.iter().find_map(|m| {
            m.values
                .iter()
                .find(|v| v.id == value_id)
                .map(|v| (m, v))
        })
    }

    /// Parse a project from its JSON source document.
    pub fn from_json(source: &str) -> Result<Project, LoadError> {
        let raw: RawProject = serde_json::from_str(source)?;
        raw.into_project()
    }
}

// ---------------------------------------------------------------------------
// JSON source intermediates — the editor's document uses a different shape
// (underscore-prefixed keys, stringly-typed enums) than the internal types.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawProject {
    #[serde(rename = "_apiVersion")]
    api_version: Option<String>,
    #[serde(rename = "_name", default)]
    name: String,
    #[serde(rename = "_locale")]
    locale: Option<String>,
    #[serde(rename = "_mainLocale")]
    main_locale: Option<RawMainLocale>,
    #[serde(rename = "_availableLocale", default)]
    available_locale: Vec<RawLocaleInfo>,
    #[serde(rename = "_flowGroups", default)]
    flow_groups: Vec<RawFlowGroup>,
    #[serde(rename = "_flows")]
    flows: Option<Vec<RawFlow>>,
    #[serde(rename = "_actors", default)]
    actors: Vec<RawActor>,
    #[serde(rename = "_variables", default)]
    variables: Vec<RawVariable>,
    #[serde(rename = "_labels", default)]
    labels: Vec<RawLabel>,
    #[serde(rename = "_metadata", default)]
    metadata: Vec<RawMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawMainLocale {
    #[serde(rename = "_code")]
    code: String,
}

#[derive(Debug, Deserialize)]
struct RawLocaleInfo {
    #[serde(rename = "_code")]
    code: String,
    #[serde(rename = "_desc", default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
struct RawFlowGroup {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_name", default)]
    name: String,
    #[serde(rename = "_flowIds", default)]
    flow_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFlow {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_name", default)]
    name: String,
    #[serde(rename = "_slug", default)]
    slug: String,
    #[serde(rename = "_nodes", default)]
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_type")]
    node_type: String,
    #[serde(rename = "_permalink")]
    permalink: Option<String>,
    #[serde(rename = "_actorId")]
    actor_id: Option<String>,
    #[serde(rename = "_cycleType")]
    cycle_type: Option<String>,
    #[serde(rename = "_translatable", default = "default_true")]
    translatable: bool,
    #[serde(rename = "_metadata", default)]
    metadata: Vec<String>,
    #[serde(rename = "_elements", default)]
    elements: Vec<RawElement>,
    #[serde(rename = "_connections", default)]
    connections: Vec<RawConnection>,
    #[serde(rename = "_jumpTo")]
    jump_to: Option<RawJumpTarget>,
    #[serde(rename = "_image")]
    image: Option<String>,
    #[serde(rename = "_header")]
    header: Option<RawElement>,
}

#[derive(Debug, Deserialize)]
struct RawElement {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_nodeId", default)]
    node_id: String,
    #[serde(rename = "_type")]
    kind: Option<String>,
    #[serde(rename = "_localizedContents", default)]
    localized_contents: Vec<RawLocalizedContent>,
}

#[derive(Debug, Deserialize)]
struct RawLocalizedContent {
    #[serde(rename = "_localeCode")]
    locale_code: String,
    #[serde(rename = "_text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    #[serde(rename = "_to")]
    to: String,
    #[serde(rename = "_type")]
    kind: Option<String>,
    #[serde(rename = "_nodeElementId")]
    node_element_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJumpTarget {
    #[serde(rename = "_flowId")]
    flow_id: String,
    #[serde(rename = "_nodeId")]
    node_id: String,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_uid", default)]
    uid: String,
    #[serde(rename = "_name", default)]
    name: String,
    #[serde(rename = "_isNarrator", default)]
    is_narrator: bool,
}

#[derive(Debug, Deserialize)]
struct RawVariable {
    #[serde(rename = "_key")]
    key: String,
    #[serde(rename = "_value", default)]
    value: serde_json::Value,
    #[serde(rename = "_type", default)]
    var_type: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    #[serde(rename = "_key")]
    key: String,
    #[serde(rename = "_localizedContents", default)]
    localized_contents: Vec<RawLocalizedContent>,
}

#[derive(Debug, Deserialize)]
struct RawMetadataValue {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_uid", default)]
    uid: String,
    #[serde(rename = "_value", default)]
    value: String,
    #[serde(rename = "_icon")]
    icon: Option<String>,
    #[serde(rename = "_metadataId", default)]
    metadata_id: String,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_uid", default)]
    uid: String,
    #[serde(rename = "_name", default)]
    name: String,
    #[serde(rename = "_icon")]
    icon: Option<String>,
    #[serde(rename = "_values", default)]
    values: Vec<RawMetadataValue>,
}

fn default_true() -> bool {
    true
}

impl RawProject {
    fn into_project(self) -> Result<Project, LoadError> {
        let api_version = match self.api_version {
            Some(v) => {
                check_version(&v)?;
                v
            }
            None => return Err(LoadError::MissingField("_apiVersion")),
        };
        let main_locale = self
            .main_locale
            .ok_or(LoadError::MissingField("_mainLocale"))?
            .code;
        let flows = self.flows.ok_or(LoadError::MissingField("_flows"))?;

        Ok(Project {
            name: self.name,
            api_version,
            locale: self.locale.unwrap_or_else(|| main_locale.clone()),
            main_locale,
            available_locales: self
                .available_locale
                .into_iter()
                .map(|l| LocaleInfo {
                    code: l.code,
                    description: l.desc,
                })
                .collect(),
            flow_groups: self
                .flow_groups
                .into_iter()
                .map(|g| FlowGroup {
                    id: g.id,
                    name: g.name,
                    flow_ids: g.flow_ids,
                })
                .collect(),
            flows: flows
                .into_iter()
                .map(|f| {
                    let nodes = f
                        .nodes
                        .into_iter()
                        .map(convert_node)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Flow {
                        id: f.id,
                        name: f.name,
                        slug: f.slug,
                        nodes,
                    })
                })
                .collect::<Result<Vec<_>, LoadError>>()?,
            actors: self
                .actors
                .into_iter()
                .map(|a| Actor {
                    id: a.id,
                    uid: a.uid,
                    name: a.name,
                    is_narrator: a.is_narrator,
                })
                .collect(),
            variables: self
                .variables
                .into_iter()
                .map(convert_variable)
                .collect::<Result<Vec<_>, _>>()?,
            labels: self
                .labels
                .into_iter()
                .map(|l| Label {
                    key: l.key,
                    localized_contents: convert_contents(l.localized_contents),
                })
                .collect(),
            metadata: self
                .metadata
                .into_iter()
                .map(|m| Metadata {
                    id: m.id,
                    uid: m.uid,
                    name: m.name,
                    icon: m.icon,
                    values: m
                        .values
                        .into_iter()
                        .map(|v| MetadataValue {
                            id: v.id,
                            uid: v.uid,
                            value: v.value,
                            icon: v.icon,
                            metadata_id: v.metadata_id,
                        })
                        .collect(),
                })
                .collect(),
        })
    }
}

/// Version strings are `major.minor`. Anything else is a load error; a
/// well-formed but different version only warns.
fn check_version(version: &str) -> Result<(), LoadError> {
    let well_formed = {
        let mut parts = version.split('.');
        let major = parts.next().map(|p| p.parse::<u32>().is_ok());
        let minor = parts.next().map(|p| p.parse::<u32>().is_ok());
        major == Some(true) && minor == Some(true) && parts.next().is_none()
    };
    if !well_formed {
        return Err(LoadError::BadVersion(version.to_string()));
    }
    if version != API_VERSION {
        tracing::warn!(
            found = version,
            expected = API_VERSION,
            "project API version differs from runtime; continuing"
        );
    }
    Ok(())
}

fn convert_node(raw: RawNode) -> Result<Node, LoadError> {
    let node_type = match raw.node_type.as_str() {
        "Start" => NodeType::Start,
        "Text" => NodeType::Text,
        "Note" => NodeType::Note,
        "Choice" => NodeType::Choice,
        "Variables" => NodeType::Variables,
        "Condition" => NodeType::Condition,
        "FailCondition" => NodeType::FailCondition,
        "Random" => NodeType::Random,
        "Sequence" => NodeType::Sequence,
        "JumpToNode" => NodeType::JumpToNode,
        "Layout" => NodeType::Layout,
        "SubFlow" => NodeType::SubFlow,
        other => {
            return Err(LoadError::Malformed(format!(
                "node '{}' has unknown type '{}'",
                raw.id, other
            )))
        }
    };

    let cycle_type = match raw.cycle_type.as_deref() {
        Some("List") => CycleType::List,
        Some("Loop") => CycleType::Loop,
        Some("Random") => CycleType::Random,
        Some("SmartRandom") => CycleType::SmartRandom,
        _ => CycleType::None,
    };

    let node_id = raw.id;
    Ok(Node {
        permalink: raw.permalink,
        node_type,
        actor_id: raw.actor_id,
        metadata: raw.metadata,
        elements: raw
            .elements
            .into_iter()
            .map(|e| convert_element(e, &node_id))
            .collect(),
        connections: raw
            .connections
            .into_iter()
            .map(|c| Connection {
                from_node_id: node_id.clone(),
                to: c.to,
                node_element_id: c.node_element_id,
                kind: match c.kind.as_deref() {
                    Some("SubFlow") => ConnectionKind::SubFlow,
                    Some("FailCondition") => ConnectionKind::FailCondition,
                    _ => ConnectionKind::Default,
                },
            })
            .collect(),
        cycle_type,
        translatable: raw.translatable,
        jump_to: raw.jump_to.map(|j| JumpTarget {
            flow_id: j.flow_id,
            node_id: j.node_id,
        }),
        image: raw.image,
        header: raw.header.map(|h| convert_element(h, &node_id)),
        id: node_id,
    })
}

fn convert_element(raw: RawElement, node_id: &str) -> NodeElement {
    NodeElement {
        id: raw.id,
        node_id: if raw.node_id.is_empty() {
            node_id.to_string()
        } else {
            raw.node_id
        },
        kind: raw.kind,
        localized_contents: convert_contents(raw.localized_contents),
    }
}

fn convert_contents(raw: Vec<RawLocalizedContent>) -> Vec<LocalizedContent> {
    raw.into_iter()
        .map(|c| LocalizedContent {
            locale_code: c.locale_code,
            text: c.text,
        })
        .collect()
}

/// Coerce a declared variable's JSON value to its declared type. The editor
/// serializes most values as strings ("true", "42"); native JSON scalars
/// are accepted too.
fn convert_variable(raw: RawVariable) -> Result<Variable, LoadError> {
    let var_type = match raw.var_type.as_str() {
        "bool" => VarType::Bool,
        "int" => VarType::Int,
        "float" => VarType::Float,
        "fixed" => VarType::Fixed,
        "separator" => VarType::Separator,
        _ => VarType::String,
    };

    let value = match var_type {
        VarType::Separator => Value::Str(String::new()),
        VarType::Bool => match &raw.value {
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::String(s) => Value::Bool(s.trim().eq_ignore_ascii_case("true")),
            other => {
                return Err(LoadError::Malformed(format!(
                    "variable '{}': expected bool, got {}",
                    raw.key, other
                )))
            }
        },
        VarType::Int => match &raw.value {
            serde_json::Value::Number(n) if n.is_i64() => Value::Int(n.as_i64().unwrap_or(0)),
            serde_json::Value::String(s) => Value::Int(s.trim().parse().map_err(|_| {
                LoadError::Malformed(format!("variable '{}': bad int {:?}", raw.key, s))
            })?),
            other => {
                return Err(LoadError::Malformed(format!(
                    "variable '{}': expected int, got {}",
                    raw.key, other
                )))
            }
        },
        VarType::Float | VarType::Fixed => match &raw.value {
            serde_json::Value::Number(n) => Value::Float(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Float(s.trim().parse().map_err(|_| {
                LoadError::Malformed(format!("variable '{}': bad float {:?}", raw.key, s))
            })?),
            other => {
                return Err(LoadError::Malformed(format!(
                    "variable '{}': expected float, got {}",
                    raw.key, other
                )))
            }
        },
        VarType::String => match &raw.value {
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        },
    };

    Ok(Variable {
        key: raw.key,
        var_type,
        value,
    })
}
