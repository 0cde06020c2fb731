/// The runtime facade — cursor lifecycle, the public query surface, and the
/// per-story mutable state. Built via `Runtime::builder()`.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::eval::VarStore;
use crate::core::locale::{resolve_contents, resolve_element};
use crate::core::selector::select_element;
use crate::core::state::ElementStates;
use crate::core::template::{self, RenderCtx};
use crate::core::variation::VariationRegistry;
use crate::schema::node::{Node, NodeElement, NodeType};
use crate::schema::project::{Actor, Flow, Label, LoadError, Metadata, MetadataValue, Project};

/// Reserved cursor value marking a finished traversal.
pub const THE_END: &str = "THE END";

/// A pending sub-flow return address: the SubFlow node that made the call,
/// in the flow it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubFlowFrame {
    pub flow_id: String,
    pub node_id: String,
}

/// Rendered content handed to the host, with the localization warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedText {
    pub text: String,
    pub not_translated: bool,
}

/// One presentable alternative of a Choice node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceEntry {
    pub element_id: String,
    pub text: String,
    pub not_translated: bool,
}

/// A story cursor over a loaded project. All mutable play state (variables,
/// visitation, variation rotation, the sub-flow stack) lives here; the
/// project itself is never written to.
pub struct Runtime {
    pub(crate) project: Project,
    pub(crate) locale: String,
    pub(crate) selected_flow_id: String,
    pub(crate) selected_node_id: Option<String>,
    pub(crate) store: VarStore,
    pub(crate) variations: VariationRegistry,
    pub(crate) states: ElementStates,
    pub(crate) sub_flows: Vec<SubFlowFrame>,
    pub(crate) is_jumping: bool,
    pub(crate) previous_node_id: Option<String>,
    pub(crate) rng: StdRng,
    pub(crate) max_walk_depth: usize,
}

/// Builder for constructing a `Runtime`.
pub struct RuntimeBuilder {
    seed: Option<u64>,
    locale: Option<String>,
    max_walk_depth: usize,
    flow_name: Option<String>,
    project: Option<Project>,
    source: Option<String>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder {
            seed: None,
            locale: None,
            max_walk_depth: 1000,
            flow_name: None,
            project: None,
            source: None,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Swap in a project and reset every piece of play state: visitation
    /// flags, globals reseeded from the declarations, locals dropped, the
    /// sub-flow stack emptied, and the cursor placed on the Start node of
    /// the chosen (or default) flow. The variation registry is built only
    /// when empty, so rotation state survives a same-project reload.
    pub fn load(&mut self, project: Project, flow_name: Option<&str>) -> Result<(), LoadError> {
        self.project = project;
        self.locale = self.project.locale.clone();
        self.states.clear();
        self.store.seed_globals(&self.project.variables);
        self.store.clear_locals();
        self.sub_flows.clear();
        self.is_jumping = false;
        self.previous_node_id = None;
        if self.variations.is_empty() {
            self.variations = VariationRegistry::build(&self.project);
        }
        self.start(None, flow_name);
        Ok(())
    }

    /// Parse a JSON source document and load it.
    pub fn load_from_source(&mut self, source: &str, flow_name: Option<&str>) -> Result<(), LoadError> {
        let project = Project::from_json(source)?;
        self.load(project, flow_name)
    }

    /// Place the cursor: on `node_id` when given, otherwise on the Start
    /// node of the named (or default) flow. Returns false when the flow or
    /// its Start cannot be found.
    pub fn start(&mut self, node_id: Option<&str>, flow_name: Option<&str>) -> bool {
        let flow = match flow_name {
            Some(name) => self.project.flow_by_any(name),
            None => self.project.default_flow(),
        };
        let Some(flow) = flow else {
            return false;
        };
        self.selected_flow_id = flow.id.clone();
        self.is_jumping = false;
        self.selected_node_id = node_id
            .map(String::from)
            .or_else(|| flow.start_node().map(|n| n.id.clone()));
        self.selected_node_id.is_some()
    }

    /// Rewind the cursor to the current flow's Start. Nothing else resets.
    pub fn restart(&mut self) -> bool {
        let start_id = self
            .project
            .flow(&self.selected_flow_id)
            .and_then(|f| f.start_node())
            .map(|n| n.id.clone());
        self.is_jumping = false;
        self.selected_node_id = start_id;
        self.selected_node_id.is_some()
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Render an element's text for presentation. With no element the
    /// current node renders: a Choice node yields its header prompt, any
    /// other node picks an element through its cycle policy (advancing it).
    pub fn get_parsed_text(&mut self, element_id: Option<&str>, force_eval: bool) -> Option<ParsedText> {
        match element_id {
            Some(id) => {
                let (node, element) = self.project.find_element(id)?;
                let (node, element) = (node.clone(), element.clone());
                self.render_resolved(&element, &node, force_eval)
            }
            None => {
                let node = self.current_node()?.clone();
                if node.node_type == NodeType::Choice {
                    let header = node.header.clone()?;
                    return self.render_resolved(&header, &node, force_eval);
                }
                let selected = select_element(&node, &mut self.states, &mut self.rng)?;
                let element = selected.element.clone();
                self.render_resolved(&element, &node, force_eval)
            }
        }
    }

    /// The stored (unrendered) text of an element. `cleaned` strips the
    /// authoring markup; `resolve_vars` substitutes single-variable blocks
    /// read-only. No rotation or side effects either way.
    pub fn get_original_text(
        &self,
        element_id: &str,
        cleaned: bool,
        resolve_vars: bool,
        locale: Option<&str>,
    ) -> Option<String> {
        let (node, element) = self.project.find_element(element_id)?;
        let resolved = resolve_element(
            element,
            node.translatable,
            locale.unwrap_or(&self.locale),
            &self.project.main_locale,
        )?;
        let mut text = resolved.text.to_string();
        if cleaned {
            text = template::clean_markup(&text);
        }
        if resolve_vars {
            text = template::resolve_single_vars(&text, &self.store);
        }
        Some(text)
    }

    /// Localized label text, rendered through the templater.
    pub fn get_label(&mut self, key: &str, locale: Option<&str>) -> Option<ParsedText> {
        let label = self.project.label(key)?;
        let resolved = resolve_contents(
            &label.localized_contents,
            true,
            locale.unwrap_or(&self.locale),
            &self.project.main_locale,
        )?;
        let text = resolved.text.to_string();
        let not_translated = resolved.not_translated;
        let key = key.to_string();
        let rendered = self.render_text(&text, &key, NodeType::Text, false);
        Some(ParsedText {
            text: rendered,
            not_translated,
        })
    }

    /// Resolve and render one element in the context of its node.
    pub(crate) fn render_resolved(
        &mut self,
        element: &NodeElement,
        node: &Node,
        force_eval: bool,
    ) -> Option<ParsedText> {
        let resolved = resolve_element(
            element,
            node.translatable,
            &self.locale,
            &self.project.main_locale,
        )?;
        let text = resolved.text.to_string();
        let not_translated = resolved.not_translated;
        let rendered = self.render_text(&text, &element.id, node.node_type, force_eval);
        Some(ParsedText {
            text: rendered,
            not_translated,
        })
    }

    pub(crate) fn render_text(
        &mut self,
        text: &str,
        element_id: &str,
        node_type: NodeType,
        force_eval: bool,
    ) -> String {
        let mut ctx = RenderCtx {
            store: &mut self.store,
            variations: &mut self.variations,
            states: &mut self.states,
            rng: &mut self.rng,
        };
        template::render_element(text, element_id, node_type, force_eval, &mut ctx)
    }

    pub(crate) fn resolve_text(&self, element: &NodeElement, translatable: bool) -> Option<String> {
        resolve_element(element, translatable, &self.locale, &self.project.main_locale)
            .map(|r| r.text.to_string())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Switch the presentation locale; missing translations fall back to
    /// the project's main locale.
    pub fn set_locale(&mut self, locale: &str) {
        self.locale = locale.to_string();
    }

    pub fn selected_node_id(&self) -> Option<&str> {
        self.selected_node_id.as_deref()
    }

    pub fn previous_node_id(&self) -> Option<&str> {
        self.previous_node_id.as_deref()
    }

    pub fn is_ended(&self) -> bool {
        self.selected_node_id.as_deref() == Some(THE_END)
    }

    pub fn vars(&self) -> &VarStore {
        &self.store
    }

    pub fn vars_mut(&mut self) -> &mut VarStore {
        &mut self.store
    }

    pub(crate) fn current_node(&self) -> Option<&Node> {
        let id = self.selected_node_id.as_deref()?;
        if id == THE_END {
            return None;
        }
        self.project
            .find_node(id, Some(&self.selected_flow_id))
            .map(|(_, n)| n)
    }

    pub fn get_selected_flow(&self) -> Option<&Flow> {
        self.project.flow(&self.selected_flow_id)
    }

    pub fn get_flow(&self, key: &str) -> Option<&Flow> {
        self.project.flow_by_any(key)
    }

    pub fn get_flows(&self) -> &[Flow] {
        &self.project.flows
    }

    /// A node by id (default: the current node), optionally pinned to a flow.
    pub fn get_node(&self, node_id: Option<&str>, flow_id: Option<&str>) -> Option<&Node> {
        match node_id {
            Some(id) => match flow_id {
                Some(fid) => self.project.flow(fid).and_then(|f| f.node(id)),
                None => self
                    .project
                    .find_node(id, Some(&self.selected_flow_id))
                    .map(|(_, n)| n),
            },
            None => self.current_node(),
        }
    }

    pub fn node_exists(&self, node_id: &str, flow_id: Option<&str>) -> bool {
        match flow_id {
            Some(fid) => self
                .project
                .flow(fid)
                .map(|f| f.node(node_id).is_some())
                .unwrap_or(false),
            None => self.project.find_node(node_id, None).is_some(),
        }
    }

    pub fn get_node_actor(&self, node_id: Option<&str>) -> Option<&Actor> {
        let node = self.get_node(node_id, None)?;
        self.project.actor(node.actor_id.as_deref()?)
    }

    pub fn get_actor_by_uid(&self, uid: &str) -> Option<&Actor> {
        self.project.actor_by_uid(uid)
    }

    pub fn get_labels(&self) -> &[Label] {
        &self.project.labels
    }

    /// All metadata values attached to a node, paired with their metadata.
    pub fn get_node_metadata(&self, node_id: Option<&str>) -> Vec<(&Metadata, &MetadataValue)> {
        let Some(node) = self.get_node(node_id, None) else {
            return Vec::new();
        };
        node.metadata
            .iter()
            .filter_map(|value_id| self.project.metadata_value(value_id))
            .collect()
    }

    /// The node's value for one metadata, addressed by the metadata's uid.
    pub fn get_node_meta_by_meta_uid(
        &self,
        uid: &str,
        node_id: Option<&str>,
    ) -> Option<&MetadataValue> {
        self.get_node_metadata(node_id)
            .into_iter()
            .find(|(meta, _)| meta.uid == uid)
            .map(|(_, value)| value)
    }

    /// Nodes with an edge into the given node (same-flow by construction).
    pub fn get_linking_nodes(&self, node_id: Option<&str>) -> Vec<&Node> {
        let Some(target) = self.get_node(node_id, None).map(|n| n.id.clone()) else {
            return Vec::new();
        };
        self.project
            .flows
            .iter()
            .flat_map(|f| f.nodes.iter())
            .filter(|n| n.connections.iter().any(|c| c.to == target))
            .collect()
    }

    /// The nodes this node's edges point at.
    pub fn get_links_to_nodes(&self, node_id: Option<&str>) -> Vec<&Node> {
        let Some(node) = self.get_node(node_id, None) else {
            return Vec::new();
        };
        node.connections
            .iter()
            .filter_map(|c| {
                self.project
                    .find_node(&c.to, Some(&self.selected_flow_id))
                    .map(|(_, n)| n)
            })
            .collect()
    }

    pub fn get_nodes_by_type(&self, node_type: NodeType) -> Vec<&Node> {
        self.project
            .flows
            .iter()
            .flat_map(|f| f.nodes.iter())
            .filter(|n| n.node_type == node_type)
            .collect()
    }

    pub fn get_node_by_permalink(&self, permalink: &str) -> Option<&Node> {
        self.project
            .flows
            .iter()
            .flat_map(|f| f.nodes.iter())
            .find(|n| n.permalink.as_deref() == Some(permalink))
    }
}

impl RuntimeBuilder {
    /// Seed the runtime's rng; unseeded runtimes draw from entropy.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Presentation locale override; defaults to the project's locale.
    pub fn locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    /// Cap on internal pass-through steps per `next_node` call.
    pub fn max_walk_depth(mut self, depth: usize) -> Self {
        self.max_walk_depth = depth;
        self
    }

    /// Start on a named flow instead of the project default.
    pub fn flow(mut self, flow_name: &str) -> Self {
        self.flow_name = Some(flow_name.to_string());
        self
    }

    /// Provide a project directly (for testing without JSON sources).
    pub fn with_project(mut self, project: Project) -> Self {
        self.project = Some(project);
        self
    }

    /// Provide the JSON source document; parsed at build time.
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn build(self) -> Result<Runtime, LoadError> {
        let project = match (self.project, self.source) {
            (Some(project), _) => project,
            (None, Some(source)) => Project::from_json(&source)?,
            (None, None) => return Err(LoadError::MissingField("project")),
        };

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut runtime = Runtime {
            locale: project.locale.clone(),
            selected_flow_id: String::new(),
            selected_node_id: None,
            store: VarStore::new(),
            variations: VariationRegistry::new(),
            states: ElementStates::new(),
            sub_flows: Vec::new(),
            is_jumping: false,
            previous_node_id: None,
            rng,
            max_walk_depth: self.max_walk_depth,
            project,
        };
        runtime.load_in_place(self.flow_name.as_deref());
        if let Some(locale) = self.locale {
            runtime.locale = locale;
        }
        Ok(runtime)
    }
}

impl Runtime {
    /// `load` against the already-owned project (builder path).
    fn load_in_place(&mut self, flow_name: Option<&str>) {
        self.states.clear();
        self.store.seed_globals(&self.project.variables);
        self.store.clear_locals();
        self.sub_flows.clear();
        self.is_jumping = false;
        self.previous_node_id = None;
        if self.variations.is_empty() {
            self.variations = VariationRegistry::build(&self.project);
        }
        self.start(None, flow_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::eval::Scope;
    use crate::schema::value::Value;

    const PROJECT: &str = r#"{
        "_apiVersion": "1.4",
        "_name": "facade",
        "_mainLocale": { "_code": "en" },
        "_flowGroups": [{ "_id": "g1", "_name": "g", "_flowIds": ["f1"] }],
        "_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start",
                  "_connections": [{ "_to": "line" }] },
                { "_id": "line", "_type": "Text", "_actorId": "a1",
                  "_permalink": "first-line",
                  "_metadata": ["mv1"],
                  "_elements": [{
                      "_id": "line-e1",
                      "_localizedContents": [
                          { "_localeCode": "en", "_text": "Hello {$who}" },
                          { "_localeCode": "fr", "_text": "" }
                      ]
                  }],
                  "_connections": [] }
            ]
        }],
        "_actors": [{ "_id": "a1", "_uid": "captain", "_name": "Captain", "_isNarrator": false }],
        "_variables": [{ "_key": "who", "_value": "world", "_type": "string" }],
        "_labels": [{ "_key": "next",
            "_localizedContents": [{ "_localeCode": "en", "_text": "Next" }] }],
        "_metadata": [{ "_id": "m1", "_uid": "mood", "_name": "Mood",
            "_values": [{ "_id": "mv1", "_uid": "calm", "_value": "Calm", "_metadataId": "m1" }] }]
    }"#;

    fn runtime() -> Runtime {
        Runtime::builder()
            .seed(1)
            .with_source(PROJECT)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_seeds_cursor_and_globals() {
        let rt = runtime();
        assert_eq!(rt.selected_node_id(), Some("start"));
        assert_eq!(
            rt.vars().get(Scope::Global, "who"),
            Some(&Value::Str("world".to_string()))
        );
    }

    #[test]
    fn builder_without_project_fails() {
        assert!(matches!(
            Runtime::builder().build(),
            Err(LoadError::MissingField(_))
        ));
    }

    #[test]
    fn parsed_text_interpolates() {
        let mut rt = runtime();
        rt.next_node(None);
        let parsed = rt.get_parsed_text(None, false).unwrap();
        assert_eq!(parsed.text, "Hello world");
        assert!(!parsed.not_translated);
    }

    #[test]
    fn empty_translation_falls_back_with_flag() {
        let mut rt = runtime();
        rt.set_locale("fr");
        rt.next_node(None);
        let parsed = rt.get_parsed_text(None, false).unwrap();
        assert_eq!(parsed.text, "Hello world");
        assert!(parsed.not_translated);
    }

    #[test]
    fn actor_and_permalink_queries() {
        let rt = runtime();
        assert_eq!(rt.get_node_actor(Some("line")).unwrap().name, "Captain");
        assert_eq!(rt.get_actor_by_uid("captain").unwrap().id, "a1");
        assert_eq!(rt.get_node_by_permalink("first-line").unwrap().id, "line");
        assert!(rt.node_exists("line", Some("f1")));
        assert!(!rt.node_exists("line", Some("f2")));
    }

    #[test]
    fn metadata_queries() {
        let rt = runtime();
        let metadata = rt.get_node_metadata(Some("line"));
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].1.value, "Calm");
        let value = rt.get_node_meta_by_meta_uid("mood", Some("line")).unwrap();
        assert_eq!(value.uid, "calm");
        assert!(rt.get_node_meta_by_meta_uid("absent", Some("line")).is_none());
    }

    #[test]
    fn linking_queries() {
        let rt = runtime();
        let incoming = rt.get_linking_nodes(Some("line"));
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].id, "start");
        let outgoing = rt.get_links_to_nodes(Some("start"));
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].id, "line");
    }

    #[test]
    fn label_lookup() {
        let mut rt = runtime();
        let label = rt.get_label("next", None).unwrap();
        assert_eq!(label.text, "Next");
        assert!(rt.get_label("absent", None).is_none());
    }

    #[test]
    fn load_resets_play_state() {
        let mut rt = runtime();
        rt.vars_mut().set(Scope::Global, "who", Value::Str("moon".to_string()));
        rt.states.set_visited("line-e1", true);
        let project = rt.project().clone();
        rt.load(project, None).unwrap();
        assert_eq!(
            rt.vars().get(Scope::Global, "who"),
            Some(&Value::Str("world".to_string()))
        );
        assert!(!rt.states.is_visited("line-e1"));
        assert_eq!(rt.selected_node_id(), Some("start"));
    }

    #[test]
    fn restart_only_rewinds_cursor() {
        let mut rt = runtime();
        rt.vars_mut().set(Scope::Global, "who", Value::Str("moon".to_string()));
        rt.next_node(None);
        assert!(rt.restart());
        assert_eq!(rt.selected_node_id(), Some("start"));
        assert_eq!(
            rt.vars().get(Scope::Global, "who"),
            Some(&Value::Str("moon".to_string()))
        );
    }

    #[test]
    fn start_on_missing_flow_fails() {
        let mut rt = runtime();
        assert!(!rt.start(None, Some("nope")));
        assert!(rt.start(None, Some("Main")));
        assert!(rt.start(None, Some("main")));
    }
}
