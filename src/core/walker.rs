/// Flow walker — the node-type-dispatched state machine that advances the
/// cursor: connection selection, the sub-flow call stack, jumping mode,
/// choice exhaustion, and the THE END sentinel.

use crate::core::runtime::{ChoiceEntry, Runtime, SubFlowFrame, THE_END};
use crate::core::selector::select_element;
use crate::core::template;
use crate::schema::node::{Connection, ConnectionKind, JumpTarget, Node, NodeType};
use rand::Rng;

/// Host-visible result of one `next_node` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A presentable node (Text or Choice) was reached; fetch its content
    /// with `get_parsed_text` / `get_available_choices`.
    Emitted(String),
    /// The traversal is over.
    Ended,
    /// A JumpToNode pointed at a missing flow or node. The cursor does not
    /// move; the host decides whether to abort.
    BadJump {
        node_id: String,
        target: Option<JumpTarget>,
    },
}

/// One iteration of the pass-through loop.
enum Step {
    Emit(String),
    End,
    BadJump {
        node_id: String,
        target: Option<JumpTarget>,
    },
    Continue,
}

/// The connection chosen for the current node, plus the element that drove
/// the choice (for visitation bookkeeping).
struct PickedConnection {
    connection: Option<Connection>,
    element_id: Option<String>,
}

impl Runtime {
    /// Advance the cursor to the next presentable node. `element_id` names
    /// the chosen alternative when the current node is a Choice.
    ///
    /// Internal nodes (Start, Condition, Variables, …) are walked through in
    /// a bounded loop; if the project cycles through them without ever
    /// reaching a presentable node, the traversal is terminated.
    pub fn next_node(&mut self, element_id: Option<&str>) -> StepOutcome {
        let mut element_id = element_id.map(|s| s.to_string());
        for _ in 0..self.max_walk_depth {
            match self.step(element_id.take().as_deref()) {
                Step::Emit(node_id) => return StepOutcome::Emitted(node_id),
                Step::End => return StepOutcome::Ended,
                Step::BadJump { node_id, target } => {
                    return StepOutcome::BadJump { node_id, target }
                }
                Step::Continue => {}
            }
        }
        tracing::warn!(
            flow = %self.selected_flow_id,
            cap = self.max_walk_depth,
            "pass-through depth cap exceeded; terminating traversal"
        );
        self.selected_node_id = Some(THE_END.to_string());
        StepOutcome::Ended
    }

    fn step(&mut self, element_id: Option<&str>) -> Step {
        if self.selected_node_id.as_deref() == Some(THE_END) {
            return Step::End;
        }
        let Some(current_id) = self.selected_node_id.clone() else {
            return Step::End;
        };
        let current = match self
            .project
            .find_node(&current_id, Some(self.selected_flow_id.as_str()))
        {
            Some((_, node)) => node.clone(),
            None => {
                tracing::warn!(node = %current_id, "cursor points at a missing node; ending");
                self.selected_node_id = Some(THE_END.to_string());
                return Step::End;
            }
        };

        let picked = self.available_connection(&current, element_id);
        let connection = picked
            .connection
            .clone()
            .or_else(|| current.fail_connection().cloned());

        // Pre-transition bookkeeping.
        match current.node_type {
            NodeType::Choice => {
                if !self.is_jumping {
                    if let Some(chosen) = element_id {
                        if self.states.get(chosen).just_once {
                            self.states.set_visited(chosen, true);
                        }
                        // Realize the deferred assignments of the selected
                        // alternative.
                        if let Some(element) = current.element(chosen) {
                            let element = element.clone();
                            let _ = self.render_resolved(&element, &current, true);
                        }
                    }
                }
            }
            NodeType::JumpToNode => {
                let valid = current.jump_to.as_ref().filter(|t| {
                    self.project
                        .flow(&t.flow_id)
                        .and_then(|f| f.node(&t.node_id))
                        .is_some()
                });
                match valid {
                    Some(target) => {
                        self.is_jumping = true;
                        self.selected_flow_id = target.flow_id.clone();
                        self.selected_node_id = Some(target.node_id.clone());
                    }
                    None => {
                        return Step::BadJump {
                            node_id: current.id.clone(),
                            target: current.jump_to.clone(),
                        }
                    }
                }
            }
            _ => {
                if let Some(involved) = &picked.element_id {
                    self.states.set_visited(involved, true);
                }
            }
        }

        // Target selection.
        if connection.is_none() && current.node_type != NodeType::JumpToNode {
            self.is_jumping = false;
            return self.leave_dead_end();
        }
        if !self.is_jumping {
            if let Some(conn) = &connection {
                self.move_cursor_to(&conn.to);
            }
        }
        self.is_jumping = false;

        let Some(target_id) = self.selected_node_id.clone() else {
            return Step::End;
        };
        self.previous_node_id = Some(current.id.clone());
        let target = match self
            .project
            .find_node(&target_id, Some(self.selected_flow_id.as_str()))
        {
            Some((_, node)) => node.clone(),
            None => {
                tracing::warn!(node = %target_id, "connection target missing; ending");
                self.selected_node_id = Some(THE_END.to_string());
                return Step::End;
            }
        };

        // Choice exhaustion: nothing left to offer, follow the fail edge.
        if target.node_type == NodeType::Choice && self.available_choices_for(&target).is_empty() {
            if let Some(fail) = target.fail_connection() {
                let to = fail.to.clone();
                self.move_cursor_to(&to);
                return Step::Continue;
            }
            return self.leave_dead_end();
        }

        if target.node_type.is_pass_through() {
            Step::Continue
        } else {
            Step::Emit(target.id.clone())
        }
    }

    /// No way forward: resume a pending sub-flow caller, or finish.
    fn leave_dead_end(&mut self) -> Step {
        if let Some(frame) = self.sub_flows.last().cloned() {
            // Reposition on the calling SubFlow node; its dispatch pops the
            // frame and takes the post-call edge.
            self.selected_flow_id = frame.flow_id;
            self.selected_node_id = Some(frame.node_id);
            return Step::Continue;
        }
        self.selected_node_id = Some(THE_END.to_string());
        Step::End
    }

    /// Point the cursor at a node, switching flows when the target lives
    /// elsewhere (sub-flow call edges cross flows).
    fn move_cursor_to(&mut self, node_id: &str) {
        if let Some((flow, _)) = self
            .project
            .find_node(node_id, Some(self.selected_flow_id.as_str()))
        {
            let flow_id = flow.id.clone();
            self.selected_flow_id = flow_id;
        }
        self.selected_node_id = Some(node_id.to_string());
    }

    /// Per-type dispatch: which outgoing connection leaves `current`.
    fn available_connection(&mut self, current: &Node, element_id: Option<&str>) -> PickedConnection {
        match current.node_type {
            NodeType::Start
            | NodeType::Text
            | NodeType::Note
            | NodeType::Layout
            | NodeType::FailCondition => PickedConnection {
                connection: current.first_connection().cloned(),
                element_id: None,
            },
            NodeType::SubFlow => self.subflow_connection(current),
            NodeType::Choice => PickedConnection {
                connection: element_id
                    .and_then(|id| current.connection_for_element(id))
                    .cloned(),
                element_id: element_id.map(String::from),
            },
            NodeType::Condition => self.condition_connection(current),
            NodeType::Variables => {
                for element in &current.elements {
                    if let Some(text) = self.resolve_text(element, current.translatable) {
                        if let Err(err) = template::eval_element_expressions(&text, &mut self.store)
                        {
                            tracing::debug!(element = %element.id, error = %err,
                                "variables element failed to evaluate");
                        }
                    }
                }
                PickedConnection {
                    connection: current.first_connection().cloned(),
                    element_id: None,
                }
            }
            NodeType::Random => {
                let candidates: Vec<&Connection> = current
                    .connections
                    .iter()
                    .filter(|c| c.kind != ConnectionKind::FailCondition)
                    .collect();
                PickedConnection {
                    connection: if candidates.is_empty() {
                        None
                    } else {
                        Some(candidates[self.rng.gen_range(0..candidates.len())].clone())
                    },
                    element_id: None,
                }
            }
            NodeType::Sequence => self.sequence_connection(current),
            NodeType::JumpToNode => PickedConnection {
                connection: None,
                element_id: None,
            },
        }
    }

    /// First arrival pushes a return frame and takes the call edge; coming
    /// back through (frame still stacked) pops it and takes the exit edge.
    fn subflow_connection(&mut self, current: &Node) -> PickedConnection {
        let stacked = self.sub_flows.iter().rposition(|f| f.node_id == current.id);
        match stacked {
            Some(pos) => {
                self.sub_flows.remove(pos);
                PickedConnection {
                    connection: current
                        .connections
                        .iter()
                        .find(|c| c.kind == ConnectionKind::Default)
                        .cloned(),
                    element_id: None,
                }
            }
            None => {
                let call = current
                    .connections
                    .iter()
                    .find(|c| c.kind == ConnectionKind::SubFlow)
                    .cloned();
                if call.is_some() {
                    self.sub_flows.push(SubFlowFrame {
                        flow_id: self.selected_flow_id.clone(),
                        node_id: current.id.clone(),
                    });
                }
                PickedConnection {
                    connection: call,
                    element_id: None,
                }
            }
        }
    }

    /// Elements are boolean guards in source order; the first truthy one
    /// wins. Evaluation failures count as false.
    fn condition_connection(&mut self, current: &Node) -> PickedConnection {
        for element in &current.elements {
            let Some(text) = self.resolve_text(element, current.translatable) else {
                continue;
            };
            match template::eval_element_expressions(&text, &mut self.store) {
                Ok(value) if value.is_truthy() => {
                    return PickedConnection {
                        connection: current.connection_for_element(&element.id).cloned(),
                        element_id: Some(element.id.clone()),
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(element = %element.id, error = %err,
                        "condition element failed to evaluate; treated as false");
                }
            }
        }
        PickedConnection {
            connection: None,
            element_id: None,
        }
    }

    /// Cycle-policy selection over elements, following the chosen element's
    /// connection. An exhausted List yields to the fail edge when present,
    /// otherwise sticks on the last element's connection.
    fn sequence_connection(&mut self, current: &Node) -> PickedConnection {
        match select_element(current, &mut self.states, &mut self.rng) {
            Some(selected) => {
                if selected.exhausted && current.fail_connection().is_some() {
                    return PickedConnection {
                        connection: None,
                        element_id: None,
                    };
                }
                PickedConnection {
                    connection: current.connection_for_element(&selected.element.id).cloned(),
                    element_id: Some(selected.element.id.clone()),
                }
            }
            None => PickedConnection {
                connection: None,
                element_id: None,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Choices
    // -----------------------------------------------------------------------

    /// The alternatives of a Choice node the host may offer right now.
    ///
    /// Each element renders (without side-effect evaluation) so its markers
    /// are known. Elements that render empty hide themselves; previously
    /// hidden elements that render non-empty again come back. `[+]`
    /// fallbacks are returned only when every normal alternative is gone.
    pub fn get_available_choices(&mut self, node_id: Option<&str>) -> Vec<ChoiceEntry> {
        let node = match self.get_node(node_id, None) {
            Some(node) if node.node_type == NodeType::Choice => node.clone(),
            _ => return Vec::new(),
        };
        self.available_choices_for(&node)
    }

    pub(crate) fn available_choices_for(&mut self, node: &Node) -> Vec<ChoiceEntry> {
        let mut visible = Vec::new();
        let mut fallbacks = Vec::new();

        for element in &node.elements {
            let rendered = self.render_resolved(element, node, false);
            let (text, not_translated) = match rendered {
                Some(parsed) => (parsed.text, parsed.not_translated),
                None => (String::new(), false),
            };

            let state = self.states.get(&element.id);
            if state.if_no_more {
                // Fallback-only alternatives never join the normal list.
                self.states.set_visited(&element.id, true);
                fallbacks.push(ChoiceEntry {
                    element_id: element.id.clone(),
                    text,
                    not_translated,
                });
                continue;
            }

            if text.is_empty() {
                let state = self.states.get_mut(&element.id);
                state.visited = true;
                state.was_hidden_because_empty = true;
                continue;
            }

            if state.was_hidden_because_empty {
                let state = self.states.get_mut(&element.id);
                state.visited = false;
                state.was_hidden_because_empty = false;
            }

            if !self.states.is_visited(&element.id) {
                visible.push(ChoiceEntry {
                    element_id: element.id.clone(),
                    text,
                    not_translated,
                });
            }
        }

        if visible.is_empty() {
            fallbacks
        } else {
            visible
        }
    }
}
