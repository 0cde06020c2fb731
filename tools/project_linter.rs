/// Project linter — static validation of a story project's graph structure.
///
/// Usage: project_linter <project.json>
///
/// Checks the structural rules the walker relies on: one Start per flow,
/// resolvable connection targets, element-bound edges that reference real
/// elements, at most one fail edge per dispatching node, and resolvable
/// jump targets. Exits non-zero when any error is found.

use story_flow::schema::node::{ConnectionKind, NodeType};
use story_flow::schema::project::Project;

struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: project_linter <project.json>");
        return;
    }

    let source = match std::fs::read_to_string(&args[1]) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("cannot read {}: {}", args[1], err);
            std::process::exit(1);
        }
    };

    let project = match Project::from_json(&source) {
        Ok(project) => project,
        Err(err) => {
            eprintln!("load error: {}", err);
            std::process::exit(1);
        }
    };

    let findings = lint(&project);

    for warning in &findings.warnings {
        println!("warning: {}", warning);
    }
    for error in &findings.errors {
        println!("error: {}", error);
    }
    println!(
        "{}: {} error(s), {} warning(s)",
        project.name,
        findings.errors.len(),
        findings.warnings.len()
    );
    if !findings.errors.is_empty() {
        std::process::exit(1);
    }
}

fn lint(project: &Project) -> Findings {
    let mut findings = Findings {
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    for flow in &project.flows {
        let starts: Vec<&str> = flow
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Start)
            .map(|n| n.id.as_str())
            .collect();
        if starts.len() != 1 {
            findings.errors.push(format!(
                "flow '{}' has {} Start nodes (expected exactly 1)",
                flow.name,
                starts.len()
            ));
        }
        for start_id in &starts {
            let incoming = flow
                .nodes
                .iter()
                .flat_map(|n| n.connections.iter())
                .filter(|c| c.to == *start_id)
                .count();
            if incoming > 0 {
                findings.errors.push(format!(
                    "Start node '{}' in flow '{}' has {} incoming edge(s)",
                    start_id, flow.name, incoming
                ));
            }
        }

        for node in &flow.nodes {
            for connection in &node.connections {
                let in_flow = flow.node(&connection.to).is_some();
                let anywhere = project.find_node(&connection.to, Some(&flow.id)).is_some();
                if !anywhere {
                    findings.errors.push(format!(
                        "node '{}' in flow '{}' connects to missing node '{}'",
                        node.id, flow.name, connection.to
                    ));
                } else if !in_flow && connection.kind != ConnectionKind::SubFlow {
                    findings.errors.push(format!(
                        "node '{}' in flow '{}' has a non-subflow edge leaving the flow (to '{}')",
                        node.id, flow.name, connection.to
                    ));
                }

                if let Some(element_id) = &connection.node_element_id {
                    if node.element(element_id).is_none() {
                        findings.errors.push(format!(
                            "node '{}' has an edge bound to unknown element '{}'",
                            node.id, element_id
                        ));
                    }
                }
            }

            let fail_edges = node
                .connections
                .iter()
                .filter(|c| c.kind == ConnectionKind::FailCondition)
                .count();
            if fail_edges > 1 {
                findings.errors.push(format!(
                    "node '{}' has {} fail edges (at most 1 allowed)",
                    node.id, fail_edges
                ));
            }

            match node.node_type {
                NodeType::Choice | NodeType::Condition | NodeType::Sequence => {
                    for connection in &node.connections {
                        if connection.kind != ConnectionKind::FailCondition
                            && connection.node_element_id.is_none()
                        {
                            findings.warnings.push(format!(
                                "{:?} node '{}' has an edge without an element binding",
                                node.node_type, node.id
                            ));
                        }
                    }
                    if node.elements.is_empty() {
                        findings.warnings.push(format!(
                            "{:?} node '{}' has no elements",
                            node.node_type, node.id
                        ));
                    }
                }
                NodeType::JumpToNode => match &node.jump_to {
                    Some(target) => {
                        let resolves = project
                            .flow(&target.flow_id)
                            .and_then(|f| f.node(&target.node_id))
                            .is_some();
                        if !resolves {
                            findings.errors.push(format!(
                                "jump node '{}' targets missing {}/{}",
                                node.id, target.flow_id, target.node_id
                            ));
                        }
                    }
                    None => {
                        findings
                            .errors
                            .push(format!("jump node '{}' has no target", node.id));
                    }
                },
                NodeType::SubFlow => {
                    let has_call = node
                        .connections
                        .iter()
                        .any(|c| c.kind == ConnectionKind::SubFlow);
                    if !has_call {
                        findings.errors.push(format!(
                            "sub-flow node '{}' has no SubFlow call edge",
                            node.id
                        ));
                    }
                }
                _ => {}
            }
        }
    }

    for group in &project.flow_groups {
        for flow_id in &group.flow_ids {
            if project.flow(flow_id).is_none() {
                findings.warnings.push(format!(
                    "flow group '{}' references missing flow '{}'",
                    group.name, flow_id
                ));
            }
        }
    }

    findings
}
