/// Element selection — which of a node's elements to emit under its cycle
/// policy, updating visitation as a side effect.

use rand::rngs::StdRng;
use rand::Rng;

use crate::core::state::ElementStates;
use crate::schema::node::{CycleType, Node, NodeElement};

/// The outcome of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected<'a> {
    pub element: &'a NodeElement,
    /// True only for a List that has run dry and is sticking on its last
    /// element. Sequence dispatch prefers a fail connection in that case.
    pub exhausted: bool,
}

/// Pick one element of `node` per its cycle policy.
///
/// List and Loop walk elements in order; Loop resets on exhaustion while
/// List sticks on the last. SmartRandom samples the unvisited subset and
/// resets when it empties. Plain Random ignores visitation entirely. Nodes
/// without a policy always yield their first element.
pub fn select_element<'a>(
    node: &'a Node,
    states: &mut ElementStates,
    rng: &mut StdRng,
) -> Option<Selected<'a>> {
    let elements = &node.elements;
    if elements.is_empty() {
        return None;
    }

    match node.cycle_type {
        CycleType::List => {
            if let Some(element) = elements.iter().find(|e| !states.is_visited(&e.id)) {
                states.set_visited(&element.id, true);
                Some(Selected {
                    element,
                    exhausted: false,
                })
            } else {
                Some(Selected {
                    element: elements.last().unwrap(),
                    exhausted: true,
                })
            }
        }
        CycleType::Loop => {
            if let Some(element) = elements.iter().find(|e| !states.is_visited(&e.id)) {
                states.set_visited(&element.id, true);
                Some(Selected {
                    element,
                    exhausted: false,
                })
            } else {
                for element in elements {
                    states.set_visited(&element.id, false);
                }
                let element = &elements[0];
                states.set_visited(&element.id, true);
                Some(Selected {
                    element,
                    exhausted: false,
                })
            }
        }
        CycleType::Random => {
            let element = &elements[rng.gen_range(0..elements.len())];
            Some(Selected {
                element,
                exhausted: false,
            })
        }
        CycleType::SmartRandom => {
            if !elements.iter().any(|e| !states.is_visited(&e.id)) {
                for element in elements {
                    states.set_visited(&element.id, false);
                }
            }
            let unvisited: Vec<&NodeElement> = elements
                .iter()
                .filter(|e| !states.is_visited(&e.id))
                .collect();
            let element = unvisited[rng.gen_range(0..unvisited.len())];
            states.set_visited(&element.id, true);
            Some(Selected {
                element,
                exhausted: false,
            })
        }
        CycleType::None => Some(Selected {
            element: &elements[0],
            exhausted: false,
        }),
    }
}
