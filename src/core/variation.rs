/// Variation registry — pre-extracted `[[TYPE a|b|c]]` rotation blocks and
/// their per-element persistent state.

use rand::rngs::StdRng;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::schema::project::Project;

/// The four rotation disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariationKind {
    /// Linear, sticks on the last option once exhausted.
    List,
    /// Linear, wraps around.
    Loop,
    /// Uniform with replacement.
    Rnd,
    /// Uniform without replacement, refilled on exhaustion.
    Srnd,
}

impl VariationKind {
    fn parse(token: &str) -> Option<VariationKind> {
        match token {
            "LIST" => Some(VariationKind::List),
            "LOOP" => Some(VariationKind::Loop),
            "RND" => Some(VariationKind::Rnd),
            "SRND" => Some(VariationKind::Srnd),
            _ => None,
        }
    }
}

/// One rotation block and its mutable remainder.
#[derive(Debug, Clone)]
pub struct Variation {
    pub kind: VariationKind,
    pub initial_values: Vec<String>,
    pub remaining: Vec<String>,
}

/// All variation blocks of a project, keyed by element id. Block order
/// within an element is positional: the i-th `[[…]]` block in the text
/// always consults the i-th slot here. Blocks with an unknown TYPE token
/// occupy a slot but carry no state (they render verbatim).
#[derive(Debug, Clone, Default)]
pub struct VariationRegistry {
    by_element: FxHashMap<String, Vec<Option<Variation>>>,
}

/// Extract the bodies of every `[[ … ]]` block in order of appearance.
pub fn extract_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("[[") {
        let after = &rest[open + 2..];
        match after.find("]]") {
            Some(close) => {
                blocks.push(&after[..close]);
                rest = &after[close + 2..];
            }
            None => break,
        }
    }
    blocks
}

/// Parse one block body into (kind, options). `None` kind for unknown TYPE.
pub(crate) fn parse_block(body: &str) -> (Option<VariationKind>, Vec<String>) {
    let mut normalized = body.trim().to_string();
    while normalized.contains(" | ") {
        normalized = normalized.replace(" | ", "|");
    }
    let mut parts = normalized.splitn(2, char::is_whitespace);
    let kind = parts.next().and_then(VariationKind::parse);
    let options = parts
        .next()
        .map(|rest| rest.split('|').map(|o| o.trim().to_string()).collect())
        .unwrap_or_default();
    (kind, options)
}

impl VariationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan every element's main-locale text (headers included) and record
    /// its variation blocks.
    pub fn build(project: &Project) -> Self {
        let mut registry = VariationRegistry::new();
        let main = &project.main_locale;
        for flow in &project.flows {
            for node in &flow.nodes {
                for element in node.elements.iter().chain(node.header.iter()) {
                    let Some(content) = element.content_for(main) else {
                        continue;
                    };
                    let blocks = extract_blocks(&content.text);
                    if blocks.is_empty() {
                        continue;
                    }
                    let slots = blocks
                        .iter()
                        .map(|body| {
                            let (kind, options) = parse_block(body);
                            kind.map(|kind| Variation {
                                kind,
                                initial_values: options.clone(),
                                remaining: options,
                            })
                        })
                        .collect();
                    registry.by_element.insert(element.id.clone(), slots);
                }
            }
        }
        registry
    }

    pub fn is_empty(&self) -> bool {
        self.by_element.is_empty()
    }

    /// True when the i-th block of an element has rotation state.
    pub fn has(&self, element_id: &str, index: usize) -> bool {
        self.by_element
            .get(element_id)
            .and_then(|slots| slots.get(index))
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Produce the next value of the i-th block of an element, advancing its
    /// state per the block's discipline.
    pub fn advance(&mut self, element_id: &str, index: usize, rng: &mut StdRng) -> Option<String> {
        let variation = self
            .by_element
            .get_mut(element_id)?
            .get_mut(index)?
            .as_mut()?;
        if variation.initial_values.is_empty() {
            return Some(String::new());
        }
        let value = match variation.kind {
            VariationKind::List => {
                if variation.remaining.is_empty() {
                    variation.initial_values.last().cloned().unwrap_or_default()
                } else {
                    variation.remaining.remove(0)
                }
            }
            VariationKind::Loop => {
                if variation.remaining.is_empty() {
                    variation.remaining = variation.initial_values.clone();
                }
                let value = variation.remaining.remove(0);
                if variation.remaining.is_empty() {
                    variation.remaining = variation.initial_values.clone();
                }
                value
            }
            VariationKind::Rnd => {
                let i = rng.gen_range(0..variation.initial_values.len());
                variation.initial_values[i].clone()
            }
            VariationKind::Srnd => {
                let i = rng.gen_range(0..variation.remaining.len());
                let value = variation.remaining.remove(i);
                if variation.remaining.is_empty() {
                    variation.remaining = variation.initial_values.clone();
                }
                value
            }
        };
        Some(value)
    }
}
