/// Text templater — renders an element's authored text: variation blocks,
/// inline conditionals, TODO stripping, one-shot/fallback markers, and
/// `{…}` expression interpolation, in that fixed order.

use rand::rngs::StdRng;

use crate::core::eval::{self, EvalError, VarStore};
use crate::core::state::ElementStates;
use crate::core::variation::VariationRegistry;
use crate::schema::node::NodeType;

/// Substituted for a failed `{…}` expression.
pub const ERROR_MARKER: &str = "--error--";
/// Substituted for a failed or malformed `[IF …]` conditional.
pub const ERROR_MARKER_INLINE: &str = " --ERROR-- ";

/// Mutable runtime state the templater reads and writes while rendering.
pub struct RenderCtx<'a> {
    pub store: &'a mut VarStore,
    pub variations: &'a mut VariationRegistry,
    pub states: &'a mut ElementStates,
    pub rng: &'a mut StdRng,
}

/// Render one element's localized text.
///
/// `force_eval` realizes assignment expressions inside Choice elements;
/// pre-display rendering passes false so picking a choice is the only thing
/// that applies its side effects.
pub fn render_element(
    text: &str,
    element_id: &str,
    node_type: NodeType,
    force_eval: bool,
    ctx: &mut RenderCtx<'_>,
) -> String {
    let mut out = apply_variations(text, element_id, ctx);
    out = apply_inline_conditions(&out, ctx.store);
    out = strip_todos(&out);
    out = take_marker(&out, "[-]", || {
        ctx.states.get_mut(element_id).just_once = true;
    });
    out = take_marker(&out, "[+]", || {
        let state = ctx.states.get_mut(element_id);
        state.if_no_more = true;
        // Fallback elements never appear in the normal choice list.
        state.visited = true;
    });
    out = apply_expressions(&out, node_type, force_eval, ctx.store);
    normalize_whitespace(&out)
}

/// Evaluate an element's text as expressions only, no rendering: each `{…}`
/// block in turn, or the whole text when it carries no braces. Returns the
/// last value. Used by Condition and Variables nodes.
pub fn eval_element_expressions(text: &str, store: &mut VarStore) -> Result<crate::schema::value::Value, EvalError> {
    let mut last = None;
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        last = Some(eval::evaluate(&after[..close], store)?);
        rest = &after[close + 1..];
    }
    match last {
        Some(value) => Ok(value),
        None => eval::evaluate(text, store),
    }
}

/// Strip authoring markup without touching runtime state: `[TODO …]`,
/// `[-]`/`[+]` markers, and `[[…]]` blocks collapsed to their first option.
/// Inline conditionals and `{…}` blocks are left as written.
pub fn clean_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("[[") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("]]") else { break };
        out.push_str(&rest[..open]);
        let (_, options) = crate::core::variation::parse_block(&after[..close]);
        if let Some(first) = options.first() {
            out.push_str(first);
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    strip_todos(&out).replace("[-]", "").replace("[+]", "")
}

/// Substitute single-variable `{…}` blocks from the store, read-only.
/// Anything else (expressions, assignments, undefined names) stays as
/// written.
pub fn resolve_single_vars(text: &str, store: &VarStore) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        let expr = &after[..close];
        let substituted = eval::single_variable(expr)
            .and_then(|(scope, name)| store.get(scope, &name).cloned());
        match substituted {
            Some(value) => {
                out.push_str(&rest[..open]);
                out.push_str(&value.to_string());
            }
            None => out.push_str(&rest[..open + 1 + close + 1]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Pass 1: variations
// ---------------------------------------------------------------------------

fn apply_variations(text: &str, element_id: &str, ctx: &mut RenderCtx<'_>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut index = 0usize;
    while let Some(open) = rest.find("[[") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("]]") else { break };
        out.push_str(&rest[..open]);
        if ctx.variations.has(element_id, index) {
            let value = ctx
                .variations
                .advance(element_id, index, ctx.rng)
                .unwrap_or_default();
            out.push_str("<variation>");
            out.push_str(&value);
            out.push_str("</variation>");
        } else {
            // Unknown TYPE token: leave the block for authors to spot.
            out.push_str(&rest[open..open + 2 + close + 2]);
        }
        index += 1;
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Pass 2: [IF cond ? "a" : "b"]
// ---------------------------------------------------------------------------

fn apply_inline_conditions(text: &str, store: &mut VarStore) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("[IF") {
        let after = &rest[open + 3..];
        let Some(close) = find_unquoted(after, ']') else { break };
        out.push_str(&rest[..open]);
        out.push_str(&render_condition(&after[..close], store));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// First occurrence of `needle` outside single/double quotes.
fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if c == needle {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// Exactly two quoted arms are required; anything else renders the inline
/// error marker (matching the behavior authors see today).
fn render_condition(body: &str, store: &mut VarStore) -> String {
    let Some(question) = find_unquoted(body, '?') else {
        return ERROR_MARKER_INLINE.to_string();
    };
    let condition = &body[..question];
    let Some((yes, no)) = parse_arms(&body[question + 1..]) else {
        return ERROR_MARKER_INLINE.to_string();
    };
    match eval::evaluate(condition, store) {
        Ok(value) => {
            if value.is_truthy() {
                yes
            } else {
                no
            }
        }
        Err(_) => ERROR_MARKER_INLINE.to_string(),
    }
}

/// Parse `"yes" : "no"` (either quote style). Returns the unquoted arms.
fn parse_arms(text: &str) -> Option<(String, String)> {
    let (yes, rest) = parse_quoted(text)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':')?;
    let (no, rest) = parse_quoted(rest)?;
    if !rest.trim().is_empty() {
        return None;
    }
    Some((yes, no))
}

fn parse_quoted(text: &str) -> Option<(String, &str)> {
    let trimmed = text.trim_start();
    let mut chars = trimmed.char_indices();
    let (_, quote) = chars.next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    for (i, c) in chars {
        if c == quote {
            return Some((trimmed[1..i].to_string(), &trimmed[i + 1..]));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Passes 3-5: [TODO …], [-], [+]
// ---------------------------------------------------------------------------

fn strip_todos(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("[TODO") {
        let after = &rest[open + 5..];
        let Some(close) = after.find(']') else { break };
        out.push_str(&rest[..open]);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn take_marker(text: &str, marker: &str, mut on_found: impl FnMut()) -> String {
    if !text.contains(marker) {
        return text.to_string();
    }
    on_found();
    text.replace(marker, "")
}

// ---------------------------------------------------------------------------
// Pass 6: {expr}
// ---------------------------------------------------------------------------

fn apply_expressions(
    text: &str,
    node_type: NodeType,
    force_eval: bool,
    store: &mut VarStore,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        out.push_str(&rest[..open]);
        let expr = &after[..close];

        // Choices defer anything that looks like an assignment until the
        // host actually selects them. The check is a literal '=' scan so a
        // pre-display render can never apply a side effect.
        let deferred = node_type == NodeType::Choice && !force_eval && expr.contains('=');
        if !deferred {
            if eval::single_variable(expr).is_some() {
                match eval::evaluate(expr, store) {
                    Ok(value) => out.push_str(&value.to_string()),
                    Err(_) => out.push_str(ERROR_MARKER),
                }
            } else {
                // Effect-only block: run it, emit nothing on success.
                if eval::evaluate(expr, store).is_err() {
                    out.push_str(ERROR_MARKER);
                }
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Pass 7: whitespace
// ---------------------------------------------------------------------------

fn normalize_whitespace(text: &str) -> String {
    let mut current = text.replace("&nbsp;", " ");
    loop {
        let trimmed = current.trim();
        let stripped = trimmed
            .strip_prefix("<br/>")
            .or_else(|| trimmed.strip_prefix("<br />"))
            .or_else(|| trimmed.strip_prefix("<br>"))
            .unwrap_or(trimmed);
        let stripped = stripped
            .strip_suffix("<br/>")
            .or_else(|| stripped.strip_suffix("<br />"))
            .or_else(|| stripped.strip_suffix("<br>"))
            .unwrap_or(stripped);
        if stripped == current {
            return current;
        }
        current = stripped.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::eval::Scope;
    use crate::core::variation::VariationRegistry;
    use crate::schema::node::{LocalizedContent, Node, NodeElement};
    use crate::schema::project::{Flow, Project};
    use crate::schema::value::Value;
    use rand::SeedableRng;

    /// Build a one-element project so the registry can scan the text.
    fn project_with_text(text: &str) -> Project {
        Project {
            name: "t".to_string(),
            api_version: "1.4".to_string(),
            locale: "en".to_string(),
            main_locale: "en".to_string(),
            available_locales: Vec::new(),
            flow_groups: Vec::new(),
            flows: vec![Flow {
                id: "f1".to_string(),
                name: "f".to_string(),
                slug: "f".to_string(),
                nodes: vec![Node {
                    id: "n1".to_string(),
                    permalink: None,
                    node_type: NodeType::Text,
                    actor_id: None,
                    metadata: Vec::new(),
                    elements: vec![NodeElement {
                        id: "e1".to_string(),
                        node_id: "n1".to_string(),
                        kind: None,
                        localized_contents: vec![LocalizedContent {
                            locale_code: "en".to_string(),
                            text: text.to_string(),
                        }],
                    }],
                    connections: Vec::new(),
                    cycle_type: Default::default(),
                    translatable: true,
                    jump_to: None,
                    image: None,
                    header: None,
                }],
            }],
            actors: Vec::new(),
            variables: Vec::new(),
            labels: Vec::new(),
            metadata: Vec::new(),
        }
    }

    fn render(text: &str, node_type: NodeType, force_eval: bool, store: &mut VarStore) -> String {
        let project = project_with_text(text);
        let mut variations = VariationRegistry::build(&project);
        let mut states = ElementStates::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = RenderCtx {
            store,
            variations: &mut variations,
            states: &mut states,
            rng: &mut rng,
        };
        render_element(text, "e1", node_type, force_eval, &mut ctx)
    }

    #[test]
    fn plain_text_passes_through() {
        let mut store = VarStore::new();
        assert_eq!(
            render("Hello there.", NodeType::Text, false, &mut store),
            "Hello there."
        );
    }

    #[test]
    fn variation_block_is_wrapped() {
        let mut store = VarStore::new();
        let out = render("Say [[LIST hi|ho]]!", NodeType::Text, false, &mut store);
        assert_eq!(out, "Say <variation>hi</variation>!");
    }

    #[test]
    fn inline_condition_picks_arm() {
        let mut store = VarStore::new();
        store.set(Scope::Global, "x", Value::Int(1));
        assert_eq!(
            render("[IF $x == 1 ? \"one\" : \"other\"]", NodeType::Text, false, &mut store),
            "one"
        );
        store.set(Scope::Global, "x", Value::Int(2));
        assert_eq!(
            render("[IF $x == 1 ? \"one\" : \"other\"]", NodeType::Text, false, &mut store),
            "other"
        );
    }

    #[test]
    fn inline_condition_missing_arm_is_error() {
        let mut store = VarStore::new();
        store.set(Scope::Global, "x", Value::Int(1));
        let out = render("[IF $x == 1 ? \"one\"]", NodeType::Text, false, &mut store);
        assert_eq!(out, ERROR_MARKER_INLINE.trim());
    }

    #[test]
    fn inline_condition_bad_expression_is_error() {
        let mut store = VarStore::new();
        let out = render(
            "[IF $ghost ? \"a\" : \"b\"] tail",
            NodeType::Text,
            false,
            &mut store,
        );
        assert_eq!(out, "--ERROR--  tail");
    }

    #[test]
    fn todo_blocks_vanish() {
        let mut store = VarStore::new();
        assert_eq!(
            render("Before [TODO fix pacing] after", NodeType::Text, false, &mut store),
            "Before  after"
        );
    }

    #[test]
    fn markers_set_flags_and_disappear() {
        let project = project_with_text("[-]once [+]fallback");
        let mut variations = VariationRegistry::build(&project);
        let mut states = ElementStates::new();
        let mut store = VarStore::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = RenderCtx {
            store: &mut store,
            variations: &mut variations,
            states: &mut states,
            rng: &mut rng,
        };
        let out = render_element("[-]once [+]fallback", "e1", NodeType::Choice, false, &mut ctx);
        assert_eq!(out, "once fallback");
        assert!(states.get("e1").just_once);
        assert!(states.get("e1").if_no_more);
        assert!(states.get("e1").visited);
    }

    #[test]
    fn single_variable_substitutes() {
        let mut store = VarStore::new();
        store.set(Scope::Global, "n", Value::Int(1));
        assert_eq!(render("n={$n}", NodeType::Text, false, &mut store), "n=1");
    }

    #[test]
    fn effect_block_drops_but_applies() {
        let mut store = VarStore::new();
        store.set(Scope::Global, "n", Value::Int(0));
        let out = render("tick{$n = $n + 1}tock", NodeType::Text, false, &mut store);
        assert_eq!(out, "ticktock");
        assert_eq!(store.get(Scope::Global, "n"), Some(&Value::Int(1)));
    }

    #[test]
    fn bad_expression_leaves_marker() {
        let mut store = VarStore::new();
        let out = render("x={$ghost}", NodeType::Text, false, &mut store);
        assert_eq!(out, format!("x={}", ERROR_MARKER));
    }

    #[test]
    fn choice_assignment_deferred_until_forced() {
        let mut store = VarStore::new();
        store.set(Scope::Global, "gold", Value::Int(0));

        let out = render("Buy{$gold = 10}", NodeType::Choice, false, &mut store);
        assert_eq!(out, "Buy");
        assert_eq!(store.get(Scope::Global, "gold"), Some(&Value::Int(0)));

        render("Buy{$gold = 10}", NodeType::Choice, true, &mut store);
        assert_eq!(store.get(Scope::Global, "gold"), Some(&Value::Int(10)));
    }

    #[test]
    fn choice_equality_also_deferred() {
        // The '=' scan is literal, so comparisons defer too — and thus show
        // nothing pre-display.
        let mut store = VarStore::new();
        store.set(Scope::Global, "gold", Value::Int(10));
        let out = render("Pay {$gold == 10}", NodeType::Choice, false, &mut store);
        assert_eq!(out, "Pay");
    }

    #[test]
    fn whitespace_normalization() {
        let mut store = VarStore::new();
        assert_eq!(
            render("<br> hi&nbsp;there <br>", NodeType::Text, false, &mut store),
            "hi there"
        );
    }

    #[test]
    fn eval_whole_text_without_braces() {
        let mut store = VarStore::new();
        store.set(Scope::Global, "n", Value::Int(2));
        let value = eval_element_expressions("$n > 1", &mut store).unwrap();
        assert!(value.is_truthy());
    }

    #[test]
    fn clean_markup_strips_authoring_syntax() {
        let cleaned = clean_markup("[-]Take the [[LIST rusty|shiny]] key [TODO check] now");
        assert_eq!(cleaned, "Take the rusty key  now");
    }

    #[test]
    fn resolve_single_vars_is_read_only() {
        let mut store = VarStore::new();
        store.set(Scope::Global, "who", Value::Str("Ada".to_string()));
        let out = resolve_single_vars("hi {$who}, {$missing} {$who = 1}", &store);
        assert_eq!(out, "hi Ada, {$missing} {$who = 1}");
        assert_eq!(
            store.get(Scope::Global, "who"),
            Some(&Value::Str("Ada".to_string()))
        );
    }

    #[test]
    fn eval_braced_blocks_in_order() {
        let mut store = VarStore::new();
        store.set(Scope::Global, "n", Value::Int(0));
        let value = eval_element_expressions("{$n = 2}{$n > 1}", &mut store).unwrap();
        assert!(value.is_truthy());
        assert_eq!(store.get(Scope::Global, "n"), Some(&Value::Int(2)));
    }
}
