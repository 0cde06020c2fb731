/// Walker integration tests — stepping through whole projects: variables,
/// conditions, sub-flows, jumps, and choice lifecycles.

use story_flow::core::runtime::Runtime;
use story_flow::core::walker::StepOutcome;

fn project_json(body: &str) -> String {
    format!(
        r#"{{
            "_apiVersion": "1.4",
            "_name": "it",
            "_mainLocale": {{ "_code": "en" }},
            "_flowGroups": [{{ "_id": "g1", "_name": "g", "_flowIds": ["f1"] }}],
            {}
        }}"#,
        body
    )
}

fn runtime(source: &str) -> Runtime {
    Runtime::builder()
        .seed(42)
        .with_source(source)
        .build()
        .unwrap()
}

fn emitted(rt: &mut Runtime, element_id: Option<&str>) -> String {
    match rt.next_node(element_id) {
        StepOutcome::Emitted(id) => id,
        other => panic!("expected an emitted node, got {:?}", other),
    }
}

#[test]
fn variables_node_increments_before_text() {
    // $n starts at 0; a Variables node bumps it; the Text node shows it.
    let source = project_json(
        r#""_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "vars" }] },
                { "_id": "vars", "_type": "Variables",
                  "_elements": [{ "_id": "ve",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "{$n = $n + 1}" }] }],
                  "_connections": [{ "_to": "show" }] },
                { "_id": "show", "_type": "Text",
                  "_elements": [{ "_id": "se",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "n={$n}" }] }],
                  "_connections": [] }
            ]
        }],
        "_actors": [], "_labels": [], "_metadata": [],
        "_variables": [{ "_key": "n", "_value": "0", "_type": "int" }]"#,
    );
    let mut rt = runtime(&source);
    assert_eq!(emitted(&mut rt, None), "show");
    assert_eq!(rt.get_parsed_text(None, false).unwrap().text, "n=1");
    assert_eq!(rt.next_node(None), StepOutcome::Ended);
}

#[test]
fn condition_falls_through_to_fail_connection() {
    // $n == 0, so the guard is false and the fail edge is taken.
    let source = project_json(
        r#""_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "check" }] },
                { "_id": "check", "_type": "Condition",
                  "_elements": [{ "_id": "ce",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "{$n > 0}" }] }],
                  "_connections": [
                      { "_to": "pos", "_nodeElementId": "ce" },
                      { "_to": "zero", "_type": "FailCondition" }
                  ] },
                { "_id": "pos", "_type": "Text",
                  "_elements": [{ "_id": "pe",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "positive" }] }],
                  "_connections": [] },
                { "_id": "zero", "_type": "Text",
                  "_elements": [{ "_id": "ze",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "zero" }] }],
                  "_connections": [] }
            ]
        }],
        "_actors": [], "_labels": [], "_metadata": [],
        "_variables": [{ "_key": "n", "_value": "0", "_type": "int" }]"#,
    );
    let mut rt = runtime(&source);
    assert_eq!(emitted(&mut rt, None), "zero");
    assert_eq!(rt.get_parsed_text(None, false).unwrap().text, "zero");
}

#[test]
fn condition_takes_first_truthy_element() {
    let source = project_json(
        r#""_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "check" }] },
                { "_id": "check", "_type": "Condition",
                  "_elements": [
                      { "_id": "c1",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "{$n > 10}" }] },
                      { "_id": "c2",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "{$n > 0}" }] }
                  ],
                  "_connections": [
                      { "_to": "big", "_nodeElementId": "c1" },
                      { "_to": "small", "_nodeElementId": "c2" },
                      { "_to": "none", "_type": "FailCondition" }
                  ] },
                { "_id": "big", "_type": "Text",
                  "_elements": [{ "_id": "be",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "big" }] }],
                  "_connections": [] },
                { "_id": "small", "_type": "Text",
                  "_elements": [{ "_id": "sme",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "small" }] }],
                  "_connections": [] },
                { "_id": "none", "_type": "Text",
                  "_elements": [{ "_id": "ne",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "none" }] }],
                  "_connections": [] }
            ]
        }],
        "_actors": [], "_labels": [], "_metadata": [],
        "_variables": [{ "_key": "n", "_value": "3", "_type": "int" }]"#,
    );
    let mut rt = runtime(&source);
    assert_eq!(emitted(&mut rt, None), "small");
}

#[test]
fn loop_cycle_repeats_element_sequence() {
    // A self-connected Loop text node steps A, B, A, B.
    let source = project_json(
        r#""_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "cycle" }] },
                { "_id": "cycle", "_type": "Text", "_cycleType": "Loop",
                  "_elements": [
                      { "_id": "l1",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "A" }] },
                      { "_id": "l2",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "B" }] }
                  ],
                  "_connections": [{ "_to": "cycle" }] }
            ]
        }],
        "_actors": [], "_variables": [], "_labels": [], "_metadata": []"#,
    );
    let mut rt = runtime(&source);
    let mut seen = Vec::new();
    for _ in 0..4 {
        assert_eq!(emitted(&mut rt, None), "cycle");
        seen.push(rt.get_parsed_text(None, false).unwrap().text);
    }
    assert_eq!(seen, vec!["A", "B", "A", "B"]);
}

#[test]
fn sub_flow_call_and_resume() {
    // Main calls the side flow; after the side flow runs dry the cursor
    // resumes on the caller's exit edge.
    let source = project_json(
        r#""_flows": [
            {
                "_id": "f1", "_name": "Main", "_slug": "main",
                "_nodes": [
                    { "_id": "start", "_type": "Start", "_connections": [{ "_to": "call" }] },
                    { "_id": "call", "_type": "SubFlow",
                      "_connections": [
                          { "_to": "side-start", "_type": "SubFlow" },
                          { "_to": "after" }
                      ] },
                    { "_id": "after", "_type": "Text",
                      "_elements": [{ "_id": "ae",
                          "_localizedContents": [{ "_localeCode": "en", "_text": "back home" }] }],
                      "_connections": [] }
                ]
            },
            {
                "_id": "f2", "_name": "Side", "_slug": "side",
                "_nodes": [
                    { "_id": "side-start", "_type": "Start", "_connections": [{ "_to": "side-line" }] },
                    { "_id": "side-line", "_type": "Text",
                      "_elements": [{ "_id": "sle",
                          "_localizedContents": [{ "_localeCode": "en", "_text": "in the side flow" }] }],
                      "_connections": [] }
                ]
            }
        ],
        "_actors": [], "_variables": [], "_labels": [], "_metadata": []"#,
    );
    let mut rt = runtime(&source);
    assert_eq!(emitted(&mut rt, None), "side-line");
    assert_eq!(
        rt.get_parsed_text(None, false).unwrap().text,
        "in the side flow"
    );
    assert_eq!(emitted(&mut rt, None), "after");
    assert_eq!(rt.get_parsed_text(None, false).unwrap().text, "back home");
    assert_eq!(rt.next_node(None), StepOutcome::Ended);
}

#[test]
fn jump_to_node_crosses_flows() {
    let source = project_json(
        r#""_flows": [
            {
                "_id": "f1", "_name": "Main", "_slug": "main",
                "_nodes": [
                    { "_id": "start", "_type": "Start", "_connections": [{ "_to": "jump" }] },
                    { "_id": "jump", "_type": "JumpToNode",
                      "_jumpTo": { "_flowId": "f2", "_nodeId": "dest" },
                      "_connections": [] }
                ]
            },
            {
                "_id": "f2", "_name": "Other", "_slug": "other",
                "_nodes": [
                    { "_id": "other-start", "_type": "Start", "_connections": [{ "_to": "dest" }] },
                    { "_id": "dest", "_type": "Text",
                      "_elements": [{ "_id": "de",
                          "_localizedContents": [{ "_localeCode": "en", "_text": "landed" }] }],
                      "_connections": [] }
                ]
            }
        ],
        "_actors": [], "_variables": [], "_labels": [], "_metadata": []"#,
    );
    let mut rt = runtime(&source);
    assert_eq!(emitted(&mut rt, None), "dest");
    assert_eq!(rt.get_selected_flow().unwrap().id, "f2");
    assert_eq!(rt.get_parsed_text(None, false).unwrap().text, "landed");
}

#[test]
fn bad_jump_is_surfaced_and_cursor_stays() {
    let source = project_json(
        r#""_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "jump" }] },
                { "_id": "jump", "_type": "JumpToNode",
                  "_jumpTo": { "_flowId": "missing", "_nodeId": "nowhere" },
                  "_connections": [] }
            ]
        }],
        "_actors": [], "_variables": [], "_labels": [], "_metadata": []"#,
    );
    let mut rt = runtime(&source);
    match rt.next_node(None) {
        StepOutcome::BadJump { node_id, .. } => assert_eq!(node_id, "jump"),
        other => panic!("expected BadJump, got {:?}", other),
    }
    assert_eq!(rt.selected_node_id(), Some("jump"));
    assert!(!rt.is_ended());
}

/// Choice graph used by the choice lifecycle tests: picking an option loops
/// back to the same Choice node through its response line.
fn choice_project() -> String {
    project_json(
        r#""_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "ask" }] },
                { "_id": "ask", "_type": "Choice",
                  "_header": { "_id": "he",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "What now?" }] },
                  "_elements": [
                      { "_id": "opt-ask",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "[-]Ask about the cargo" }] },
                      { "_id": "opt-wait",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "Wait in silence" }] },
                      { "_id": "opt-leave",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "[+]Leave the bridge" }] }
                  ],
                  "_connections": [
                      { "_to": "r-ask", "_nodeElementId": "opt-ask" },
                      { "_to": "r-wait", "_nodeElementId": "opt-wait" },
                      { "_to": "r-leave", "_nodeElementId": "opt-leave" }
                  ] },
                { "_id": "r-ask", "_type": "Text",
                  "_elements": [{ "_id": "rae",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "Sealed manifest." }] }],
                  "_connections": [{ "_to": "ask" }] },
                { "_id": "r-wait", "_type": "Text",
                  "_elements": [{ "_id": "rwe",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "Minutes pass." }] }],
                  "_connections": [{ "_to": "ask" }] },
                { "_id": "r-leave", "_type": "Text",
                  "_elements": [{ "_id": "rle",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "You go." }] }],
                  "_connections": [] }
            ]
        }],
        "_actors": [], "_variables": [], "_labels": [], "_metadata": []"#,
    )
}

#[test]
fn choice_header_is_the_parsed_text() {
    let source = choice_project();
    let mut rt = runtime(&source);
    assert_eq!(emitted(&mut rt, None), "ask");
    assert_eq!(rt.get_parsed_text(None, false).unwrap().text, "What now?");
}

#[test]
fn fallback_choice_is_hidden_while_normal_options_remain() {
    let source = choice_project();
    let mut rt = runtime(&source);
    emitted(&mut rt, None);
    let choices = rt.get_available_choices(None);
    let ids: Vec<&str> = choices.iter().map(|c| c.element_id.as_str()).collect();
    assert_eq!(ids, vec!["opt-ask", "opt-wait"]);
    assert_eq!(choices[0].text, "Ask about the cargo");
}

#[test]
fn just_once_choice_disappears_after_selection() {
    let source = choice_project();
    let mut rt = runtime(&source);
    emitted(&mut rt, None);
    rt.get_available_choices(None);

    // Pick the one-shot option; its response loops back to the choice.
    assert_eq!(emitted(&mut rt, Some("opt-ask")), "r-ask");
    assert_eq!(emitted(&mut rt, None), "ask");
    let ids: Vec<String> = rt
        .get_available_choices(None)
        .into_iter()
        .map(|c| c.element_id)
        .collect();
    assert_eq!(ids, vec!["opt-wait"]);
}

#[test]
fn repeatable_choice_stays_available() {
    let source = choice_project();
    let mut rt = runtime(&source);
    emitted(&mut rt, None);
    rt.get_available_choices(None);

    for _ in 0..2 {
        assert_eq!(emitted(&mut rt, Some("opt-wait")), "r-wait");
        assert_eq!(emitted(&mut rt, None), "ask");
        let ids: Vec<String> = rt
            .get_available_choices(None)
            .into_iter()
            .map(|c| c.element_id)
            .collect();
        assert!(ids.contains(&"opt-wait".to_string()));
    }
}

#[test]
fn exhausted_choices_leave_only_fallbacks() {
    // Both normal options are one-shot; once they burn, only the [+]
    // fallback remains on offer.
    let source = project_json(
        r#""_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "ask" }] },
                { "_id": "ask", "_type": "Choice",
                  "_elements": [
                      { "_id": "a",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "[-]First" }] },
                      { "_id": "b",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "[-]Second" }] },
                      { "_id": "out",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "[+]Give up" }] }
                  ],
                  "_connections": [
                      { "_to": "echo", "_nodeElementId": "a" },
                      { "_to": "echo", "_nodeElementId": "b" },
                      { "_to": "echo", "_nodeElementId": "out" }
                  ] },
                { "_id": "echo", "_type": "Text",
                  "_elements": [{ "_id": "ee",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "..." }] }],
                  "_connections": [{ "_to": "ask" }] }
            ]
        }],
        "_actors": [], "_variables": [], "_labels": [], "_metadata": []"#,
    );
    let mut rt = runtime(&source);
    emitted(&mut rt, None);
    assert_eq!(rt.get_available_choices(None).len(), 2);

    emitted(&mut rt, Some("a"));
    emitted(&mut rt, None);
    assert_eq!(rt.get_available_choices(None).len(), 1);

    emitted(&mut rt, Some("b"));
    emitted(&mut rt, None);
    let remaining = rt.get_available_choices(None);
    let ids: Vec<&str> = remaining.iter().map(|c| c.element_id.as_str()).collect();
    assert_eq!(ids, vec!["out"]);
    assert_eq!(remaining[0].text, "Give up");
}

#[test]
fn deterministic_replay_with_fixed_inputs() {
    // No Random/RND anywhere: two runs with the same inputs match exactly.
    let source = choice_project();
    let mut transcripts = Vec::new();
    for _ in 0..2 {
        let mut rt = runtime(&source);
        let mut log = Vec::new();
        emitted(&mut rt, None);
        log.push(rt.get_parsed_text(None, false).unwrap().text);
        for choice in rt.get_available_choices(None) {
            log.push(choice.text);
        }
        emitted(&mut rt, Some("opt-ask"));
        log.push(rt.get_parsed_text(None, false).unwrap().text);
        transcripts.push(log);
    }
    assert_eq!(transcripts[0], transcripts[1]);
}

#[test]
fn sequence_node_dispatches_in_list_order() {
    let source = project_json(
        r#""_flows": [{
            "_id": "f1", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "seq" }] },
                { "_id": "seq", "_type": "Sequence", "_cycleType": "List",
                  "_elements": [
                      { "_id": "s1", "_localizedContents": [{ "_localeCode": "en", "_text": "first" }] },
                      { "_id": "s2", "_localizedContents": [{ "_localeCode": "en", "_text": "second" }] }
                  ],
                  "_connections": [
                      { "_to": "t1", "_nodeElementId": "s1" },
                      { "_to": "t2", "_nodeElementId": "s2" }
                  ] },
                { "_id": "t1", "_type": "Text",
                  "_elements": [{ "_id": "t1e",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "one" }] }],
                  "_connections": [{ "_to": "seq" }] },
                { "_id": "t2", "_type": "Text",
                  "_elements": [{ "_id": "t2e",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "two" }] }],
                  "_connections": [{ "_to": "seq" }] }
            ]
        }],
        "_actors": [], "_variables": [], "_labels": [], "_metadata": []"#,
    );
    let mut rt = runtime(&source);
    assert_eq!(emitted(&mut rt, None), "t1");
    assert_eq!(emitted(&mut rt, None), "t2");
    // List sticks on its last element once exhausted.
    assert_eq!(emitted(&mut rt, None), "t2");
}
