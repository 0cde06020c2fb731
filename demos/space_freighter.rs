/// Space Freighter example — a small authored story walked end to end.
///
/// A mini story: wake-up call → bridge decision → cargo inspection or
/// engine trouble → docking. Demonstrates variables, conditions, choices,
/// variations, and a sub-flow, with scripted inputs so the run is
/// reproducible.
///
/// Run with: cargo run --example space_freighter

use story_flow::core::runtime::Runtime;
use story_flow::core::walker::StepOutcome;
use story_flow::schema::node::NodeType;

const PROJECT: &str = r#"{
    "_apiVersion": "1.4",
    "_name": "Space Freighter",
    "_mainLocale": { "_code": "en" },
    "_availableLocale": [{ "_code": "en", "_desc": "English" }],
    "_flowGroups": [{ "_id": "g1", "_name": "Story", "_flowIds": ["main"] }],
    "_flows": [
        {
            "_id": "main", "_name": "Main", "_slug": "main",
            "_nodes": [
                { "_id": "start", "_type": "Start", "_connections": [{ "_to": "wake" }] },
                { "_id": "wake", "_type": "Text", "_actorId": "narrator",
                  "_elements": [{ "_id": "wake-e",
                      "_localizedContents": [{ "_localeCode": "en",
                          "_text": "The klaxon drags you out of cryo. [[LIST Day one.|Another day.|You stopped counting.]]" }] }],
                  "_connections": [{ "_to": "set-fuel" }] },
                { "_id": "set-fuel", "_type": "Variables",
                  "_elements": [{ "_id": "set-fuel-e",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "{$fuel = $fuel - 10}" }] }],
                  "_connections": [{ "_to": "status" }] },
                { "_id": "status", "_type": "Text", "_actorId": "ship",
                  "_elements": [{ "_id": "status-e",
                      "_localizedContents": [{ "_localeCode": "en",
                          "_text": "Fuel at {$fuel} units. [IF $fuel > 50 ? \"Comfortable margin.\" : \"Cutting it close.\"]" }] }],
                  "_connections": [{ "_to": "bridge" }] },
                { "_id": "bridge", "_type": "Choice", "_actorId": "ship",
                  "_header": { "_id": "bridge-h",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "Orders, captain?" }] },
                  "_elements": [
                      { "_id": "opt-cargo",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "[-]Inspect the cargo hold" }] },
                      { "_id": "opt-burn",
                        "_localizedContents": [{ "_localeCode": "en", "_text": "Burn for the station{$fuel = $fuel - 20}" }] }
                  ],
                  "_connections": [
                      { "_to": "cargo-call", "_nodeElementId": "opt-cargo" },
                      { "_to": "fuel-check", "_nodeElementId": "opt-burn" }
                  ] },
                { "_id": "cargo-call", "_type": "SubFlow",
                  "_connections": [
                      { "_to": "cargo-start", "_type": "SubFlow" },
                      { "_to": "bridge" }
                  ] },
                { "_id": "fuel-check", "_type": "Condition",
                  "_elements": [{ "_id": "fuel-check-e",
                      "_localizedContents": [{ "_localeCode": "en", "_text": "{$fuel > 0}" }] }],
                  "_connections": [
                      { "_to": "dock", "_nodeElementId": "fuel-check-e" },
                      { "_to": "adrift", "_type": "FailCondition" }
                  ] },
                { "_id": "dock", "_type": "Text", "_actorId": "narrator",
                  "_elements": [{ "_id": "dock-e",
                      "_localizedContents": [{ "_localeCode": "en",
                          "_text": "The station's docking arms catch the hull. {$fuel} units to spare." }] }],
                  "_connections": [] },
                { "_id": "adrift", "_type": "Text", "_actorId": "narrator",
                  "_elements": [{ "_id": "adrift-e",
                      "_localizedContents": [{ "_localeCode": "en",
                          "_text": "The engines cough once and die. The station drifts past." }] }],
                  "_connections": [] }
            ]
        },
        {
            "_id": "cargo", "_name": "Cargo Hold", "_slug": "cargo-hold",
            "_nodes": [
                { "_id": "cargo-start", "_type": "Start", "_connections": [{ "_to": "cargo-look" }] },
                { "_id": "cargo-look", "_type": "Text", "_actorId": "narrator",
                  "_elements": [{ "_id": "cargo-look-e",
                      "_localizedContents": [{ "_localeCode": "en",
                          "_text": "Crates strapped three high. One of them is [[RND humming|ticking|leaking light]]." }] }],
                  "_connections": [] }
            ]
        }
    ],
    "_actors": [
        { "_id": "narrator", "_uid": "narrator", "_name": "Narrator", "_isNarrator": true },
        { "_id": "ship", "_uid": "ship-ai", "_name": "HELM", "_isNarrator": false }
    ],
    "_variables": [{ "_key": "fuel", "_value": "80", "_type": "int" }],
    "_labels": [{ "_key": "continue",
        "_localizedContents": [{ "_localeCode": "en", "_text": "Continue" }] }],
    "_metadata": []
}"#;

fn main() {
    let mut runtime = Runtime::builder()
        .seed(2026)
        .with_source(PROJECT)
        .build()
        .expect("demo project should load");

    println!("=== {} ===\n", runtime.project().name);

    // Scripted inputs: inspect the cargo first, then burn for the station.
    let mut script = vec!["opt-cargo", "opt-burn"].into_iter();
    let mut pending: Option<String> = None;

    loop {
        match runtime.next_node(pending.take().as_deref()) {
            StepOutcome::Ended => {
                println!("\n--- THE END ---");
                break;
            }
            StepOutcome::BadJump { node_id, target } => {
                eprintln!("broken jump at {} (target {:?})", node_id, target);
                break;
            }
            StepOutcome::Emitted(node_id) => {
                let speaker = runtime
                    .get_node_actor(Some(&node_id))
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| "???".to_string());
                let is_choice = runtime
                    .get_node(Some(&node_id), None)
                    .map(|n| n.node_type == NodeType::Choice)
                    .unwrap_or(false);

                if let Some(parsed) = runtime.get_parsed_text(None, false) {
                    println!("{}: {}", speaker, strip_markers(&parsed.text));
                }

                if is_choice {
                    let choices = runtime.get_available_choices(None);
                    for choice in &choices {
                        println!("   - {}", strip_markers(&choice.text));
                    }
                    let pick = script
                        .next()
                        .expect("scripted input ran out before the story did");
                    println!("   [captain picks: {}]", pick);
                    pending = Some(pick.to_string());
                }
            }
        }
    }
}

fn strip_markers(text: &str) -> String {
    text.replace("<variation>", "").replace("</variation>", "")
}
