/// Preview — interactive console player for a story project.
///
/// Usage: preview <project.json> [--flow <name>] [--locale <code>] [--seed <n>]
///
/// Text nodes print and wait for Enter; Choice nodes print a numbered menu
/// and read the selection. `q` quits, `r` restarts the current flow.

use std::io::{self, BufRead, Write};

use story_flow::core::runtime::Runtime;
use story_flow::core::walker::StepOutcome;
use story_flow::schema::node::NodeType;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let path = args[1].clone();
    let mut flow = None;
    let mut locale = None;
    let mut seed: u64 = 42;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--flow" if i + 1 < args.len() => {
                flow = Some(args[i + 1].clone());
                i += 2;
            }
            "--locale" if i + 1 < args.len() => {
                locale = Some(args[i + 1].clone());
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                seed = args[i + 1].parse().unwrap_or(42);
                i += 2;
            }
            other => {
                eprintln!("unknown argument: {}", other);
                print_usage();
                std::process::exit(2);
            }
        }
    }

    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("cannot read {}: {}", path, err);
            std::process::exit(1);
        }
    };

    let mut builder = Runtime::builder().seed(seed).with_source(&source);
    if let Some(ref name) = flow {
        builder = builder.flow(name);
    }
    if let Some(ref code) = locale {
        builder = builder.locale(code);
    }
    let mut runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("cannot load project: {}", err);
            std::process::exit(1);
        }
    };

    println!("=== {} ===", runtime.project().name);
    println!("(Enter to continue, number to choose, r to restart, q to quit)\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut pending_element: Option<String> = None;

    loop {
        let outcome = runtime.next_node(pending_element.take().as_deref());
        match outcome {
            StepOutcome::Ended => {
                println!("\n--- THE END ---");
                break;
            }
            StepOutcome::BadJump { node_id, target } => {
                eprintln!("broken jump at node {} (target {:?})", node_id, target);
                std::process::exit(1);
            }
            StepOutcome::Emitted(node_id) => {
                let node_type = runtime
                    .get_node(Some(&node_id), None)
                    .map(|n| n.node_type)
                    .unwrap_or(NodeType::Text);
                let speaker = runtime
                    .get_node_actor(Some(&node_id))
                    .map(|a| a.name.clone());

                if node_type == NodeType::Choice {
                    if let Some(parsed) = runtime.get_parsed_text(None, false) {
                        print_line(&speaker, &parsed.text);
                    }
                    let choices = runtime.get_available_choices(None);
                    if choices.is_empty() {
                        println!("(no choices available)");
                        break;
                    }
                    for (i, choice) in choices.iter().enumerate() {
                        println!("  {}. {}", i + 1, strip_markers(&choice.text));
                    }
                    loop {
                        print!("> ");
                        let _ = io::stdout().flush();
                        let Some(Ok(input)) = lines.next() else {
                            return;
                        };
                        let input = input.trim().to_string();
                        if input == "q" {
                            return;
                        }
                        if input == "r" {
                            runtime.restart();
                            break;
                        }
                        if let Ok(n) = input.parse::<usize>() {
                            if n >= 1 && n <= choices.len() {
                                pending_element = Some(choices[n - 1].element_id.clone());
                                break;
                            }
                        }
                        println!("pick 1-{}", choices.len());
                    }
                } else {
                    if let Some(parsed) = runtime.get_parsed_text(None, false) {
                        print_line(&speaker, &strip_markers(&parsed.text));
                    }
                    let Some(Ok(input)) = lines.next() else {
                        return;
                    };
                    match input.trim() {
                        "q" => return,
                        "r" => {
                            runtime.restart();
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

fn print_line(speaker: &Option<String>, text: &str) {
    match speaker {
        Some(name) => println!("{}: {}", name, text),
        None => println!("{}", text),
    }
}

/// The renderer decides what to do with variation markers; the console
/// preview just drops them.
fn strip_markers(text: &str) -> String {
    text.replace("<variation>", "").replace("</variation>", "")
}

fn print_usage() {
    println!("Usage: preview <project.json> [--flow <name>] [--locale <code>] [--seed <n>]");
    println!();
    println!("Interactive console player: steps the story, prints emitted text");
    println!("with actor names, and reads choice selections from stdin.");
}
