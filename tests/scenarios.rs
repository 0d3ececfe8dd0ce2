//! End-to-end coverage of a handful of concrete seed scenarios, driven
//! through the public `Engine` API exactly as a host would.

use pretty_assertions::assert_eq;

use skald::response::{Action, ErrorCode, Response, ResponseOption};
use skald::value::SimpleValue;
use skald::Engine;

fn engine_for(source: &str) -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = Engine::new(false);
    let diagnostics = engine.load(source, "scenario.ska");
    assert!(
        diagnostics.iter().all(|d| !d.is_error()),
        "unexpected parse errors: {diagnostics:?}"
    );
    engine
}

#[test]
fn scenario_1_minimal_linear_module() {
    let mut engine = engine_for("#start\nHello, world.\n");
    assert_eq!(
        engine.start(),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["Hello, world.".to_string()],
            options: vec![],
        }
    );
    assert_eq!(engine.act(0), Response::End);
}

#[test]
fn scenario_2_variable_interpolation() {
    let mut engine = engine_for("~ name = \"world\"\n#start\nHello, {name}!\n");
    assert_eq!(
        engine.start(),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["Hello, world!".to_string()],
            options: vec![],
        }
    );
    assert_eq!(engine.act(0), Response::End);
}

#[test]
fn scenario_3_conditional_beat_skip() {
    let source = "~ debug = false\n#start\n(? debug) Debug message.\nPublic message.\n";
    let mut engine = engine_for(source);
    assert_eq!(
        engine.start(),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["Public message.".to_string()],
            options: vec![],
        }
    );
}

#[test]
fn scenario_4_query_round_trip() {
    let source = "#start\n(? is_admin()) Welcome, admin.\nWelcome, guest.\n";
    let mut engine = engine_for(source);
    match engine.start() {
        Response::Query {
            call,
            expects_response,
            ..
        } => {
            assert_eq!(call.method, "is_admin");
            assert!(call.args.is_empty());
            assert!(expects_response);
        }
        other => panic!("expected Query, got {other:?}"),
    }
    assert_eq!(
        engine.answer(Some(SimpleValue::Bool(true))),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["Welcome, admin.".to_string()],
            options: vec![],
        }
    );
}

#[test]
fn scenario_5_choice_with_unavailable_option() {
    let source = concat!(
        "~ gold = 0\n",
        "#start\n",
        "You approach the vendor.\n",
        "  > Buy sword -> buy (? gold >= 10)\n",
        "  > Leave -> leave\n",
        "#buy\n",
        "The blade gleams.\n",
        "#leave\n",
        "You leave.\n",
    );
    let mut engine = engine_for(source);
    assert_eq!(
        engine.start(),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["You approach the vendor.".to_string()],
            options: vec![
                ResponseOption {
                    chunks: vec!["Buy sword".to_string()],
                    is_available: false,
                },
                ResponseOption {
                    chunks: vec!["Leave".to_string()],
                    is_available: true,
                },
            ],
        }
    );

    match engine.act(0) {
        Response::Error(err) => assert_eq!(err.code, ErrorCode::ChoiceUnavailable),
        other => panic!("expected ChoiceUnavailable, got {other:?}"),
    }

    assert_eq!(
        engine.act(1),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["You leave.".to_string()],
            options: vec![],
        }
    );
}

#[test]
fn scenario_6_switch_mutation() {
    let source = "~ flag = false\n#start\n* ~ flag =!\n#next\n{flag}\n";
    let mut engine = engine_for(source);
    assert_eq!(
        engine.start(),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["true".to_string()],
            options: vec![],
        }
    );
}

#[test]
fn dispatch_drives_the_same_path_as_the_direct_methods() {
    let mut engine = engine_for("#start\nHello, traveler.\n");
    assert_eq!(
        engine.dispatch(Action::Start),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["Hello, traveler.".to_string()],
            options: vec![],
        }
    );
    assert_eq!(
        engine.dispatch(Action::Act { choice_index: 0 }),
        Response::End
    );
}

#[test]
fn start_at_enters_a_named_block_and_unknown_tag_errors() {
    let mut engine = engine_for("#start\nFirst.\n#other\nSecond.\n");
    assert_eq!(
        engine.start_at("other"),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["Second.".to_string()],
            options: vec![],
        }
    );
    match engine.start_at("missing") {
        Response::Error(err) => assert_eq!(err.code, ErrorCode::ModuleTagNotFound),
        other => panic!("expected ModuleTagNotFound, got {other:?}"),
    }
}

#[test]
fn query_cache_resolves_a_later_text_insertion_without_a_fresh_query() {
    // Text insertions don't enqueue their own queries; a method call that
    // appears solely inside `{ ... }` text resolves straight from whatever
    // answer is already cached, defaulting to `false` if none.
    let source = "#start\n* :remember()\nValue: {remember()}\n";
    let mut engine = engine_for(source);
    match engine.start() {
        Response::Query { call, .. } => assert_eq!(call.method, "remember"),
        other => panic!("expected Query, got {other:?}"),
    }
    assert_eq!(
        engine.answer(Some(SimpleValue::Int(7))),
        Response::Content {
            attribution: "".to_string(),
            chunks: vec!["Value: ".to_string(), "7".to_string()],
            options: vec![],
        }
    );
}

#[test]
fn go_module_operation_is_emitted_as_a_response() {
    let mut engine = engine_for("#start\n* GO other.ska -> entry\n");
    assert_eq!(
        engine.start(),
        Response::GoModule {
            module_path: "other.ska".to_string(),
            start_tag: "entry".to_string(),
        }
    );
}

#[test]
fn response_round_trips_through_json() {
    // The protocol is meant to cross a host boundary that may not be Rust,
    // so its wire format is plain JSON rather than a Rust-specific encoding.
    let mut engine = engine_for("#start\n(? is_admin()) Welcome, admin.\nWelcome, guest.\n");
    let query = engine.start();
    let encoded = serde_json::to_string(&query).expect("Response serializes to JSON");
    let decoded: Response = serde_json::from_str(&encoded).expect("Response round-trips");
    assert_eq!(decoded, query);

    let action = Action::Answer {
        value: Some(SimpleValue::Bool(true)),
    };
    let encoded = serde_json::to_string(&action).expect("Action serializes to JSON");
    let decoded: Action = serde_json::from_str(&encoded).expect("Action round-trips");
    assert_eq!(decoded, action);
}

#[test]
fn exit_with_argument_carries_its_payload() {
    let mut engine = engine_for("#start\n* EXIT 42\n");
    assert_eq!(
        engine.start(),
        Response::Exit {
            argument: Some(SimpleValue::Int(42)),
        }
    );
    assert_eq!(engine.act(0), Response::End);
}
