use summarion::{
    error::SummarizeErrorKind,
    modes::ResolvedMode,
    parser::{WindowContext, parse},
};

use crate::{hash_for, window_messages};

#[test]
fn given_bullets_with_bracketed_ids_when_parsing_then_fallback_is_flagged() {
    let messages = window_messages();
    let mode = ResolvedMode::resolve("pointwise").expect("mode");
    let hash = hash_for(&mode, &messages);
    let ctx = WindowContext::new(mode, &hash, &messages);
    let raw = "Here is the summary:\n- Launch moves to friday [m1, m3]\n- Dana sends the deck (m2)\n- A remark with no source";

    let result = parse(raw, mode.schema(), &ctx).expect("recovery should succeed");

    assert!(result.fallback_used());
    let texts: Vec<&str> = result.items.iter().map(|item| item.text.as_str()).collect();
    assert_eq!(texts, vec!["Launch moves to friday", "Dana sends the deck"]);
    assert_eq!(result.items[0].source_msg_ids.len(), 2);
    assert!(result.items[1].source_msg_ids.contains("m2"));
}

#[test]
fn given_unknown_ids_when_parsing_then_they_are_filtered_out() {
    let messages = window_messages();
    let mode = ResolvedMode::resolve("key_decisions").expect("mode");
    let hash = hash_for(&mode, &messages);
    let ctx = WindowContext::new(mode, &hash, &messages);
    let raw = r#"{"decisions": [
        {"decision": "Ship friday", "source_msg_ids": ["m3", "m99"]},
        {"decision": "Invented", "source_msg_ids": ["m42"]}
    ]}"#;

    let result = parse(raw, mode.schema(), &ctx).expect("recovery should keep known ids");

    assert!(result.fallback_used());
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].text, "Ship friday");
    assert_eq!(
        result.items[0].source_msg_ids.iter().collect::<Vec<_>>(),
        vec!["m3"]
    );
}

#[test]
fn given_json_wrapped_in_prose_when_parsing_then_document_is_recovered() {
    let messages = window_messages();
    let mode = ResolvedMode::resolve("timeline").expect("mode");
    let hash = hash_for(&mode, &messages);
    let ctx = WindowContext::new(mode, &hash, &messages);
    let raw = r#"Sure! {"timeline": [{"timestamp": "2024-10-04T10:00:00Z", "event": "Launch moved", "source_msg_ids": ["m3"]}]} Let me know."#;

    let result = parse(raw, mode.schema(), &ctx).expect("embedded json should be recovered");

    assert!(result.fallback_used());
    assert_eq!(result.items[0].text, "Launch moved");
    assert_eq!(
        result.items[0].attributes.get("timestamp").map(String::as_str),
        Some("2024-10-04T10:00:00Z")
    );
}

#[test]
fn given_labeled_lines_when_parsing_action_items_then_attributes_attach() {
    let messages = window_messages();
    let mode = ResolvedMode::resolve("action_items").expect("mode");
    let hash = hash_for(&mode, &messages);
    let ctx = WindowContext::new(mode, &hash, &messages);
    let raw = "Task: Send the launch deck\nOwner: Dana\nPriority: high\nSources: m2\n\nTask: Nothing cited\nOwner: nobody";

    let result = parse(raw, mode.schema(), &ctx).expect("labeled lines should be recovered");

    assert!(result.fallback_used());
    assert_eq!(result.items.len(), 1);
    let item = &result.items[0];
    assert_eq!(item.text, "Send the launch deck");
    assert_eq!(item.attributes.get("owner").map(String::as_str), Some("Dana"));
    assert_eq!(item.attributes.get("priority").map(String::as_str), Some("high"));
    assert_eq!(item.anchored_at, Some(messages[1].timestamp));
}

#[test]
fn given_bullets_citing_only_foreign_ids_when_parsing_then_malformed_output() {
    let messages = window_messages();
    let mode = ResolvedMode::resolve("pointwise").expect("mode");
    let hash = hash_for(&mode, &messages);
    let ctx = WindowContext::new(mode, &hash, &messages);

    let err = parse("- something [x1]\n- other (x2)", mode.schema(), &ctx)
        .expect_err("no known ids");

    assert_eq!(err.kind, SummarizeErrorKind::MalformedOutput);
}

#[test]
fn given_plain_sentences_citing_ids_when_parsing_then_each_line_is_an_item() {
    let messages = window_messages();
    let mode = ResolvedMode::resolve("pointwise").expect("mode");
    let hash = hash_for(&mode, &messages);
    let ctx = WindowContext::new(mode, &hash, &messages);
    let raw = "The team will ship on Friday [m1].\nEveryone agreed (m2).";

    let result = parse(raw, mode.schema(), &ctx).expect("sentences carry their ids");

    assert!(result.fallback_used());
    let texts: Vec<&str> = result.items.iter().map(|item| item.text.as_str()).collect();
    assert_eq!(texts, vec!["The team will ship on Friday.", "Everyone agreed."]);
    assert!(result.items[0].source_msg_ids.contains("m1"));
    assert!(result.items[1].source_msg_ids.contains("m2"));
}

#[test]
fn given_wrapped_bullet_when_parsing_then_continuation_ids_attach_to_it() {
    let messages = window_messages();
    let mode = ResolvedMode::resolve("pointwise").expect("mode");
    let hash = hash_for(&mode, &messages);
    let ctx = WindowContext::new(mode, &hash, &messages);
    let raw = "- ship Friday\n  as agreed in [m1, m2]\n- Dana sends the deck (m2)";

    let result = parse(raw, mode.schema(), &ctx).expect("wrapped bullet is recovered");

    assert_eq!(result.items.len(), 2);
    assert_eq!(result.items[0].text, "ship Friday as agreed in");
    assert_eq!(
        result.items[0].source_msg_ids.iter().collect::<Vec<_>>(),
        vec!["m1", "m2"]
    );
    assert_eq!(result.items[1].text, "Dana sends the deck");
}
