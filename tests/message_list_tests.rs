use std::fs;
use std::path::PathBuf;

use multiprompt::{AttachmentError, ContentPart, Message, MessageList, Role};

#[test]
fn consecutive_user_messages_coalesce_into_one() {
    let mut messages = MessageList::new();
    messages.add_user_message("Hello");
    messages.add_user_message("World");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages.get_text(Some(Role::User)), "Hello\nWorld");
}

#[test]
fn system_message_never_duplicates() {
    let mut messages = MessageList::new();
    messages.add_user_message("Hi");
    messages.add_system_message("Be terse.");
    messages.add_system_message("Be kind.");

    // Exactly one system entry, and it leads the list.
    let systems = messages.get_messages(Some(Role::System));
    assert_eq!(systems.len(), 1);
    assert_eq!(messages.iter().next().unwrap().role, Role::System);
    assert_eq!(systems[0].text(), "Be terse.\nBe kind.");
}

#[test]
fn different_roles_do_not_coalesce() {
    let mut messages = MessageList::new();
    messages.add_user_message("Question");
    messages.add_assistant_message("Answer");
    messages.add_user_message("Follow-up");

    assert_eq!(messages.len(), 3);
}

#[test]
fn agent_messages_keep_their_identity() {
    let mut messages = MessageList::new();
    messages.add_agent_message("A", "from A");
    messages.add_agent_message("B", "from B");

    // Same role, different agents: no coalescing.
    assert_eq!(messages.len(), 2);
    let assistants = messages.get_messages(Some(Role::Assistant));
    assert_eq!(assistants[0].agent.as_deref(), Some("A"));
    assert_eq!(assistants[1].agent.as_deref(), Some("B"));
}

#[test]
fn example_messages_are_excluded_from_role_views() {
    let mut messages = MessageList::new();
    messages.add_example_messages(&[("Q1".to_string(), "A1".to_string())]);
    messages.add_user_message("real question");

    let users = messages.get_messages(Some(Role::User));
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].text(), "real question");

    let examples = messages.get_example_messages();
    assert_eq!(examples.len(), 2);

    let pairs = messages.get_example_pairs();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0.text(), "Q1");
    assert_eq!(pairs[0].1.text(), "A1");
}

#[test]
fn example_messages_do_not_coalesce_with_real_ones() {
    let mut messages = MessageList::new();
    messages.add_example_messages(&[("Q".to_string(), "A".to_string())]);
    messages.add_user_message("real");

    // example user + example assistant + real user
    assert_eq!(messages.len(), 3);
}

#[test]
fn accessors_return_empty_string_instead_of_failing() {
    let messages = MessageList::new();
    assert_eq!(messages.get_text(None), "");
    assert_eq!(messages.get_text(Some(Role::Assistant)), "");
    assert_eq!(messages.get_last_message_text(), "");
    assert_eq!(messages.get_last_user_message_text(), "");
}

#[test]
fn last_user_message_skips_assistant_turns() {
    let mut messages = MessageList::new();
    messages.add_user_message("first");
    messages.add_assistant_message("reply");

    assert_eq!(messages.get_last_user_message_text(), "first");
    assert_eq!(messages.get_last_message_text(), "reply");
}

#[test]
fn from_prompt_assembles_in_order() {
    let messages = MessageList::from_prompt(
        "the question",
        &[],
        Some("the system prompt"),
        &[("eg q".to_string(), "eg a".to_string())],
    )
    .unwrap();

    let roles: Vec<Role> = messages.iter().map(|msg| msg.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(messages.get_last_user_message_text(), "the question");
}

#[test]
fn text_attachment_becomes_an_appendix_part() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.md");
    fs::write(&path, "# Notes\nSome content\n").unwrap();

    let message =
        Message::with_attachments(Role::User, "See attached", &[path]).unwrap();

    assert_eq!(message.content.len(), 2);
    let appendix = message.text();
    assert!(appendix.contains("Appendix to user prompt"));
    assert!(appendix.contains("`notes.md`"));
    assert!(appendix.contains("```md\n# Notes\nSome content\n```"));
}

#[test]
fn second_text_attachment_is_marked_continued() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.txt");
    let second = dir.path().join("b.txt");
    fs::write(&first, "alpha").unwrap();
    fs::write(&second, "beta").unwrap();

    let message =
        Message::with_attachments(Role::User, "two files", &[first, second]).unwrap();

    let text = message.text();
    assert_eq!(text.matches("Appendix to user prompt (continued)").count(), 1);
}

#[test]
fn image_attachment_is_base64_encoded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pixel.png");
    fs::write(&path, [0x89u8, 0x50, 0x4e, 0x47]).unwrap();

    let message = Message::with_attachments(Role::User, "look", &[path]).unwrap();

    assert!(message.has_image());
    let image = message
        .content
        .iter()
        .find_map(|part| match part {
            ContentPart::Image { data } => Some(data.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(image, "iVBORw=="); // base64 of the PNG magic bytes
}

#[test]
fn video_attachment_is_a_caller_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");
    fs::write(&path, "not really a video").unwrap();

    let err = Message::with_attachments(Role::User, "watch", &[path]).unwrap_err();
    assert!(matches!(err, AttachmentError::Unsupported { .. }));
}

#[test]
fn missing_attachment_is_a_caller_error() {
    let err = Message::with_attachments(
        Role::User,
        "oops",
        &[PathBuf::from("/definitely/not/here.txt")],
    )
    .unwrap_err();
    assert!(matches!(err, AttachmentError::Unreadable { .. }));
}

#[test]
fn non_utf8_attachment_is_a_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.bin");
    fs::write(&path, [0xffu8, 0xfe, 0x00, 0x01]).unwrap();

    let err = Message::with_attachments(Role::User, "data", &[path]).unwrap_err();
    assert!(matches!(err, AttachmentError::NotUtf8 { .. }));
}

#[test]
fn wire_shape_flattens_to_role_and_text() {
    let mut messages = MessageList::new();
    messages.add_system_message("steer");
    messages.add_user_message("ask");

    let wire = messages.to_wire();
    assert_eq!(wire.len(), 2);
    assert_eq!(wire[0].role, "system");
    assert_eq!(wire[0].content, "steer");
    assert_eq!(wire[1].role, "user");
    assert_eq!(wire[1].content, "ask");
}
