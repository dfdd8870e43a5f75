//! Role-tagged conversation history with attachment expansion.
//!
//! A [`Message`] is an ordered list of content parts (text or base64 image)
//! under a [`Role`]. A [`MessageList`] keeps the conversation invariants:
//!
//! * at most one **leading** system message — adding another system message
//!   concatenates its content into the existing one instead of duplicating it;
//! * consecutive non-system messages of the same role coalesce the same way;
//! * few-shot example messages (the `example` flag) never coalesce into their
//!   non-example neighbours and are excluded from role-scoped queries unless
//!   asked for explicitly.
//!
//! File attachments are expanded at construction time: recognised image files
//! become base64 image parts, everything else is read as UTF-8 and appended as
//! a fenced appendix section headed by the file's path. An unreadable file, a
//! non-UTF-8 text file, or an unsupported media type is an [`AttachmentError`]
//! for the caller — never a silent drop.
//!
//! # Example
//!
//! ```rust
//! use multiprompt::{MessageList, Role};
//!
//! let mut messages = MessageList::new();
//! messages.add_system_message("You are terse.");
//! messages.add_user_message("Hello");
//! messages.add_user_message("World");
//!
//! // The two user messages coalesced into one.
//! assert_eq!(messages.len(), 2);
//! assert_eq!(messages.get_text(Some(Role::User)), "Hello\nWorld");
//! ```

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::multiprompt::token_source::WireMessage;

/// File extensions recognised as images and inlined as base64 content parts.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

/// File extensions recognised as video. Video cannot be inlined, so attaching
/// one is a caller error rather than a silent drop.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv"];

/// Represents the possible roles for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Set by the developer to steer the model's responses.
    System,
    /// A message sent by a human user (or app user).
    User,
    /// Content generated by a model in response to a user message.
    Assistant,
}

impl Role {
    /// The lowercase wire name of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
    /// An image, base64-encoded.
    Image {
        /// Base64 payload of the image file.
        data: String,
    },
}

/// Errors raised while expanding message attachments.
///
/// These surface synchronously from message construction and abort only the
/// message being built.
#[derive(Debug)]
pub enum AttachmentError {
    /// The file could not be read from disk.
    Unreadable {
        /// Path of the offending attachment.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// The file was read but is not valid UTF-8 text.
    NotUtf8 {
        /// Path of the offending attachment.
        path: PathBuf,
    },
    /// The file's media type cannot be inlined (e.g. video).
    Unsupported {
        /// Path of the offending attachment.
        path: PathBuf,
    },
}

impl fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentError::Unreadable { path, source } => {
                write!(f, "cannot read attachment {}: {}", path.display(), source)
            }
            AttachmentError::NotUtf8 { path } => {
                write!(f, "attachment {} is not valid UTF-8", path.display())
            }
            AttachmentError::Unsupported { path } => {
                write!(f, "unsupported attachment type: {}", path.display())
            }
        }
    }
}

impl Error for AttachmentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AttachmentError::Unreadable { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// A single role-tagged message.
///
/// Content is never empty after construction: even an empty prompt string
/// yields one (empty) text part, matching the behaviour callers rely on when
/// echoing the user's turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// Ordered content parts.
    pub content: Vec<ContentPart>,
    /// Marks a few-shot example turn.
    #[serde(default, skip_serializing_if = "is_false")]
    pub example: bool,
    /// Name of the agent that produced this message, when it was generated by
    /// one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl Message {
    /// Build a plain text message.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Message {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
            example: false,
            agent: None,
        }
    }

    /// Build a text message flagged as a few-shot example.
    pub fn example(role: Role, text: impl Into<String>) -> Self {
        let mut message = Message::new(role, text);
        message.example = true;
        message
    }

    /// Build an assistant message tagged with the agent that produced it.
    pub fn from_agent(agent_name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Message::new(Role::Assistant, text);
        message.agent = Some(agent_name.into());
        message
    }

    /// Build a text message and expand `attachments` into additional content
    /// parts.
    ///
    /// Image files are base64-encoded into [`ContentPart::Image`] parts; any
    /// other readable UTF-8 file is appended as a fenced appendix section headed
    /// by the file's path relative to the attachments' common root. Video files
    /// and unreadable or non-UTF-8 files fail with [`AttachmentError`].
    pub fn with_attachments(
        role: Role,
        text: impl Into<String>,
        attachments: &[PathBuf],
    ) -> Result<Self, AttachmentError> {
        let mut message = Message::new(role, text);
        expand_attachments(&mut message.content, attachments)?;
        Ok(message)
    }

    /// Newline-joined text of every text content part.
    pub fn text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect();
        parts.join("\n")
    }

    /// Whether any content part is an image.
    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, ContentPart::Image { .. }))
    }

    /// Whether this message can coalesce with `other` (same role, same example
    /// flag, same producing agent).
    fn coalesces_with(&self, other: &Message) -> bool {
        self.role == other.role && self.example == other.example && self.agent == other.agent
    }

    /// Append `other`'s content parts onto this message.
    fn merge(&mut self, other: Message) {
        self.content.extend(other.content);
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]\n{}", self.role.as_str().to_uppercase(), self.text())
    }
}

/// An ordered list of [`Message`]s upholding the coalescing invariants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageList {
    messages: Vec<Message>,
}

impl MessageList {
    /// Create an empty list.
    pub fn new() -> Self {
        MessageList::default()
    }

    /// Build a list from the usual prompt ingredients: optional system prompt,
    /// optional few-shot examples, then the user prompt with its attachments.
    pub fn from_prompt(
        user_prompt: &str,
        attachments: &[PathBuf],
        system_prompt: Option<&str>,
        example_prompts: &[(String, String)],
    ) -> Result<Self, AttachmentError> {
        let mut messages = MessageList::new();
        if let Some(system) = system_prompt {
            if !system.is_empty() {
                messages.add_system_message(system);
            }
        }
        messages.add_example_messages(example_prompts);
        messages.add_message(Role::User, user_prompt, attachments, false)?;
        Ok(messages)
    }

    /// Number of messages in the list.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Iterate over the messages in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Insert a built message, applying the coalescing rules.
    ///
    /// System messages merge into (or become) the single leading system entry;
    /// any other message merges into the tail entry when role, example flag and
    /// agent tag all match, and is appended otherwise.
    pub fn push(&mut self, message: Message) {
        if message.role == Role::System {
            match self.messages.first_mut() {
                Some(first) if first.coalesces_with(&message) => first.merge(message),
                _ => self.messages.insert(0, message),
            }
        } else {
            match self.messages.last_mut() {
                Some(last) if last.coalesces_with(&message) => last.merge(message),
                _ => self.messages.push(message),
            }
        }
    }

    /// Construct a message from its pieces and insert it.
    ///
    /// Attachment expansion failures abort only this message; the list is left
    /// untouched.
    pub fn add_message(
        &mut self,
        role: Role,
        content: impl Into<String>,
        attachments: &[PathBuf],
        example: bool,
    ) -> Result<(), AttachmentError> {
        let mut message = Message::with_attachments(role, content, attachments)?;
        message.example = example;
        self.push(message);
        Ok(())
    }

    /// Add (or merge) a system message.
    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.push(Message::new(Role::System, content));
    }

    /// Add a user message.
    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(Message::new(Role::User, content));
    }

    /// Add an assistant message.
    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(Message::new(Role::Assistant, content));
    }

    /// Add an assistant message tagged with the producing agent's name.
    pub fn add_agent_message(&mut self, agent_name: &str, content: impl Into<String>) {
        self.push(Message::from_agent(agent_name, content));
    }

    /// Add (question, answer) pairs as example-flagged user/assistant turns.
    pub fn add_example_messages(&mut self, example_prompts: &[(String, String)]) {
        for (question, answer) in example_prompts {
            self.push(Message::example(Role::User, question.clone()));
            self.push(Message::example(Role::Assistant, answer.clone()));
        }
    }

    /// Messages matching `role`, excluding examples; all messages when `role`
    /// is `None`.
    pub fn get_messages(&self, role: Option<Role>) -> Vec<&Message> {
        match role {
            Some(role) => self
                .messages
                .iter()
                .filter(|msg| msg.role == role && !msg.example)
                .collect(),
            None => self.messages.iter().collect(),
        }
    }

    /// Every example-flagged message, in order.
    pub fn get_example_messages(&self) -> Vec<&Message> {
        self.messages.iter().filter(|msg| msg.example).collect()
    }

    /// Example messages zipped into (question, answer) pairs.
    pub fn get_example_pairs(&self) -> Vec<(&Message, &Message)> {
        let examples = self.get_example_messages();
        examples
            .chunks(2)
            .filter_map(|pair| match pair {
                [question, answer] => Some((*question, *answer)),
                _ => None,
            })
            .collect()
    }

    /// Newline-joined text of all text parts across messages matching `role`
    /// (all messages when `None`). Empty string on no match.
    pub fn get_text(&self, role: Option<Role>) -> String {
        let texts: Vec<String> = self
            .get_messages(role)
            .iter()
            .map(|msg| msg.text())
            .collect();
        texts.join("\n")
    }

    /// The last message, if any.
    pub fn get_last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The last non-example user message, if any.
    pub fn get_last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|msg| msg.role == Role::User && !msg.example)
    }

    /// Text of the last user message; empty string when there is none.
    pub fn get_last_user_message_text(&self) -> String {
        self.get_last_user_message()
            .map(|msg| msg.text())
            .unwrap_or_default()
    }

    /// Text of the last message; empty string when the list is empty.
    pub fn get_last_message_text(&self) -> String {
        self.get_last_message()
            .map(|msg| msg.text())
            .unwrap_or_default()
    }

    /// Remove every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Flatten to the text-only wire shape backends consume.
    ///
    /// Image parts are not representable on the chat-completions text surface
    /// and are left out of the wire content.
    pub fn to_wire(&self) -> Vec<WireMessage> {
        self.messages
            .iter()
            .map(|msg| WireMessage {
                role: msg.role.as_str().to_string(),
                content: msg.text(),
            })
            .collect()
    }
}

impl fmt::Display for MessageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.messages.iter().map(|msg| msg.to_string()).collect();
        f.write_str(&rendered.join("\n\n"))
    }
}

impl<'a> IntoIterator for &'a MessageList {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Whether the path looks like an image we can inline.
pub fn is_image(path: &Path) -> bool {
    IMAGE_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Whether the path looks like a video file.
pub fn is_video(path: &Path) -> bool {
    VIDEO_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Longest shared ancestor directory of the given paths.
fn common_root(paths: &[PathBuf]) -> PathBuf {
    let mut root: Option<PathBuf> = None;
    for path in paths {
        let parent = path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();
        root = Some(match root {
            None => parent,
            Some(current) => {
                let mut shared = PathBuf::new();
                for (a, b) in current.components().zip(parent.components()) {
                    if a == b {
                        shared.push(a.as_os_str());
                    } else {
                        break;
                    }
                }
                shared
            }
        });
    }
    root.unwrap_or_default()
}

fn expand_attachments(
    content: &mut Vec<ContentPart>,
    attachments: &[PathBuf],
) -> Result<(), AttachmentError> {
    if attachments.is_empty() {
        return Ok(());
    }
    let root = common_root(attachments);
    let mut text_attachment_count = 0usize;
    for path in attachments {
        if is_image(path) {
            let bytes = fs::read(path).map_err(|source| AttachmentError::Unreadable {
                path: path.clone(),
                source,
            })?;
            content.push(ContentPart::Image {
                data: BASE64.encode(bytes),
            });
        } else if is_video(path) {
            return Err(AttachmentError::Unsupported { path: path.clone() });
        } else {
            let bytes = fs::read(path).map_err(|source| AttachmentError::Unreadable {
                path: path.clone(),
                source,
            })?;
            let file_content = String::from_utf8(bytes)
                .map_err(|_| AttachmentError::NotUtf8 { path: path.clone() })?;
            let relative = path.strip_prefix(&root).unwrap_or(path);
            let continued = if text_attachment_count > 0 {
                " (continued)"
            } else {
                ""
            };
            content.push(ContentPart::Text {
                text: format!(
                    "## Appendix to user prompt{}\n\n### Contents of file: `{}`\n\n```{}\n{}```",
                    continued,
                    relative.display(),
                    extension_of(path),
                    file_content
                ),
            });
            text_attachment_count += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_detection_is_case_insensitive() {
        assert!(is_image(Path::new("photo.PNG")));
        assert!(is_image(Path::new("photo.jpeg")));
        assert!(!is_image(Path::new("notes.txt")));
    }

    #[test]
    fn video_is_detected_but_not_an_image() {
        assert!(is_video(Path::new("clip.mp4")));
        assert!(!is_image(Path::new("clip.mp4")));
    }

    #[test]
    fn common_root_of_siblings_is_their_parent() {
        let paths = vec![
            PathBuf::from("/tmp/project/src/a.rs"),
            PathBuf::from("/tmp/project/src/b.rs"),
        ];
        assert_eq!(common_root(&paths), PathBuf::from("/tmp/project/src"));
    }

    #[test]
    fn common_root_spans_directories() {
        let paths = vec![
            PathBuf::from("/tmp/project/src/a.rs"),
            PathBuf::from("/tmp/project/docs/readme.md"),
        ];
        assert_eq!(common_root(&paths), PathBuf::from("/tmp/project"));
    }
}
