#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
/// Role of a message in a chat conversation.
pub enum Role {
    /// System messages provide instructions to the model.
    System,
    /// User messages are sent from the user to the model.
    User,
    /// Assistant messages are responses from the model.
    Assistant,
}

impl Role {
    /// Returns the string representation used by chat templates.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single role-tagged entry of a conversation.
///
/// Serializes as `{"role": ..., "content": ...}`, which is the shape Hugging
/// Face chat templates index into.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message, typically a model reply.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Conversation accessors for anything that derefs to a slice of messages.
pub trait MessageVecExt {
    /// Content of the final entry, whatever its role.
    fn last_content(&self) -> Option<&str>;

    /// Content of the last user message.
    fn last_user(&self) -> Option<&str>;

    /// Content of the last assistant message.
    fn last_assistant(&self) -> Option<&str>;
}

impl<T: AsRef<[Message]>> MessageVecExt for T {
    fn last_content(&self) -> Option<&str> {
        self.as_ref().last().map(Message::content)
    }

    fn last_user(&self) -> Option<&str> {
        last_with_role(self.as_ref(), Role::User)
    }

    fn last_assistant(&self) -> Option<&str> {
        last_with_role(self.as_ref(), Role::Assistant)
    }
}

fn last_with_role(messages: &[Message], role: Role) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|message| message.role() == role)
        .map(Message::content)
}
