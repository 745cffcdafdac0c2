use std::fmt;

/// A single payload carried in either direction of an echo call
///
/// Messages are immutable once constructed; the receiver gets its own copy.
///
/// # Examples
///
/// ```
/// use echorpc::Message;
///
/// let message = Message::new("hello");
/// assert_eq!(message.text(), "hello");
/// assert_eq!(Message::from("hello"), message);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    text: String,
}

impl Message {
    /// Creates a message carrying the given text
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Returns the message text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consumes the message, returning its text
    pub fn into_text(self) -> String {
        self.text
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
