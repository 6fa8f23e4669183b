/// Bounds enforced on every encoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest message, header included.
    pub max_message_bytes: usize,
    pub max_message_handles: usize,
    /// Deepest nesting of out-of-line objects.
    pub max_depth: usize,
}

impl Limits {
    pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 65536;
    pub const DEFAULT_MAX_MESSAGE_HANDLES: usize = 64;
    pub const DEFAULT_MAX_DEPTH: usize = 32;

    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    pub fn with_max_message_handles(mut self, handles: usize) -> Self {
        self.max_message_handles = handles;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Whether a message of the given shape fits.
    pub fn admits(&self, bytes: usize, handles: usize) -> bool {
        bytes <= self.max_message_bytes && handles <= self.max_message_handles
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_bytes: Self::DEFAULT_MAX_MESSAGE_BYTES,
            max_message_handles: Self::DEFAULT_MAX_MESSAGE_HANDLES,
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }
}
