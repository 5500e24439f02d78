//! Captured frames.

/// One rendered frame: an opaque encoded image byte buffer.
///
/// Frames carry no explicit index; ordering is by arrival, and the
/// capture pipeline guarantees frames are never reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Encoded image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte length of the encoded image.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the frame, yielding its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}
