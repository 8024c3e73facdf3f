use std::collections::VecDeque;

/// The most recent `limit` bytes of a session's output.
#[derive(Debug)]
pub struct Scrollback {
    bytes: VecDeque<u8>,
    limit: usize,
}

impl Scrollback {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let chunk = &chunk[chunk.len().saturating_sub(self.limit)..];
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.limit);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn keeps_only_the_tail() {
        let mut scrollback = Scrollback::new(8);
        scrollback.push(b"hello ");
        scrollback.push(b"world");
        assert_eq!(scrollback.snapshot(), b"lo world");
        assert_eq!(scrollback.len(), 8);
    }

    #[test_timeout::timeout]
    fn oversized_chunk_is_truncated_from_the_front() {
        let mut scrollback = Scrollback::new(4);
        scrollback.push(b"abcdefgh");
        assert_eq!(scrollback.snapshot(), b"efgh");
    }

    #[test_timeout::timeout]
    fn clear_empties() {
        let mut scrollback = Scrollback::new(4);
        scrollback.push(b"ab");
        scrollback.clear();
        assert!(scrollback.is_empty());
        assert!(scrollback.snapshot().is_empty());
    }
}
