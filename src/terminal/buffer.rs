//! Output held back while a terminal has no subscribers

use std::collections::VecDeque;

/// Chunked output buffer with a total budget in bytes.
///
/// Once the budget is exceeded the oldest chunks are evicted, but the most
/// recent chunk is always kept even if it alone exceeds the budget.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    chunks: VecDeque<Vec<u8>>,
    len: usize,
    max_len: usize,
}

impl OutputBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
            max_len,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.chunks.push_back(chunk.to_vec());
        self.len += chunk.len();

        while self.len > self.max_len && self.chunks.len() > 1 {
            if let Some(evicted) = self.chunks.pop_front() {
                self.len -= evicted.len();
            }
        }
    }

    /// Drain everything, oldest first, as one contiguous chunk
    pub fn take(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.len = 0;
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_concatenates_in_order() {
        let mut buf = OutputBuffer::new(100);
        buf.push(b"hello ");
        buf.push(b"world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.take(), b"hello world");
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_evicts_oldest_when_over_budget() {
        let mut buf = OutputBuffer::new(10);
        buf.push(b"aaaa");
        buf.push(b"bbbb");
        buf.push(b"cccc");
        // 12 > 10, so "aaaa" goes
        assert_eq!(buf.take(), b"bbbbcccc");
    }

    #[test]
    fn test_keeps_single_oversized_chunk() {
        let mut buf = OutputBuffer::new(4);
        buf.push(b"ab");
        buf.push(b"0123456789");
        assert_eq!(buf.take(), b"0123456789");
    }

    #[test]
    fn test_ignores_empty_chunks() {
        let mut buf = OutputBuffer::new(4);
        buf.push(b"");
        assert!(buf.is_empty());
    }
}
