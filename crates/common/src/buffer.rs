//! Circular byte buffer used as the receive staging area of a socket.

use crate::error::ProtocolError;

/// Fixed-capacity ring of bytes. Pushing past capacity is an error; the
/// socket layer drains it before each refill so this only trips when a
/// peer floods us with unframed data.
#[derive(Debug)]
pub struct Circular {
    buf: Vec<u8>,
    start: usize,
    len: usize,
}

impl Circular {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            start: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if bytes.len() > self.free() {
            return Err(ProtocolError::StagingOverflow);
        }
        for (i, &b) in bytes.iter().enumerate() {
            let at = (self.start + self.len + i) % self.buf.len();
            self.buf[at] = b;
        }
        self.len += bytes.len();
        Ok(())
    }

    /// Pops up to `n` bytes; returns fewer when the buffer holds fewer.
    pub fn pop(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.len);
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(self.buf[(self.start + i) % self.buf.len()]);
        }
        self.start = (self.start + n) % self.buf.len();
        self.len -= n;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_wraps_around() {
        let mut ring = Circular::new(8);
        ring.push(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(ring.pop(4), vec![1, 2, 3, 4]);
        ring.push(&[7, 8, 9, 10]).unwrap();
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.pop(6), vec![5, 6, 7, 8, 9, 10]);
        assert!(ring.is_empty());
    }

    #[test]
    fn overflow_is_an_error() {
        let mut ring = Circular::new(4);
        ring.push(&[1, 2, 3]).unwrap();
        assert_eq!(ring.push(&[4, 5]), Err(ProtocolError::StagingOverflow));
        // The failed push must not corrupt existing content.
        assert_eq!(ring.pop(3), vec![1, 2, 3]);
    }

    #[test]
    fn pop_more_than_held_returns_what_is_there() {
        let mut ring = Circular::new(4);
        ring.push(&[9]).unwrap();
        assert_eq!(ring.pop(10), vec![9]);
    }
}
