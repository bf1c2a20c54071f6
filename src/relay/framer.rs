use std::borrow::Cow;

/// A complete line of backend output, without its terminating `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedRecord(Vec<u8>);

impl FramedRecord {
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for FramedRecord {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

/// Splits a fragmented byte stream into newline-terminated records.
///
/// Bytes after the last `\n` are held back until a later fragment completes the line.
#[derive(Debug, Default)]
pub struct LineFramer {
    tail: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, fragment: &[u8]) -> Vec<FramedRecord> {
        let mut records = Vec::new();
        let mut rest = fragment;
        while let Some(position) = rest.iter().position(|byte| *byte == b'\n') {
            self.tail.extend_from_slice(&rest[..position]);
            records.push(FramedRecord(std::mem::take(&mut self.tail)));
            rest = &rest[position + 1..];
        }
        self.tail.extend_from_slice(rest);
        records
    }

    pub fn pending(&self) -> usize {
        self.tail.len()
    }

    /// Ends the stream, returning the number of unterminated bytes that were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.tail.len();
        self.tail = Vec::new();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] =
        b"{\"response\":\"He\",\"done\":false}\n\n{\"response\":\"llo\"}\r\n{\"done\":true}\n";

    fn expected() -> Vec<FramedRecord> {
        vec![
            FramedRecord::from("{\"response\":\"He\",\"done\":false}"),
            FramedRecord::from(""),
            FramedRecord::from("{\"response\":\"llo\"}\r"),
            FramedRecord::from("{\"done\":true}"),
        ]
    }

    fn frame_all<'a>(fragments: impl IntoIterator<Item = &'a [u8]>) -> Vec<FramedRecord> {
        let mut framer = LineFramer::new();
        let mut records = Vec::new();
        for fragment in fragments {
            records.extend(framer.feed(fragment));
        }
        assert_eq!(framer.finish(), 0);
        records
    }

    #[test]
    fn single_fragment_yields_every_line() {
        assert_eq!(frame_all([STREAM]), expected());
    }

    #[test]
    fn byte_at_a_time_matches_single_fragment() {
        assert_eq!(frame_all(STREAM.chunks(1)), expected());
    }

    #[test]
    fn every_two_way_split_matches_single_fragment() {
        for split in 0..=STREAM.len() {
            let (head, tail) = STREAM.split_at(split);
            assert_eq!(frame_all([head, tail]), expected(), "split at {split}");
        }
    }

    #[test]
    fn record_boundary_fragments_match_single_fragment() {
        let fragments = STREAM
            .split_inclusive(|byte| *byte == b'\n')
            .collect::<Vec<_>>();
        assert_eq!(frame_all(fragments), expected());
    }

    #[test]
    fn partial_tail_is_held_then_discarded() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"{\"response\":\"a\"}\n{\"resp").len(), 1);
        assert_eq!(framer.pending(), 6);
        assert_eq!(framer.finish(), 6);
        assert_eq!(framer.pending(), 0);
    }
}
