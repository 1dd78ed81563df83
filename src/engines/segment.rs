//! Splits streamed assistant text into speakable units for synthesis.

/// Accumulates deltas and yields complete sentences/clauses in order.
#[derive(Debug, Clone)]
pub struct SpeechSegmenter {
    buffer: String,
    min_chars: usize,
}

impl SpeechSegmenter {
    /// Units shorter than `min_chars` are held back and merged with the next one.
    pub fn new(min_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            min_chars,
        }
    }

    /// Feeds a delta and returns every unit it completed.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut units = Vec::new();

        loop {
            let Some(end) = self.next_boundary() else {
                break;
            };
            let unit = self.buffer[..end].trim().to_string();
            self.buffer.replace_range(..end, "");
            if !unit.is_empty() {
                units.push(unit);
            }
        }

        units
    }

    /// Flushes whatever text remains once the stream is exhausted.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        self.buffer.clear();
        (!rest.is_empty()).then_some(rest)
    }

    /// Byte offset just past the first boundary that closes a long enough unit.
    fn next_boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let closes = match c {
                '\n' => true,
                '.' | '!' | '?' | ';' | ':' => {
                    matches!(chars.peek(), Some((_, next)) if next.is_whitespace())
                }
                _ => false,
            };
            if !closes {
                continue;
            }
            let end = i + c.len_utf8();
            if self.buffer[..end].trim().chars().count() >= self.min_chars {
                return Some(end);
            }
        }
        None
    }
}

impl Default for SpeechSegmenter {
    fn default() -> Self {
        Self::new(12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waits_for_following_whitespace() {
        let mut seg = SpeechSegmenter::new(1);
        assert!(seg.push("It costs 3.").is_empty());
        assert!(seg.push("5 dollars.").is_empty());
        assert_eq!(seg.push(" Okay"), vec!["It costs 3.5 dollars.".to_string()]);
        assert_eq!(seg.finish(), Some("Okay".to_string()));
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn test_short_units_are_merged() {
        let mut seg = SpeechSegmenter::new(10);
        let units = seg.push("Hi. How are you doing today? ");
        assert_eq!(units, vec!["Hi. How are you doing today?".to_string()]);
    }

    #[test]
    fn test_newline_closes_unit() {
        let mut seg = SpeechSegmenter::new(1);
        assert_eq!(
            seg.push("first line\nsecond"),
            vec!["first line".to_string()]
        );
    }
}
