//! Sentence segmentation for streamed responses
//!
//! Tokens are appended to a buffer that is cut after sentence-ending
//! punctuation followed by whitespace, or after a blank line. A cut is only
//! taken once the candidate holds enough characters, so short fragments like
//! "Mr." ride along with the following sentence. Chunks are never trimmed:
//! concatenating them in order reproduces the input exactly.

/// Minimum characters (ignoring surrounding whitespace) before a cut is taken
pub const MIN_SENTENCE_CHARS: usize = 12;

/// A piece of response text awaiting synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceChunk {
    /// Position in the response, starting at zero
    pub index: usize,
    /// Raw text including any trailing whitespace
    pub text: String,
}

impl SentenceChunk {
    /// Text to hand to the synthesizer, or `None` if nothing is speakable
    #[must_use]
    pub fn speakable(&self) -> Option<String> {
        let cleaned: String = self
            .text
            .chars()
            .filter(|c| !matches!(c, '*' | '#' | '`' | '~'))
            .collect();
        let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        (!cleaned.is_empty()).then_some(cleaned)
    }
}

/// Incremental sentence splitter
#[derive(Debug)]
pub struct SentenceSegmenter {
    buffer: String,
    min_chars: usize,
    emitted: usize,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(MIN_SENTENCE_CHARS)
    }
}

impl SentenceSegmenter {
    /// Create a segmenter with a custom minimum length
    #[must_use]
    pub const fn new(min_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            min_chars,
            emitted: 0,
        }
    }

    /// Append a streamed delta and return every sentence it completes
    pub fn push(&mut self, delta: &str) -> Vec<SentenceChunk> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        while let Some(end) = self.next_cut() {
            let text: String = self.buffer.drain(..end).collect();
            sentences.push(self.chunk(text));
        }
        sentences
    }

    /// Flush whatever remains once the stream has ended
    pub fn finish(&mut self) -> Option<SentenceChunk> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        Some(self.chunk(text))
    }

    /// Text buffered but not yet emitted
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn chunk(&mut self, text: String) -> SentenceChunk {
        let index = self.emitted;
        self.emitted += 1;
        SentenceChunk { index, text }
    }

    /// Byte offset just past the first acceptable boundary
    fn next_cut(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            let end = match (c, chars.peek()) {
                ('.' | '!' | '?', Some(&(j, next))) if next.is_whitespace() => j + next.len_utf8(),
                ('\n', Some(&(j, '\n'))) => j + 1,
                _ => continue,
            };

            if self.buffer[..end].trim().chars().count() >= self.min_chars {
                return Some(end);
            }
        }

        None
    }
}
