//! Delimiter-bounded record splitting over raw bytes.
//!
//! The tokenizer never allocates on its fast path: records are handed out as
//! [`Span`]s (or borrowed `&[u8]` views) into the caller's buffer. Empty
//! records between two adjacent delimiters are dropped. Log tailing relies on
//! that, so it is kept as a tested policy rather than a configurable one.
//!
//! ```rust
//! use tributary::tokenizer;
//!
//! let mut lines = Vec::new();
//! let rest = tokenizer::split(b"one\n\ntwo\nthr", b'\n', false, |line| lines.push(line));
//!
//! assert_eq!(lines, vec![&b"one"[..], &b"two"[..]]);
//! assert_eq!(rest, b"thr");
//! ```

use std::ops::Range;
use std::sync::OnceLock;

/// The default record delimiter, `\n`.
pub const NEWLINE: u8 = b'\n';

/// Environment variable selecting the tokenizer strategy (`fast` or `reference`).
pub const STRATEGY_ENV: &str = "TRIBUTARY_TOKENIZER";

/// A zero-copy view `(start, len)` into some byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// One past the last byte of the span
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the bytes this span covers in `buf`
    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.range()]
    }
}

/// Which scanning implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Single pass over the buffer with `memchr`, no allocation
    #[default]
    Fast,
    /// Copies the buffer and peels records off the front. Slow, kept for
    /// diagnosing suspected fast-path bugs; output is identical.
    Reference,
}

impl Strategy {
    /// Strategy selected through [`STRATEGY_ENV`], read once per process.
    pub fn from_env() -> Self {
        static STRATEGY: OnceLock<Strategy> = OnceLock::new();
        *STRATEGY.get_or_init(|| match std::env::var(STRATEGY_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("reference") => {
                tracing::info!("tokenizer using the reference strategy");
                Strategy::Reference
            }
            _ => Strategy::Fast,
        })
    }
}

/// Iterator over the non-empty, delimiter-terminated records of a buffer.
///
/// Bytes after the last delimiter are not yielded; ask for them with
/// [`Spans::remainder`] once the iterator is exhausted.
pub struct Spans<'a> {
    hits: memchr::Memchr<'a>,
    len: usize,
    next_start: usize,
}

impl<'a> Spans<'a> {
    pub fn new(buf: &'a [u8], delimiter: u8) -> Self {
        Self {
            hits: memchr::memchr_iter(delimiter, buf),
            len: buf.len(),
            next_start: 0,
        }
    }

    /// The unterminated tail following the last delimiter seen so far
    pub fn remainder(&self) -> Span {
        Span::new(self.next_start, self.len - self.next_start)
    }
}

impl Iterator for Spans<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        loop {
            let hit = self.hits.next()?;
            let span = Span::new(self.next_start, hit - self.next_start);
            self.next_start = hit + 1;
            if !span.is_empty() {
                return Some(span);
            }
        }
    }
}

/// Walk `buf` and call `handle` with every non-empty record.
///
/// Returns the remainder after the last delimiter. When `include_last` is set
/// a non-empty remainder is handed to `handle` as a final record instead and
/// the returned span is empty.
pub fn for_each_span<F>(buf: &[u8], delimiter: u8, include_last: bool, handle: F) -> Span
where
    F: FnMut(Span),
{
    for_each_span_with(Strategy::from_env(), buf, delimiter, include_last, handle)
}

/// Same as [`for_each_span`] with an explicit strategy.
pub fn for_each_span_with<F>(
    strategy: Strategy,
    buf: &[u8],
    delimiter: u8,
    include_last: bool,
    mut handle: F,
) -> Span
where
    F: FnMut(Span),
{
    let remainder = match strategy {
        Strategy::Fast => {
            let mut spans = Spans::new(buf, delimiter);
            for span in spans.by_ref() {
                handle(span);
            }
            spans.remainder()
        }
        Strategy::Reference => reference_spans(buf, delimiter, &mut handle),
    };

    if include_last && !remainder.is_empty() {
        handle(remainder);
        return Span::new(buf.len(), 0);
    }
    remainder
}

fn reference_spans<F>(buf: &[u8], delimiter: u8, handle: &mut F) -> Span
where
    F: FnMut(Span),
{
    let mut data = buf.to_vec();
    let mut consumed = 0;

    while let Some(pos) = data.iter().position(|&b| b == delimiter) {
        let record: Vec<u8> = data.drain(..=pos).collect();
        if record.len() > 1 {
            handle(Span::new(consumed, record.len() - 1));
        }
        consumed += record.len();
    }

    Span::new(consumed, data.len())
}

/// Call `handle` with every non-empty record of `buf` and return the remainder.
pub fn split<'a, F>(buf: &'a [u8], delimiter: u8, include_last: bool, mut handle: F) -> &'a [u8]
where
    F: FnMut(&'a [u8]),
{
    let rest = for_each_span(buf, delimiter, include_last, |span| handle(span.slice(buf)));
    rest.slice(buf)
}

/// Every non-empty record of `buf`, including the unterminated last one.
///
/// Handy for splitting a line into columns:
///
/// ```rust
/// use tributary::tokenizer::split_all;
///
/// let columns = split_all(b"189|action_13|/tmp/023.txt", b'|');
/// assert_eq!(columns.len(), 3);
/// ```
pub fn split_all(buf: &[u8], delimiter: u8) -> Vec<&[u8]> {
    let mut records = Vec::with_capacity(16);
    split(buf, delimiter, true, |record| records.push(record));
    records
}
