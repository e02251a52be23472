//! Sequence sets: parsing (`1,3:5,9:7`) and building (`[1,2,3,7]` -> `1:3,7`).

use crate::{Error, Result};

/// Iterates over the numbers of a sequence set in declaration order.
///
/// Ranges written high-to-low (`9:7`) are walked downwards. The iterator
/// owns its input. A chunk that isn't a plain decimal number or range
/// yields one `Err` and then the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct SeqsetIterator {
    input: String,
    pos: usize,
    range: Option<(u32, u32)>,
    done: bool,
}

impl SeqsetIterator {
    /// Creates an iterator over `seqset`. An empty set yields nothing.
    pub fn new(seqset: impl Into<String>) -> Self {
        let input = seqset.into();
        let done = input.is_empty();
        Self {
            input,
            pos: 0,
            range: None,
            done,
        }
    }

    fn fail(&mut self, chunk: &str) -> Option<Result<u32>> {
        self.done = true;
        Some(Err(Error::Parse {
            position: self.pos,
            message: format!("invalid seqset chunk {chunk:?}"),
        }))
    }
}

fn parse_num(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl Iterator for SeqsetIterator {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some((cur, end)) = self.range {
            let next = match cur.cmp(&end) {
                std::cmp::Ordering::Less => Some(cur + 1),
                std::cmp::Ordering::Greater => Some(cur - 1),
                std::cmp::Ordering::Equal => None,
            };
            if let Some(next) = next {
                self.range = Some((next, end));
                return Some(Ok(next));
            }
            self.range = None;
        }

        if self.pos >= self.input.len() {
            self.done = true;
            return None;
        }

        let rest = &self.input[self.pos..];
        let chunk_len = rest.find(',').unwrap_or(rest.len());
        let chunk = rest[..chunk_len].to_string();
        let start = self.pos;
        self.pos += chunk_len + 1;

        if let Some((a, b)) = chunk.split_once(':') {
            let (Some(a), Some(b)) = (parse_num(a), parse_num(b)) else {
                self.pos = start;
                return self.fail(&chunk);
            };
            self.range = Some((a, b));
            Some(Ok(a))
        } else {
            let Some(n) = parse_num(&chunk) else {
                self.pos = start;
                return self.fail(&chunk);
            };
            Some(Ok(n))
        }
    }
}

/// Builds a compact set from numbers in the given order.
///
/// Runs of consecutive ascending values collapse into `a:b`. Zero is a
/// placeholder for an empty slot and is never merged into a range.
#[must_use]
pub fn compress<I: IntoIterator<Item = u32>>(numbers: I) -> String {
    let mut out = String::new();
    let mut run: Option<(u32, u32)> = None;

    let emit = |out: &mut String, (first, last): (u32, u32)| {
        if !out.is_empty() {
            out.push(',');
        }
        if first == last {
            out.push_str(&first.to_string());
        } else {
            out.push_str(&format!("{first}:{last}"));
        }
    };

    for n in numbers {
        run = match run {
            Some((first, last)) if n != 0 && last != 0 && last.checked_add(1) == Some(n) => {
                Some((first, n))
            }
            Some(done) => {
                emit(&mut out, done);
                Some((n, n))
            }
            None => Some((n, n)),
        };
    }
    if let Some(done) = run {
        emit(&mut out, done);
    }
    out
}

/// Splits sorted UIDs into compressed sets no longer than `max_len` bytes each.
///
/// A single range longer than `max_len` still gets its own set.
#[must_use]
pub fn compress_chunked(uids: &[u32], max_len: usize) -> Vec<String> {
    let whole = compress(uids.iter().copied());
    if whole.len() <= max_len {
        return if whole.is_empty() { Vec::new() } else { vec![whole] };
    }

    let mut sets = Vec::new();
    let mut current = String::new();
    for part in whole.split(',') {
        if !current.is_empty() && current.len() + 1 + part.len() > max_len {
            sets.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(',');
        }
        current.push_str(part);
    }
    if !current.is_empty() {
        sets.push(current);
    }
    sets
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(s: &str) -> Vec<u32> {
        SeqsetIterator::new(s).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_iterate() {
        assert_eq!(collect("1,3:5,7"), vec![1, 3, 4, 5, 7]);
        assert_eq!(collect("5:3"), vec![5, 4, 3]);
        assert_eq!(collect(""), Vec::<u32>::new());
        assert_eq!(collect("1,3:5,7,10:8"), vec![1, 3, 4, 5, 7, 10, 9, 8]);
        assert_eq!(collect("4:4"), vec![4]);
    }

    #[test]
    fn test_iterate_errors() {
        let mut iter = SeqsetIterator::new("1,x,3");
        assert_eq!(iter.next().unwrap().unwrap(), 1);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());

        assert!(SeqsetIterator::new("1:").any(|r| r.is_err()));
        assert!(SeqsetIterator::new("*").any(|r| r.is_err()));
        assert!(SeqsetIterator::new("1,,2").any(|r| r.is_err()));
        assert!(SeqsetIterator::new("99999999999").any(|r| r.is_err()));
    }

    #[test]
    fn test_compress() {
        assert_eq!(compress([1, 2, 3, 7]), "1:3,7");
        assert_eq!(compress([10, 11, 0, 13]), "10:11,0,13");
        assert_eq!(compress([0, 0]), "0,0");
        assert_eq!(compress(Vec::new()), "");
        assert_eq!(compress([5, 4]), "5,4");
    }

    #[test]
    fn test_compress_chunked() {
        let uids: Vec<u32> = (1..=200).map(|n| n * 2).collect();
        let sets = compress_chunked(&uids, 100);
        assert!(sets.len() > 1);
        assert!(sets.iter().all(|s| s.len() <= 100));
        let back: Vec<u32> = sets.iter().flat_map(|s| collect(s)).collect();
        assert_eq!(back, uids);
        assert!(compress_chunked(&[], 100).is_empty());
    }

    proptest! {
        #[test]
        fn prop_compress_then_iterate(mut uids in proptest::collection::vec(1u32..5000, 0..200)) {
            uids.sort_unstable();
            uids.dedup();
            let set = compress(uids.iter().copied());
            prop_assert_eq!(collect(&set), uids);
        }
    }
}
