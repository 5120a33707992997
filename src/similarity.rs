use std::collections::HashMap;
use std::hash::Hash;

use crate::normalizer::Normalized;

/// Sequences at least this long are eligible for the autojunk heuristic.
const AUTOJUNK_MIN_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Block {
    pub a: usize,
    pub b: usize,
    pub len: usize,
}

/// Ratcliff/Obershelp block matcher over two slices.
pub struct SequenceMatcher<'a, T> {
    a: &'a [T],
    b: &'a [T],
    b2j: HashMap<&'a T, Vec<usize>>,
}

impl<'a, T: Eq + Hash> SequenceMatcher<'a, T> {
    /// With `autojunk`, elements making up more than 1% of a long `b` stop
    /// anchoring matches. They can still extend a match found elsewhere.
    pub fn new(a: &'a [T], b: &'a [T], autojunk: bool) -> Self {
        let mut b2j: HashMap<&T, Vec<usize>> = HashMap::new();
        for (j, elt) in b.iter().enumerate() {
            b2j.entry(elt).or_default().push(j);
        }

        if autojunk && b.len() >= AUTOJUNK_MIN_LEN {
            let ntest = b.len() / 100 + 1;
            b2j.retain(|_, idxs| idxs.len() <= ntest);
        }

        Self { a, b, b2j }
    }

    /// Longest block with `a[alo..ahi]` and `b[blo..bhi]`. Ties go to the
    /// block starting earliest in `a`, then earliest in `b`.
    fn find_longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Block {
        let (a, b) = (self.a, self.b);
        let (mut besti, mut bestj, mut bestsize) = (alo, blo, 0);

        // row[j + 1] = length of the match ending at (i, j)
        let mut row = vec![0usize; b.len() + 1];
        let mut next = vec![0usize; b.len() + 1];
        let mut touched = Vec::new();
        let mut next_touched = Vec::new();

        for i in alo..ahi {
            if let Some(js) = self.b2j.get(&a[i]) {
                for &j in js {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = row[j] + 1;
                    next[j + 1] = k;
                    next_touched.push(j + 1);
                    if k > bestsize {
                        besti = i + 1 - k;
                        bestj = j + 1 - k;
                        bestsize = k;
                    }
                }
            }
            for t in touched.drain(..) {
                row[t] = 0;
            }
            std::mem::swap(&mut row, &mut next);
            std::mem::swap(&mut touched, &mut next_touched);
        }

        while besti > alo && bestj > blo && a[besti - 1] == b[bestj - 1] {
            besti -= 1;
            bestj -= 1;
            bestsize += 1;
        }
        while besti + bestsize < ahi && bestj + bestsize < bhi && a[besti + bestsize] == b[bestj + bestsize] {
            bestsize += 1;
        }

        Block {
            a: besti,
            b: bestj,
            len: bestsize,
        }
    }

    /// All matched blocks in order, adjacent blocks merged.
    pub fn matching_blocks(&self) -> Vec<Block> {
        let mut queue = vec![(0, self.a.len(), 0, self.b.len())];
        let mut blocks = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let m = self.find_longest_match(alo, ahi, blo, bhi);
            if m.len == 0 {
                continue;
            }
            blocks.push(m);
            if alo < m.a && blo < m.b {
                queue.push((alo, m.a, blo, m.b));
            }
            if m.a + m.len < ahi && m.b + m.len < bhi {
                queue.push((m.a + m.len, ahi, m.b + m.len, bhi));
            }
        }
        blocks.sort();

        let mut merged: Vec<Block> = Vec::with_capacity(blocks.len());
        for block in blocks {
            match merged.last_mut() {
                Some(last) if last.a + last.len == block.a && last.b + last.len == block.b => {
                    last.len += block.len;
                }
                _ => merged.push(block),
            }
        }
        merged
    }

    /// `2*M / (len(a) + len(b))`, or 1.0 when both are empty.
    pub fn ratio(&self) -> f64 {
        let total = self.a.len() + self.b.len();
        if total == 0 {
            return 1.0;
        }
        let matched: usize = self.matching_blocks().iter().map(|m| m.len).sum();
        2.0 * matched as f64 / total as f64
    }
}

pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Similarity of two normalized sources, rounded to 4 places.
///
/// Anything involving [`Normalized::Unparseable`], or a tree compared with
/// a line list, scores 0.
pub fn score(reference: &Normalized, submission: &Normalized, autojunk: bool) -> f64 {
    let raw = match (reference, submission) {
        (Normalized::Tree(a), Normalized::Tree(b)) => {
            let a: Vec<char> = a.chars().collect();
            let b: Vec<char> = b.chars().collect();
            SequenceMatcher::new(&a, &b, autojunk).ratio()
        }
        (Normalized::Lines(a), Normalized::Lines(b)) => SequenceMatcher::new(a, b, autojunk).ratio(),
        _ => 0.0,
    };
    round4(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{normalize_lines, normalize_tree};

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn str_ratio(a: &str, b: &str) -> f64 {
        let (a, b) = (chars(a), chars(b));
        round4(SequenceMatcher::new(&a, &b, false).ratio())
    }

    #[test]
    fn known_ratios() {
        assert_eq!(str_ratio("abcd", "bcde"), 0.75);
        assert_eq!(str_ratio("abxcd", "abcd"), 0.8889);
        assert_eq!(str_ratio("kitten", "sitting"), 0.6154);
        assert_eq!(str_ratio("abc", "xyz"), 0.0);
    }

    #[test]
    fn matching_blocks_are_ordered_and_merged() {
        let (a, b) = (chars("abxcd"), chars("abcd"));
        let blocks = SequenceMatcher::new(&a, &b, false).matching_blocks();
        assert_eq!(
            blocks,
            vec![Block { a: 0, b: 0, len: 2 }, Block { a: 3, b: 2, len: 2 }]
        );
    }

    #[test]
    fn identity_and_symmetry() {
        let pairs = [
            ("kitten", "sitting"),
            ("abxcd", "abcd"),
            ("print(1+1)", "print(1+2)"),
            ("def f(): return 1", "def g(): return 2"),
        ];
        for (a, b) in pairs {
            assert_eq!(str_ratio(a, a), 1.0);
            assert_eq!(str_ratio(a, b), str_ratio(b, a), "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(str_ratio("", ""), 1.0);
        assert_eq!(str_ratio("", "abc"), 0.0);
        assert_eq!(score(&Normalized::Lines(vec![]), &Normalized::Lines(vec![]), false), 1.0);
    }

    #[test]
    fn always_within_unit_interval() {
        let samples = ["", "a", "aaaa", "abab", "print(x)", "for i in range(3): pass"];
        for a in samples {
            for b in samples {
                let r = str_ratio(a, b);
                assert!((0.0..=1.0).contains(&r), "{a:?} vs {b:?} gave {r}");
            }
        }
    }

    #[test]
    fn autojunk_drops_popular_elements_from_long_sequences() {
        let a = chars(&"ab".repeat(150));
        let b = chars(&"ba".repeat(150));
        assert_eq!(round4(SequenceMatcher::new(&a, &b, false).ratio()), 0.9967);
        assert_eq!(SequenceMatcher::new(&a, &b, true).ratio(), 0.0);

        let short = chars("aaaa");
        assert_eq!(SequenceMatcher::new(&short, &short, true).ratio(), 1.0);
    }

    #[test]
    fn unparseable_or_mixed_scores_zero() {
        let tree = normalize_tree("print(1)");
        let lines = normalize_lines("print(1)");
        assert_eq!(score(&tree, &Normalized::Unparseable, false), 0.0);
        assert_eq!(score(&Normalized::Unparseable, &tree, false), 0.0);
        assert_eq!(score(&tree, &lines, false), 0.0);
    }

    #[test]
    fn tree_scores() {
        let reference = normalize_tree("print(1+1)");
        assert_eq!(score(&reference, &normalize_tree("print(1 + 1)  # same"), false), 1.0);

        let near = score(&reference, &normalize_tree("print(1+2)"), false);
        assert!(near > 0.9 && near < 1.0, "got {near}");

        let far = score(&reference, &normalize_tree("for i in range(10):\n    x = i * i\n"), false);
        assert!(far < near);
    }

    #[test]
    fn line_scores_compare_whole_lines() {
        let a = normalize_lines("x = 1\ny = 2\nprint(x + y)\n");
        let b = normalize_lines("x=1\ny=3\nprint(x+y)\n");
        // two of three lines match on each side
        assert_eq!(score(&a, &b, false), 0.6667);
    }
}
