//! Line-level three-way text merge.
//!
//! Both sides are diffed against the base with `similar`. Changed regions
//! ("hunks") from the two sides are grouped whenever their base ranges
//! overlap or touch. A side's text for a group is whatever lies between the
//! unchanged base lines bordering it. A group changed by one side only takes that side; a
//! group both sides changed to the same lines takes those lines; anything
//! else is a conflict chunk carrying all three versions.

use std::ops::Range;

use similar::{Algorithm, DiffTag, capture_diff_slices};

/// Content is binary if a NUL byte appears in the first `sniff_len` bytes or
/// if it is not valid UTF-8.
#[must_use]
pub fn is_binary(content: &[u8], sniff_len: usize) -> bool {
    let head = &content[..content.len().min(sniff_len)];
    head.contains(&0) || std::str::from_utf8(content).is_err()
}

/// One region of a merge result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    /// Lines both sides agree on after merging.
    Resolved(Vec<u8>),
    /// Lines the two sides changed differently.
    Conflict {
        /// The base lines of the region.
        base: Vec<u8>,
        /// Our version.
        ours: Vec<u8>,
        /// Their version.
        theirs: Vec<u8>,
    },
}

/// The outcome of [`merge_lines`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineMerge {
    chunks: Vec<Chunk>,
}

impl LineMerge {
    /// The merged regions in file order.
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// `true` if no region conflicts.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflict_count() == 0
    }

    /// Number of conflicting regions.
    #[must_use]
    pub fn conflict_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| matches!(c, Chunk::Conflict { .. }))
            .count()
    }

    /// The merged content, if clean.
    #[must_use]
    pub fn into_clean(self) -> Option<Vec<u8>> {
        if !self.is_clean() {
            return None;
        }
        Some(
            self.chunks
                .into_iter()
                .flat_map(|c| match c {
                    Chunk::Resolved(bytes) => bytes,
                    Chunk::Conflict { .. } => Vec::new(),
                })
                .collect(),
        )
    }

    /// Render with conventional diff3-style conflict markers.
    #[must_use]
    pub fn render(&self, ours_label: &str, theirs_label: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Resolved(bytes) => out.extend_from_slice(bytes),
                Chunk::Conflict { base, ours, theirs } => {
                    out.extend_from_slice(format!("<<<<<<< {ours_label}\n").as_bytes());
                    push_section(&mut out, ours);
                    out.extend_from_slice(b"||||||| base\n");
                    push_section(&mut out, base);
                    out.extend_from_slice(b"=======\n");
                    push_section(&mut out, theirs);
                    out.extend_from_slice(format!(">>>>>>> {theirs_label}\n").as_bytes());
                }
            }
        }
        out
    }

    fn push_resolved(&mut self, lines: &[&[u8]]) {
        if lines.iter().all(|l| l.is_empty()) {
            return;
        }
        if let Some(Chunk::Resolved(buf)) = self.chunks.last_mut() {
            buf.extend(lines.iter().flat_map(|l| l.iter().copied()));
        } else {
            self.chunks.push(Chunk::Resolved(lines.concat()));
        }
    }
}

fn push_section(out: &mut Vec<u8>, section: &[u8]) {
    out.extend_from_slice(section);
    if !section.is_empty() && !section.ends_with(b"\n") {
        out.push(b'\n');
    }
}

/// One side's diff against the base.
struct Alignment {
    /// Side line index of every base line the side kept unchanged.
    kept: Vec<Option<usize>>,
    /// Base ranges the side replaced, deleted or inserted at.
    changed: Vec<Range<usize>>,
    side_len: usize,
}

impl Alignment {
    fn new(base: &[&[u8]], side: &[&[u8]]) -> Self {
        let mut kept = vec![None; base.len()];
        let mut changed = Vec::new();
        for op in capture_diff_slices(Algorithm::Myers, base, side) {
            let (tag, old, new) = op.as_tag_tuple();
            if tag == DiffTag::Equal {
                for (b, s) in old.zip(new) {
                    if let Some(slot) = kept.get_mut(b) {
                        *slot = Some(s);
                    }
                }
            } else {
                changed.push(old);
            }
        }
        Self {
            kept,
            changed,
            side_len: side.len(),
        }
    }

    /// Side lines standing in for base lines `range`, including insertions
    /// at either edge. Both neighbours of `range` must be kept lines.
    fn side_range(&self, range: &Range<usize>) -> Option<Range<usize>> {
        let from = match range.start {
            0 => 0,
            n => self.kept.get(n - 1).copied().flatten()? + 1,
        };
        let to = if range.end == self.kept.len() {
            self.side_len
        } else {
            self.kept.get(range.end).copied().flatten()?
        };
        (from <= to).then_some(from..to)
    }
}

fn split_lines(text: &[u8]) -> Vec<&[u8]> {
    text.split_inclusive(|&b| b == b'\n').collect()
}

/// Base ranges touched by either side, unioned where they overlap or touch.
/// Each group records which sides changed something inside it.
fn change_groups(sides: &[Alignment; 2]) -> Vec<(Range<usize>, [bool; 2])> {
    let mut all: Vec<(Range<usize>, usize)> = sides
        .iter()
        .enumerate()
        .flat_map(|(i, a)| a.changed.iter().map(move |r| (r.clone(), i)))
        .collect();
    all.sort_by_key(|(r, side)| (r.start, r.end, *side));

    let mut groups: Vec<(Range<usize>, [bool; 2])> = Vec::new();
    for (range, side) in all {
        match groups.last_mut() {
            Some((group, touched)) if range.start <= group.end => {
                group.end = group.end.max(range.end);
                touched[side] = true;
            }
            _ => {
                let mut touched = [false; 2];
                touched[side] = true;
                groups.push((range, touched));
            }
        }
    }
    groups
}

/// Three-way merge of `ours` and `theirs` against `base`, line by line.
#[must_use]
pub fn merge_lines(base: &[u8], ours: &[u8], theirs: &[u8]) -> LineMerge {
    let base_lines = split_lines(base);
    let side_lines = [split_lines(ours), split_lines(theirs)];
    let sides = [
        Alignment::new(&base_lines, &side_lines[0]),
        Alignment::new(&base_lines, &side_lines[1]),
    ];

    let mut result = LineMerge { chunks: Vec::new() };
    let mut cursor = 0;
    for (range, touched) in change_groups(&sides) {
        let (Some(ours_range), Some(theirs_range)) =
            (sides[0].side_range(&range), sides[1].side_range(&range))
        else {
            // Unaligned diff: refuse to guess and conflict the whole file.
            return LineMerge {
                chunks: vec![Chunk::Conflict {
                    base: base.to_vec(),
                    ours: ours.to_vec(),
                    theirs: theirs.to_vec(),
                }],
            };
        };
        result.push_resolved(&base_lines[cursor..range.start]);

        let ours_text = side_lines[0][ours_range].concat();
        let theirs_text = side_lines[1][theirs_range].concat();
        match touched {
            [true, false] => result.push_resolved(&[ours_text.as_slice()]),
            [false, true] => result.push_resolved(&[theirs_text.as_slice()]),
            _ if ours_text == theirs_text => result.push_resolved(&[ours_text.as_slice()]),
            _ => result.chunks.push(Chunk::Conflict {
                base: base_lines[range.clone()].concat(),
                ours: ours_text,
                theirs: theirs_text,
            }),
        }
        cursor = range.end;
    }
    result.push_resolved(&base_lines[cursor..]);
    result
}
