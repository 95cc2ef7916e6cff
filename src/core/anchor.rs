//! Anchor resolution: locate the unique line span an edit refers to.
//!
//! Anchors are the exact trimmed texts of the boundary lines, so the
//! generator never has to supply correct absolute line numbers. Matching
//! is exact-string equality after trimming; every unresolved ambiguity is
//! a hard failure rather than a guess, because a wrong span means
//! irreversible damage to the wrong place in a file.
//!
//! The filters run in a fixed order: exact pair enumeration, then a
//! structural indentation filter, then content-hint scoring over the
//! replacement lines. No step performs approximate matching.

use std::collections::{HashMap, HashSet};

use camino::Utf8Path;
use miette::{LabeledSpan, NamedSource};
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{instrument, trace};

use crate::core::directive::AnchorSpec;

/// Minimum distinct replacement lines before hint scoring may decide.
pub const MIN_UNIQUE_HINT_LINES: usize = 2;

/// A resolved, 1-indexed inclusive line range in a specific file snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("anchor lines not found in file")]
    NotFound,

    #[error("anchor lines are ambiguous ({} candidate spans)", .spans.len())]
    Ambiguous { spans: Vec<Span> },

    #[error("line range {start}-{end} out of bounds for file with {len} lines")]
    OutOfBounds {
        start: usize,
        end: usize,
        len: usize,
    },
}

fn canon(s: &str) -> &str {
    s.trim()
}

fn indent(s: &str) -> usize {
    s.len() - s.trim_start_matches([' ', '\t']).len()
}

/// Resolve an anchor against a pristine line array.
///
/// `hints` are the block's replacement lines (or, in preview, the raw
/// lines the generator wrote); they only participate when the structural
/// filter leaves more than one survivor.
pub fn resolve(
    lines: &[String],
    spec: &AnchorSpec,
    hints: &[String],
) -> Result<Span, ResolveError> {
    resolve_with(lines, spec, hints, MIN_UNIQUE_HINT_LINES)
}

#[instrument(level = "trace", skip_all)]
pub fn resolve_with(
    lines: &[String],
    spec: &AnchorSpec,
    hints: &[String],
    min_unique: usize,
) -> Result<Span, ResolveError> {
    match spec {
        AnchorSpec::Lines { start, end } => {
            // Degenerate dialect: direct indexing, bounds check only.
            if *start == 0 || *end < *start || *end > lines.len() {
                return Err(ResolveError::OutOfBounds {
                    start: *start,
                    end: *end,
                    len: lines.len(),
                });
            }
            Ok(Span {
                start: *start,
                end: *end,
            })
        }
        AnchorSpec::Text { start, end, single } => {
            resolve_text(lines, start, end, *single, hints, min_unique)
        }
    }
}

fn resolve_text(
    lines: &[String],
    x: &str,
    y: &str,
    single: bool,
    hints: &[String],
    min_unique: usize,
) -> Result<Span, ResolveError> {
    if lines.is_empty() {
        return Err(ResolveError::NotFound);
    }
    let a = canon(x);
    let b = canon(y);

    if single {
        let hits: SmallVec<[usize; 4]> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| canon(l) == a)
            .map(|(i, _)| i)
            .collect();
        return match hits.len() {
            0 => Err(ResolveError::NotFound),
            1 => Ok(Span {
                start: hits[0] + 1,
                end: hits[0] + 1,
            }),
            _ => Err(ResolveError::Ambiguous {
                spans: hits
                    .iter()
                    .map(|&i| Span {
                        start: i + 1,
                        end: i + 1,
                    })
                    .collect(),
            }),
        };
    }

    // Every (i <= j) pair where line i matches the start anchor and line j
    // matches the end anchor.
    let mut cands: SmallVec<[(usize, usize); 4]> = SmallVec::new();
    for (i, li) in lines.iter().enumerate() {
        if canon(li) != a {
            continue;
        }
        for (j, lj) in lines.iter().enumerate().skip(i) {
            if canon(lj) == b {
                cands.push((i, j));
            }
        }
    }
    trace!(candidates = cands.len(), "anchor pair enumeration");
    match cands.len() {
        0 => return Err(ResolveError::NotFound),
        1 => {
            return Ok(Span {
                start: cands[0].0 + 1,
                end: cands[0].1 + 1,
            });
        }
        _ => {}
    }

    // Structural filter: a candidate must look like one closed block at
    // the opening line's indentation, with a strictly deeper body that
    // never dips back to the opening level before the end line.
    let next_content_indent = |j: usize| -> Option<usize> {
        lines[j + 1..]
            .iter()
            .find(|l| !canon(l).is_empty())
            .map(|l| indent(l))
    };

    let mut picks: SmallVec<[(usize, usize); 4]> = SmallVec::new();
    for &(i, j) in &cands {
        let t0 = indent(&lines[i]);
        let tj = indent(&lines[j]);
        let tn = next_content_indent(j);
        if tj != t0 && tn != Some(t0) {
            continue;
        }
        let mut seen_body = false;
        let mut ok = true;
        for line in &lines[i + 1..j] {
            if canon(line).is_empty() {
                continue;
            }
            let tk = indent(line);
            if tk < t0 {
                ok = false;
                break;
            }
            if !seen_body {
                if tk > t0 {
                    seen_body = true;
                }
                continue;
            }
            if tk <= t0 {
                ok = false;
                break;
            }
        }
        if ok && seen_body {
            picks.push((i, j));
        }
        if picks.len() > 1 {
            break;
        }
    }
    trace!(survivors = picks.len(), "structural filter");

    if picks.len() == 1 {
        return Ok(Span {
            start: picks[0].0 + 1,
            end: picks[0].1 + 1,
        });
    }
    if picks.len() > 1 {
        cands = picks;
    }

    // Content-hint filter: score each survivor by how many hint lines fall
    // inside its span and nobody else's. Requires enough distinct hint
    // material to be meaningful; ties fail.
    let hint_set: HashSet<&str> = hints
        .iter()
        .map(|s| canon(s))
        .filter(|s| !s.is_empty())
        .collect();
    let ambiguous = || ResolveError::Ambiguous {
        spans: cands
            .iter()
            .map(|&(i, j)| Span {
                start: i + 1,
                end: j + 1,
            })
            .collect(),
    };
    if hint_set.len() < min_unique {
        return Err(ambiguous());
    }

    let cand_line_sets: Vec<HashSet<&str>> = cands
        .iter()
        .map(|&(i, j)| {
            lines[i..=j]
                .iter()
                .map(|l| canon(l))
                .filter(|l| !l.is_empty())
                .collect()
        })
        .collect();

    let mut owners: HashMap<&str, SmallVec<[usize; 4]>> = HashMap::new();
    for (idx, set) in cand_line_sets.iter().enumerate() {
        for &z in set.intersection(&hint_set) {
            owners.entry(z).or_default().push(idx);
        }
    }

    let scores: Vec<usize> = (0..cands.len())
        .map(|idx| {
            hint_set
                .iter()
                .filter(|z| owners.get(*z).is_some_and(|o| o.as_slice() == [idx]))
                .count()
        })
        .collect();
    let best = scores.iter().copied().max().unwrap_or(0);
    trace!(?scores, "hint scoring");
    if best < min_unique || scores.iter().filter(|&&s| s == best).count() != 1 {
        return Err(ambiguous());
    }
    let winner = scores.iter().position(|&s| s == best).unwrap();
    Ok(Span {
        start: cands[winner].0 + 1,
        end: cands[winner].1 + 1,
    })
}

/// Render a resolver failure as a labeled diagnostic over the file text,
/// for human-facing CLI output.
pub fn diagnose(err: &ResolveError, file: &Utf8Path, content: &str) -> miette::Report {
    let labels: Vec<LabeledSpan> = match err {
        ResolveError::Ambiguous { spans } => spans
            .iter()
            .filter_map(|s| {
                let (lo, hi) = byte_range_of_lines(content, s.start, s.end)?;
                Some(LabeledSpan::at(lo..hi, "candidate span"))
            })
            .collect(),
        _ => Vec::new(),
    };
    miette::miette!(
        labels = labels,
        help = "anchors must select exactly one span; make the boundary lines unique or add line numbers",
        "{err} in {file}"
    )
    .with_source_code(NamedSource::new(file.as_str(), content.to_string()))
}

/// Byte range of an inclusive 1-based line span inside `content`.
fn byte_range_of_lines(content: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    if start == 0 || end < start {
        return None;
    }
    let mut line = 1usize;
    let mut lo = None;
    let mut pos = 0usize;
    for seg in content.split_inclusive('\n') {
        if line == start {
            lo = Some(pos);
        }
        pos += seg.len();
        if line == end {
            let hi = pos - seg.chars().rev().take_while(|&c| c == '\n' || c == '\r').count();
            return Some((lo?, hi));
        }
        line += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| s.to_string()).collect()
    }

    fn text(start: &str, end: &str, single: bool) -> AnchorSpec {
        AnchorSpec::Text {
            start: start.into(),
            end: end.into(),
            single,
        }
    }

    #[test]
    fn single_anchor_unique_line() {
        let file = lines(&["def f():", "    x = 1", "    return x"]);
        let span = resolve(&file, &text("    x = 1", "    x = 1", true), &[]).unwrap();
        assert_eq!(span, Span { start: 2, end: 2 });
    }

    #[test]
    fn single_anchor_ambiguous_fails() {
        let file = lines(&["pass", "x = 1", "pass"]);
        let err = resolve(&file, &text("pass", "pass", true), &[]).unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { ref spans } if spans.len() == 2));
    }

    #[test]
    fn missing_anchor_is_not_found() {
        let file = lines(&["a", "b"]);
        assert_eq!(
            resolve(&file, &text("zzz", "zzz", true), &[]),
            Err(ResolveError::NotFound)
        );
    }

    #[test]
    fn unique_pair_resolves() {
        let file = lines(&["fn a() {", "    1", "}", "fn b() {", "    2", "}"]);
        let span = resolve(&file, &text("fn a() {", "}", false), &[]).unwrap();
        assert_eq!(span, Span { start: 1, end: 3 });
    }

    #[test]
    fn structural_filter_picks_matching_depth() {
        // Anchors match at two nesting depths; only the pair whose closing
        // indentation matches its opening indentation survives.
        let file = lines(&[
            "def foo():",
            "    def foo():",
            "        return 0",
            "    return 0",
        ]);
        let span = resolve(&file, &text("def foo():", "return 0", false), &[]).unwrap();
        assert_eq!(span, Span { start: 2, end: 4 });
    }

    #[test]
    fn hint_filter_disambiguates() {
        let file = lines(&[
            "def a():",
            "    alpha()",
            "    beta()",
            "    done()",
            "def a():",
            "    gamma()",
            "    delta()",
            "    done()",
            "x = 1",
        ]);
        // Structural filter keeps both bodies; hints owned uniquely by the
        // second candidate decide.
        let hints = lines(&["    gamma()", "    delta()"]);
        let span = resolve(&file, &text("def a():", "    done()", false), &hints).unwrap();
        assert_eq!(span, Span { start: 5, end: 8 });
    }

    #[test]
    fn too_few_hints_fail() {
        let file = lines(&[
            "def a():",
            "    alpha()",
            "    done()",
            "def a():",
            "    beta()",
            "    done()",
            "x = 1",
        ]);
        let hints = lines(&["    beta()"]);
        let err = resolve(&file, &text("def a():", "    done()", false), &hints).unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { .. }));
    }

    #[test]
    fn hint_tie_fails() {
        let file = lines(&[
            "def a():",
            "    shared()",
            "    also_shared()",
            "    done()",
            "def a():",
            "    shared()",
            "    also_shared()",
            "    done()",
            "x = 1",
        ]);
        let hints = lines(&["    shared()", "    also_shared()"]);
        let err = resolve(&file, &text("def a():", "    done()", false), &hints).unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { .. }));
    }

    #[test]
    fn numeric_spans_validate_bounds() {
        let file = lines(&["a", "b", "c"]);
        assert_eq!(
            resolve(&file, &AnchorSpec::Lines { start: 2, end: 3 }, &[]).unwrap(),
            Span { start: 2, end: 3 }
        );
        assert!(matches!(
            resolve(&file, &AnchorSpec::Lines { start: 2, end: 9 }, &[]),
            Err(ResolveError::OutOfBounds { .. })
        ));
        assert!(matches!(
            resolve(&file, &AnchorSpec::Lines { start: 0, end: 1 }, &[]),
            Err(ResolveError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn empty_file_never_matches() {
        assert_eq!(
            resolve(&[], &text("x", "x", true), &[]),
            Err(ResolveError::NotFound)
        );
    }

    #[test]
    fn byte_ranges_for_labels() {
        let content = "one\ntwo\nthree\n";
        assert_eq!(byte_range_of_lines(content, 2, 2), Some((4, 7)));
        assert_eq!(byte_range_of_lines(content, 1, 3), Some((0, 13)));
        assert_eq!(byte_range_of_lines(content, 4, 4), None);
    }
}
