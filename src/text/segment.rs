//! Splits long Markdown text into pieces that fit a message-length limit.
//!
//! Lengths are counted in chars, which is how Discord counts them. Splits
//! prefer headings, numbered lines and paragraph breaks, and never fall inside
//! a fenced code block unless the block by itself is longer than the limit.
//! In that case the block is cut into pieces that each reopen and close the
//! fence, so every piece still renders as code.

use std::sync::LazyLock;

use regex::Regex;

/// Default limit, a little under Discord's 2000 so a prefix still fits.
pub const DEFAULT_LIMIT: usize = 1900;

const FENCE: &str = "```";

/// Boundaries in order of preference. Each match starts at the newline that
/// ends the previous segment.
static BOUNDARIES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\n# ", "\n"),
        (r"\n## ", "\n"),
        (r"\n### ", "\n"),
        (r"\n\d", "\n"),
        (r"\n\n", "\n\n"),
        (r"\n", "\n"),
    ]
    .into_iter()
    .filter_map(|(pattern, separator)| Regex::new(pattern).ok().map(|re| (re, separator)))
    .collect()
});

/// One piece of segmented text and the separator that followed it in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub body: String,
    pub separator: String,
}

/// A fenced block: from the first byte of its opening line to the end of its
/// closing line (without the newline), or to the end of the text.
#[derive(Debug)]
struct CodeBlock {
    start: usize,
    end: usize,
    opening: String,
    closing_start: Option<usize>,
}

impl CodeBlock {
    fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// Splits `text` into bodies of at most `limit` chars. See [`segment`].
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    segment(text, limit).into_iter().map(|s| s.body).collect()
}

/// Splits `text` into segments of at most `limit` chars each.
///
/// Joining every `body + separator` gives back `text`, except where an
/// oversized code block had its fences repeated. Empty input yields a single
/// empty segment.
pub fn segment(text: &str, limit: usize) -> Vec<Segment> {
    let limit = limit.max(1);
    let blocks = find_code_blocks(text);
    let mut segments = Vec::new();
    let mut pos = 0;

    while char_len(&text[pos..]) > limit {
        if let Some(block) = blocks.iter().find(|b| b.start == pos) {
            if char_len(&text[block.start..block.end]) > limit {
                split_block(text, block, limit, &mut segments);
                pos = block.end;
                if text[pos..].starts_with('\n') {
                    push(&mut segments, "", "\n");
                    pos += 1;
                }
                continue;
            }
        }

        let window_start = advance(text, pos, limit / 2);
        let window_end = advance(text, pos, limit);

        if let Some((split, separator)) = find_boundary(text, &blocks, window_start, window_end) {
            push(&mut segments, &text[pos..split], separator);
            pos = split + separator.len();
            continue;
        }

        // A block opens inside the window and runs past it: end the segment
        // right before the block so it starts the next one.
        if let Some(block) = blocks
            .iter()
            .find(|b| b.start > pos && b.start < window_end && b.end > window_end)
        {
            push(&mut segments, &text[pos..block.start - 1], "\n");
            pos = block.start;
            continue;
        }

        push(&mut segments, &text[pos..window_end], "");
        pos = window_end;
    }

    let rest = &text[pos..];
    if !rest.is_empty() || segments.is_empty() {
        segments.push(Segment {
            body: rest.to_string(),
            separator: String::new(),
        });
    }
    segments
}

/// Adds a segment. An empty body only carries its separator over to the
/// previous segment, so no empty messages are produced mid-text.
fn push(segments: &mut Vec<Segment>, body: &str, separator: &str) {
    if body.is_empty() {
        if let Some(last) = segments.last_mut() {
            last.separator.push_str(separator);
            return;
        }
    }
    segments.push(Segment {
        body: body.to_string(),
        separator: separator.to_string(),
    });
}

fn find_code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, &str)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let content = line.strip_suffix('\n').unwrap_or(line);
        let line_start = offset;
        offset += line.len();

        if !content.trim().starts_with(FENCE) {
            continue;
        }
        match open.take() {
            None => open = Some((line_start, content)),
            Some((start, opening)) => blocks.push(CodeBlock {
                start,
                end: line_start + content.len(),
                opening: opening.to_string(),
                closing_start: Some(line_start),
            }),
        }
    }

    if let Some((start, opening)) = open {
        blocks.push(CodeBlock {
            start,
            end: text.len(),
            opening: opening.to_string(),
            closing_start: None,
        });
    }
    blocks
}

/// Latest boundary of the highest-priority kind within `[window_start, window_end]`
/// that is not inside a code block.
fn find_boundary(
    text: &str,
    blocks: &[CodeBlock],
    window_start: usize,
    window_end: usize,
) -> Option<(usize, &'static str)> {
    let haystack = &text[window_start..];
    BOUNDARIES.iter().find_map(|(re, separator)| {
        re.find_iter(haystack)
            .map(|m| window_start + m.start())
            .take_while(|&at| at <= window_end)
            .filter(|&at| !blocks.iter().any(|b| b.contains(at)))
            .last()
            .map(|at| (at, *separator))
    })
}

/// Cuts an oversized block into pieces that each carry the opening fence line
/// and a closing fence.
fn split_block(text: &str, block: &CodeBlock, limit: usize, segments: &mut Vec<Segment>) {
    let opening = block.opening.as_str();
    let overhead = char_len(opening) + 1 + 1 + FENCE.len();
    if limit <= overhead {
        for piece in hard_chunks(&text[block.start..block.end], limit) {
            push(segments, piece, "");
        }
        return;
    }
    let budget = limit - overhead;

    let body_start = (block.start + opening.len() + 1).min(block.end);
    let body_end = match block.closing_start {
        Some(closing) => closing.saturating_sub(1).max(body_start),
        None => block.end,
    };

    let mut rest = &text[body_start..body_end];
    loop {
        let (piece, remainder) = if char_len(rest) <= budget {
            (rest, "")
        } else {
            let cut = advance(rest, 0, budget);
            if rest[cut..].starts_with('\n') {
                (&rest[..cut], &rest[cut + 1..])
            } else {
                match rest[..cut].rfind('\n') {
                    Some(newline) if newline > 0 => (&rest[..newline], &rest[newline + 1..]),
                    _ => (&rest[..cut], &rest[cut..]),
                }
            }
        };
        push(segments, &format!("{opening}\n{piece}\n{FENCE}"), "");
        if remainder.is_empty() {
            break;
        }
        rest = remainder;
    }
}

fn hard_chunks(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let end = advance(text, pos, limit);
        chunks.push(&text[pos..end]);
        pos = end;
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset `chars` characters after `from`, clamped to the end of `text`.
fn advance(text: &str, from: usize, chars: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(chars)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejoin(segments: &[Segment]) -> String {
        segments
            .iter()
            .map(|s| format!("{}{}", s.body, s.separator))
            .collect()
    }

    fn fence_lines(body: &str) -> usize {
        body.lines()
            .filter(|l| l.trim().starts_with(FENCE))
            .count()
    }

    fn assert_bounded(segments: &[Segment], limit: usize) {
        for s in segments {
            assert!(
                char_len(&s.body) <= limit,
                "segment of {} chars over limit {}",
                char_len(&s.body),
                limit
            );
        }
    }

    /// Deterministic pseudo-random Markdown made of prose, headings, lists
    /// and short code blocks.
    fn sample_markdown(seed: u64, paragraphs: usize) -> String {
        let mut state = seed;
        let mut next = move |n: u64| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) % n
        };
        let words = ["tokio", "feed", "relay", "über", "entry", "日本", "discord", "a"];
        let mut out = String::new();
        for _ in 0..paragraphs {
            match next(5) {
                0 => out.push_str("# Heading\n"),
                1 => out.push_str("1. first item\n2. second item\n"),
                2 => {
                    out.push_str("```rust\n");
                    for i in 0..next(6) {
                        out.push_str(&format!("let x{i} = {i};\n"));
                    }
                    out.push_str("```\n");
                }
                _ => {
                    for _ in 0..(5 + next(60)) {
                        out.push_str(words[next(words.len() as u64) as usize]);
                        out.push(' ');
                    }
                    out.push('\n');
                }
            }
            if next(2) == 0 {
                out.push('\n');
            }
        }
        out
    }

    #[test]
    fn short_text_is_one_segment() {
        let segments = segment("hello", 2000);
        assert_eq!(
            segments,
            vec![Segment {
                body: "hello".to_string(),
                separator: String::new()
            }]
        );
    }

    #[test]
    fn empty_text_yields_one_empty_segment() {
        assert_eq!(split_text("", 2000), vec![String::new()]);
    }

    #[test]
    fn unbroken_text_is_hard_split_at_the_limit() {
        let text = "x".repeat(5000);
        let segments = split_text(&text, 2000);
        let lengths: Vec<usize> = segments.iter().map(|s| s.len()).collect();
        assert_eq!(lengths, vec![2000, 2000, 1000]);
        assert_eq!(segments.concat(), text);
    }

    #[test]
    fn hard_split_respects_char_boundaries() {
        let text = "é".repeat(25);
        let segments = split_text(&text, 10);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].chars().count(), 10);
        assert_eq!(segments.concat(), text);
    }

    #[test]
    fn heading_is_preferred_over_paragraph_break() {
        let text = format!(
            "{}\n\n{}\n# Next section\n{}",
            "a".repeat(60),
            "b".repeat(20),
            "c".repeat(40)
        );
        let segments = segment(&text, 100);
        assert!(segments[1].body.starts_with("# Next section"));
        assert_eq!(rejoin(&segments), text);
    }

    #[test]
    fn paragraph_break_separator_is_consumed() {
        let text = format!("{}\n\n{}", "a".repeat(70), "b".repeat(70));
        let segments = segment(&text, 100);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].body, "a".repeat(70));
        assert_eq!(segments[0].separator, "\n\n");
        assert_eq!(segments[1].body, "b".repeat(70));
    }

    #[test]
    fn boundary_before_half_limit_is_ignored() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(150));
        let segments = split_text(&text, 100);
        assert_eq!(segments[0].len(), 100);
    }

    #[test]
    fn code_block_that_fits_is_not_split() {
        let code = format!("```rust\n{}\n```", "let x = 1;\n".repeat(6).trim_end());
        let text = format!("{}\n{}\n{}", "a".repeat(60), code, "b".repeat(50));
        let segments = segment(&text, 100);

        assert_bounded(&segments, 100);
        assert!(segments.iter().any(|s| s.body.contains(&code)));
        assert!(segments.iter().all(|s| fence_lines(&s.body) % 2 == 0));
        assert_eq!(rejoin(&segments), text);
    }

    #[test]
    fn newlines_inside_code_are_not_boundaries() {
        let code = format!("```\n{}\n```", "line\n".repeat(10).trim_end());
        let text = format!("{}\n{}", "a".repeat(30), code);
        let segments = segment(&text, 80);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].body, "a".repeat(30));
        assert_eq!(segments[1].body, code);
    }

    #[test]
    fn oversized_code_block_is_refenced() {
        let body: Vec<String> = (0..60).map(|i| format!("let value_{i} = {i};")).collect();
        let text = format!("Intro\n```rust\n{}\n```\nOutro", body.join("\n"));
        let segments = segment(&text, 200);

        assert_bounded(&segments, 200);
        let pieces: Vec<&Segment> = segments
            .iter()
            .filter(|s| s.body.starts_with("```rust"))
            .collect();
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.body.ends_with("\n```"));
            assert_eq!(fence_lines(&piece.body), 2);
        }
        assert_eq!(segments.first().unwrap().body, "Intro");
        assert_eq!(segments.last().unwrap().body, "Outro");

        // Dropping the repeated fences gives back the original code lines.
        let code_lines: Vec<&str> = pieces
            .iter()
            .flat_map(|p| p.body.lines())
            .filter(|l| !l.starts_with(FENCE))
            .collect();
        assert_eq!(code_lines, body.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn oversized_single_line_code_is_hard_split_inside_fences() {
        let text = format!("```\n{}\n```", "z".repeat(500));
        let segments = segment(&text, 100);
        assert_bounded(&segments, 100);
        assert!(segments.iter().all(|s| s.body.starts_with("```\n")));
        assert!(segments.iter().all(|s| fence_lines(&s.body) == 2));
    }

    #[test]
    fn segmentation_is_deterministic() {
        let text = sample_markdown(7, 80);
        assert_eq!(segment(&text, 300), segment(&text, 300));
    }

    #[test]
    fn generated_markdown_round_trips_within_bounds() {
        for seed in 0..40 {
            let text = sample_markdown(seed, 60);
            for limit in [120, 300, 1900] {
                let segments = segment(&text, limit);
                assert_bounded(&segments, limit);
                assert_eq!(rejoin(&segments), text, "seed {seed} limit {limit}");
                for s in &segments {
                    assert_eq!(fence_lines(&s.body) % 2, 0, "seed {seed} limit {limit}");
                }
            }
        }
    }
}
