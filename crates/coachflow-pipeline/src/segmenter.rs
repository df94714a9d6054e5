//! Incremental extraction of answer blocks from the raw output log.
//!
//! The log is an append-only list of chunks whose boundaries may split lines.
//! [`OutputSegmenter::update`] scans only chunks it has not seen, keeps a
//! partially buffered answer across calls, and never emits an answer twice.
//! Splitting the same text into different chunks yields the same answers.

use std::collections::HashSet;

use coachflow_types::{AnswerKind, AnswerRecord};
use regex::Regex;

use crate::graph::PipelineEdge;
use crate::markers::{MarkerKind, Markers};

#[derive(Debug, Clone)]
struct OpenAnswer {
    kind: AnswerKind,
    lines: Vec<String>,
    /// Buffered lines concatenated without separators; end markers are
    /// tested against this plus the candidate line.
    joined: String,
}

impl OpenAnswer {
    fn new(kind: AnswerKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
            joined: String::new(),
        }
    }

    fn closes_with(&self, line: &str, ends: &[Regex]) -> bool {
        let candidate = format!("{}{}", self.joined, line);
        ends.iter().any(|end| end.is_match(&candidate))
    }

    fn push(&mut self, line: &str) {
        self.joined.push_str(line);
        self.lines.push(line.to_string());
    }

    fn finish(self) -> AnswerRecord {
        AnswerRecord::new(self.lines, self.kind)
    }
}

#[derive(Debug, Clone)]
pub struct OutputSegmenter {
    answer_start: Regex,
    refined_start: Regex,
    /// Answer end and refinement prompt.
    ends: [Regex; 2],
    /// The subset of `ends` that may close on an unterminated line.
    partial_ends: Vec<Regex>,
    /// Chunks fully consumed.
    parsed_through: usize,
    /// Unterminated text after the last newline.
    partial: String,
    /// The partial line already closed an answer; skip it once completed.
    partial_closed: bool,
    open: Option<OpenAnswer>,
}

impl OutputSegmenter {
    pub fn new(markers: &Markers) -> Self {
        let ends = [
            markers.get(MarkerKind::AnswerEnd).clone(),
            markers.get(MarkerKind::RefinementPrompt).clone(),
        ];
        let partial_ends = ends
            .iter()
            .filter(|end| holds_on_extension(end))
            .cloned()
            .collect();
        Self {
            answer_start: markers.get(MarkerKind::AnswerStart).clone(),
            refined_start: markers.get(MarkerKind::RefinedStart).clone(),
            ends,
            partial_ends,
            parsed_through: 0,
            partial: String::new(),
            partial_closed: false,
            open: None,
        }
    }

    pub fn reset(&mut self) {
        self.parsed_through = 0;
        self.partial.clear();
        self.partial_closed = false;
        self.open = None;
    }

    pub fn parsed_through(&self) -> usize {
        self.parsed_through
    }

    /// Whether an answer start was seen without its end yet.
    pub fn has_open_answer(&self) -> bool {
        self.open.is_some()
    }

    /// Scan chunks appended since the last call and return newly completed
    /// answers. A log shorter than what was already consumed means it was
    /// cleared; scanning restarts from scratch.
    pub fn update(&mut self, log: &[String]) -> Vec<AnswerRecord> {
        if log.len() < self.parsed_through {
            self.reset();
        }
        let mut completed = Vec::new();
        for chunk in &log[self.parsed_through..] {
            self.feed(chunk, &mut completed);
        }
        self.parsed_through = log.len();
        self.check_partial(&mut completed);
        completed
    }

    fn feed(&mut self, chunk: &str, completed: &mut Vec<AnswerRecord>) {
        let mut rest = chunk;
        while let Some(newline) = rest.find('\n') {
            let mut line = std::mem::take(&mut self.partial);
            line.push_str(&rest[..newline]);
            rest = &rest[newline + 1..];
            if std::mem::take(&mut self.partial_closed) {
                continue;
            }
            self.scan_line(&line, completed);
        }
        self.partial.push_str(rest);
    }

    fn scan_line(&mut self, line: &str, completed: &mut Vec<AnswerRecord>) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match self.open.take() {
            Some(open) if open.closes_with(line, &self.ends) => completed.push(open.finish()),
            Some(mut open) => {
                open.push(line);
                self.open = Some(open);
            }
            None => {
                if self.refined_start.is_match(line) {
                    self.open = Some(OpenAnswer::new(AnswerKind::Refined));
                } else if self.answer_start.is_match(line) {
                    self.open = Some(OpenAnswer::new(AnswerKind::Default));
                }
            }
        }
    }

    /// An end marker may sit on a line that has no newline yet, so the
    /// trailing partial line is tested too. Only markers whose match survives
    /// any continuation of the line count here; end-anchored ones wait for
    /// the newline, otherwise the result would depend on chunk boundaries.
    fn check_partial(&mut self, completed: &mut Vec<AnswerRecord>) {
        if self.partial.is_empty() || self.partial_closed || self.partial_ends.is_empty() {
            return;
        }
        let line = self.partial.strip_suffix('\r').unwrap_or(&self.partial);
        let closes = self
            .open
            .as_ref()
            .is_some_and(|open| open.closes_with(line, &self.partial_ends));
        if closes {
            if let Some(open) = self.open.take() {
                completed.push(open.finish());
            }
            self.partial_closed = true;
        }
    }
}

/// A pattern without an end anchor keeps matching when text is appended.
fn holds_on_extension(pattern: &Regex) -> bool {
    let source = pattern.as_str();
    !(source.ends_with('$') || source.ends_with("\\z") || source.ends_with("\\b"))
}

/// Whether answer `index` passes the selection filter: with no node
/// selected every answer does, otherwise only answers whose linearized
/// edge starts at a selected node.
pub fn answer_visible(index: usize, order: &[PipelineEdge], selected: &HashSet<String>) -> bool {
    selected.is_empty()
        || order
            .get(index)
            .is_some_and(|edge| selected.contains(&edge.source))
}

/// Answers to display. With no node selected every answer is shown;
/// otherwise answer `i` is shown only when the source of the `i`-th
/// linearized edge is selected.
pub fn visible_answers<'a>(
    answers: &'a [AnswerRecord],
    order: &[PipelineEdge],
    selected: &HashSet<String>,
) -> Vec<&'a AnswerRecord> {
    answers
        .iter()
        .enumerate()
        .filter(|(i, _)| answer_visible(*i, order, selected))
        .map(|(_, answer)| answer)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> OutputSegmenter {
        OutputSegmenter::new(&Markers::default())
    }

    fn log(chunks: &[&str]) -> Vec<String> {
        chunks.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn answer_split_across_two_chunks() {
        let mut seg = segmenter();
        let mut raw = log(&["...LLM ANSWER\nhello\n"]);
        assert!(seg.update(&raw).is_empty());
        assert!(seg.has_open_answer());

        raw.push("world\n***** END\n".into());
        let answers = seg.update(&raw);
        assert_eq!(
            answers,
            vec![AnswerRecord::new(
                vec!["hello".into(), "world".into()],
                AnswerKind::Default
            )]
        );
    }

    #[test]
    fn single_chunk_gives_identical_result() {
        let mut seg = segmenter();
        let raw = log(&["...LLM ANSWER\nhello\nworld\n***** END\n"]);
        let answers = seg.update(&raw);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].lines, vec!["hello", "world"]);
        assert_eq!(answers[0].kind, AnswerKind::Default);
    }

    #[test]
    fn update_without_new_chunks_emits_nothing() {
        let mut seg = segmenter();
        let raw = log(&["LLM ANSWER\nx\n***** END\n"]);
        assert_eq!(seg.update(&raw).len(), 1);
        assert!(seg.update(&raw).is_empty());
        assert!(seg.update(&raw).is_empty());
    }

    #[test]
    fn every_chunk_split_matches_whole_text() {
        let text = "noise\r\nLLM ANSWER\r\nfirst line\nsecond\n***** DONE\n\
                    REFINED ANSWER\nbetter\nIs the task refinement adequate?\n";
        let whole = segmenter().update(&log(&[text]));
        assert_eq!(whole.len(), 2);

        for cut in 1..text.len() {
            if !text.is_char_boundary(cut) {
                continue;
            }
            let mut seg = segmenter();
            let mut raw = vec![text[..cut].to_string()];
            let mut answers = seg.update(&raw);
            raw.push(text[cut..].to_string());
            answers.extend(seg.update(&raw));
            assert_eq!(answers, whole, "split at {cut}");
        }
    }

    #[test]
    fn byte_by_byte_feed_matches() {
        let text = "LLM ANSWER\nab\ncd\n***** END\nLLM ANSWER\nef\n***** END\n";
        let mut seg = segmenter();
        let mut raw = Vec::new();
        let mut answers = Vec::new();
        for ch in text.chars() {
            raw.push(ch.to_string());
            answers.extend(seg.update(&raw));
        }
        assert_eq!(answers, segmenter().update(&log(&[text])));
        assert_eq!(answers.len(), 2);
        assert_eq!(seg.parsed_through(), raw.len());
    }

    #[test]
    fn refined_answer_closed_by_refinement_prompt() {
        let mut seg = segmenter();
        let mut raw = log(&["REFINED ANSWER\nbetter plan\nIs the task refinement adequate?"]);
        // The prompt is end-anchored: an unterminated line may still grow.
        assert!(seg.update(&raw).is_empty());
        assert!(seg.has_open_answer());

        raw.push("\n".into());
        let answers = seg.update(&raw);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].kind, AnswerKind::Refined);
        assert_eq!(answers[0].lines, vec!["better plan"]);
        assert_eq!(answers[0].title(), "Refined Answer");
    }

    #[test]
    fn partial_end_line_not_emitted_twice() {
        let mut seg = segmenter();
        let mut raw = log(&["LLM ANSWER\nbody\n***** EN"]);
        assert_eq!(seg.update(&raw).len(), 1);
        raw.push("D\nafter\n".into());
        assert!(seg.update(&raw).is_empty());
        assert!(!seg.has_open_answer());
    }

    #[test]
    fn end_marker_spanning_buffered_lines() {
        // The buffer is joined without separators, so stars split over two
        // lines still close the answer.
        let mut seg = segmenter();
        let raw = log(&["LLM ANSWER\nabc**\n*** end\n"]);
        let answers = seg.update(&raw);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].lines, vec!["abc**"]);
    }

    #[test]
    fn text_outside_answers_is_ignored() {
        let mut seg = segmenter();
        let raw = log(&["***** END\nplain output\nChoose an action (or hit Enter for inference) :"]);
        assert!(seg.update(&raw).is_empty());
        assert!(!seg.has_open_answer());
    }

    #[test]
    fn cleared_log_restarts_scan() {
        let mut seg = segmenter();
        let raw = log(&["LLM ANSWER\nold\n"]);
        seg.update(&raw);
        assert!(seg.has_open_answer());

        let answers = seg.update(&[]);
        assert!(answers.is_empty());
        assert!(!seg.has_open_answer());
        assert_eq!(seg.parsed_through(), 0);

        let fresh = log(&["LLM ANSWER\nnew\n***** END\n"]);
        let answers = seg.update(&fresh);
        assert_eq!(answers[0].lines, vec!["new"]);
    }

    #[test]
    fn visible_answers_follow_selected_sources() {
        let answers = vec![
            AnswerRecord::new(vec!["one".into()], AnswerKind::Default),
            AnswerRecord::new(vec!["two".into()], AnswerKind::Default),
            AnswerRecord::new(vec!["three".into()], AnswerKind::Refined),
        ];
        let order = vec![
            PipelineEdge::new("e1", "coach", "coder"),
            PipelineEdge::new("e2", "coder", "critic"),
        ];

        let none = HashSet::new();
        assert_eq!(visible_answers(&answers, &order, &none).len(), 3);

        let selected: HashSet<String> = ["coder".to_string()].into_iter().collect();
        let shown = visible_answers(&answers, &order, &selected);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].lines, vec!["two"]);
    }

    #[test]
    fn anchored_prompt_prefix_does_not_close_early() {
        let text = "REFINED ANSWER\nx\nIs the task refinement adequate? (y/n)\n***** END\n";
        let whole = segmenter().update(&log(&[text]));
        assert_eq!(whole.len(), 1);
        assert_eq!(
            whole[0].lines,
            vec!["x", "Is the task refinement adequate? (y/n)"]
        );

        for cut in 1..text.len() {
            let mut seg = segmenter();
            let mut raw = vec![text[..cut].to_string()];
            let mut answers = seg.update(&raw);
            raw.push(text[cut..].to_string());
            answers.extend(seg.update(&raw));
            assert_eq!(answers, whole, "split at {cut}");
        }
    }

    #[test]
    fn unanchored_end_marker_closes_partial_line() {
        let mut seg = segmenter();
        let answers = seg.update(&log(&["LLM ANSWER\nbody\n***** END"]));
        assert_eq!(answers.len(), 1);
        assert!(!seg.has_open_answer());
    }

    #[test]
    fn answer_visible_follows_edge_sources() {
        let order = vec![
            PipelineEdge::new("e1", "coach", "coder"),
            PipelineEdge::new("e2", "coder", "cap"),
        ];
        assert!(answer_visible(3, &order, &HashSet::new()));

        let selected: HashSet<String> = ["coder".to_string()].into();
        assert!(!answer_visible(0, &order, &selected));
        assert!(answer_visible(1, &order, &selected));
        assert!(!answer_visible(2, &order, &selected));
    }
}
