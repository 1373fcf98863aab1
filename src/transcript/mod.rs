//! Dialogue transcripts: parsing, rendering and measurement.
//!
//! A transcript is a sequence of `<Person1>…</Person1>` / `<Person2>…</Person2>`
//! turns. Everything the model produces passes through [`parse_transcript`]
//! before the pipeline touches it, so downstream code can rely on balanced tags,
//! merged same-speaker turns and strict alternation.

mod parser;
mod text;

pub use parser::{parse_transcript, parse_transcript_lenient, Transcript, Turn};
pub use text::{contains_spoken_digits, spoken_digit_snippets, strip_markup, word_count};
