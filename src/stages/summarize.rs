use async_trait::async_trait;

use super::{hosted::HostedClient, input_text, StageExecutor, StageInputs, StageOutput};
use crate::context::{RunContext, StageKind};
use crate::StageError;

/// Deterministic extractive summarizer: keeps leading sentences until the
/// word budget is spent. No external calls, so it can never be unavailable.
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split text into sentences on terminal punctuation, keeping the punctuation.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Lead-based extractive summary bounded by `max_words`.
pub fn summarize_extractive(text: &str, max_words: usize) -> String {
    let sentences = split_sentences(text);
    let mut summary = String::new();
    let mut words = 0;

    for sentence in &sentences {
        let sentence_words = word_count(sentence);
        if words + sentence_words > max_words {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
        words += sentence_words;
    }

    // Even a single over-budget sentence must yield something: truncate it.
    if summary.is_empty() {
        summary = text
            .split_whitespace()
            .take(max_words)
            .collect::<Vec<_>>()
            .join(" ");
    }

    summary
}

/// Hard cap applied to any backend's output, hosted ones included.
fn enforce_max_words(text: &str, max_words: usize) -> String {
    if word_count(text) <= max_words {
        return text.to_string();
    }
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl StageExecutor for ExtractiveSummarizer {
    async fn execute(
        &self,
        ctx: &RunContext,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let transcript = input_text(inputs, StageKind::Transcribe)?;
        let summary = summarize_extractive(&transcript, ctx.limits.summary_max_words);
        Ok(StageOutput::bytes(summary.into_bytes()))
    }

    fn name(&self) -> &'static str {
        "extractive summarizer"
    }
}

/// Hosted-API summarization backend.
pub struct HostedSummarizer {
    client: HostedClient,
}

impl HostedSummarizer {
    pub fn new(client: HostedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StageExecutor for HostedSummarizer {
    async fn execute(
        &self,
        ctx: &RunContext,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let transcript = input_text(inputs, StageKind::Transcribe)?;
        let max_words = ctx.limits.summary_max_words;

        let prompt = format!(
            "Please summarize the following text in at most {} words:\n\n{}",
            max_words, transcript
        );

        let summary = self
            .client
            .chat(
                "You are a helpful assistant that creates concise summaries.",
                &prompt,
                // Rough tokens-per-word margin so the bound is hit by words,
                // not by an API truncation mid-sentence.
                max_words * 2,
            )
            .await?;

        let summary = enforce_max_words(&summary, max_words);
        Ok(StageOutput::bytes(summary.into_bytes()))
    }

    fn name(&self) -> &'static str {
        "hosted API summarizer"
    }
}
