use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use super::{hosted::HostedClient, input_text, StageExecutor, StageInputs, StageOutput};
use crate::context::{RunContext, StageKind};
use crate::StageError;

const DEFAULT_TITLE: &str = "Video Summary Blog Post";

/// Templated blog generation: deterministic Markdown with no external call.
/// This is the required fallback backend - it cannot be unavailable.
pub struct TemplateBlogWriter;

impl TemplateBlogWriter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemplateBlogWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the blog post template. Kept free of clock and context access so
/// the output for a given input is fully deterministic.
pub fn render_template(summary: &str, title: &str, source_url: &str, date: NaiveDate) -> String {
    let date_str = date.format("%Y-%m-%d");

    let mut post = format!(
        "# {title}\n\
         \n\
         *Published: {date_str}*\n\
         \n\
         ## Overview\n\
         \n\
         This post was generated from a video summary, capturing the key \
         insights in an easily digestible format.\n\
         \n\
         ## Summary\n\
         \n\
         {summary}\n\
         \n\
         ## Key Points\n\
         \n\
         - Main topics covered in the video\n\
         - Important insights and takeaways\n\
         - Actionable information for readers\n\
         \n\
         ## Conclusion\n\
         \n\
         This summary provides an overview of the video content for those \
         who prefer reading over watching.\n"
    );

    if !source_url.is_empty() {
        post.push_str(&format!(
            "\n---\n\n**Original Video:** [{source_url}]({source_url})\n"
        ));
    }

    post
}

#[async_trait]
impl StageExecutor for TemplateBlogWriter {
    async fn execute(
        &self,
        ctx: &RunContext,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let summary = input_text(inputs, StageKind::Summarize)?;
        let title = ctx.title.as_deref().unwrap_or(DEFAULT_TITLE);

        let post = render_template(
            summary.trim(),
            title,
            &ctx.source_url,
            Utc::now().date_naive(),
        );

        Ok(StageOutput::bytes(post.into_bytes()))
    }

    fn name(&self) -> &'static str {
        "template blog writer"
    }
}

/// Hosted-API blog generation backend.
pub struct HostedBlogWriter {
    client: HostedClient,
}

impl HostedBlogWriter {
    pub fn new(client: HostedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StageExecutor for HostedBlogWriter {
    async fn execute(
        &self,
        ctx: &RunContext,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let summary = input_text(inputs, StageKind::Summarize)?;
        let title = ctx.title.as_deref().unwrap_or(DEFAULT_TITLE);

        let prompt = format!(
            "Create an engaging blog post from the following summary:\n\n\
             Summary: {}\n\n\
             Please format the blog post with:\n\
             - An engaging title (if none fits, use: \"{}\")\n\
             - Introduction paragraph\n\
             - Main content sections with subheadings\n\
             - Conclusion\n\
             - Use markdown formatting\n\n\
             Make it informative, well-structured, and SEO-friendly.",
            summary.trim(),
            title
        );

        let post = self
            .client
            .chat(
                "You are a professional content writer who creates engaging blog posts.",
                &prompt,
                1000,
            )
            .await?;

        Ok(StageOutput::bytes(post.into_bytes()))
    }

    fn name(&self) -> &'static str {
        "hosted API blog writer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 31).unwrap()
    }

    #[test]
    fn test_template_begins_with_title_line() {
        let post = render_template("A summary.", "My Title", "https://video.example/abc", date());
        assert!(post.starts_with("# My Title\n"));
    }

    #[test]
    fn test_template_is_deterministic() {
        let a = render_template("A summary.", "T", "https://v.example/x", date());
        let b = render_template("A summary.", "T", "https://v.example/x", date());
        assert_eq!(a, b);
    }

    #[test]
    fn test_template_embeds_summary_and_source() {
        let post = render_template("Key insight here.", "T", "https://v.example/x", date());
        assert!(post.contains("Key insight here."));
        assert!(post.contains("[https://v.example/x](https://v.example/x)"));
        assert!(post.contains("*Published: 2026-08-31*"));
    }

    #[test]
    fn test_template_without_source_url() {
        let post = render_template("S.", "T", "", date());
        assert!(!post.contains("Original Video"));
    }
}
