use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidsmith::cli::{Cli, Commands, Method};
use vidsmith::config::Config;
use vidsmith::context::{BackendId, RunContext, StageKind};
use vidsmith::pipeline::Orchestrator;
use vidsmith::stages::{OutputPayload, StageExecutor, StageInputs, StageOutput};
use vidsmith::store::{Artifact, ArtifactStore};
use vidsmith::{output, pipeline, stages, utils};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "vidsmith=debug" } else { "vidsmith=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().await?;

    // Missing external tools are a warning, not an error: template backends
    // and cached artifacts still work without them.
    if !cli.quiet {
        let missing = utils::check_dependencies(&config.tools).await;
        if !missing.is_empty() {
            eprintln!("⚠️  Dependency check warnings:");
            for dep in missing {
                eprintln!("   • {}", dep);
            }
        }
    }

    match cli.command {
        Commands::Run {
            url,
            output_dir,
            summarize_method,
            blog_method,
            podcast_method,
            model,
            max_length,
            timeout,
            title,
            require,
            manifest,
            format,
        } => {
            let mut backends = HashMap::new();
            backends.insert(StageKind::Summarize, BackendId::from(summarize_method));
            backends.insert(StageKind::BlogGen, BackendId::from(blog_method));
            backends.insert(StageKind::PodcastGen, BackendId::from(podcast_method));

            let mut limits = config.limits();
            if let Some(size) = model {
                limits.model_size = size;
            }
            if let Some(words) = max_length {
                limits.summary_max_words = words;
            }
            if let Some(secs) = timeout {
                limits.stage_timeout = std::time::Duration::from_secs(secs);
            }

            let output_root = output_dir.unwrap_or_else(|| config.app.output_root.clone());
            let ctx = RunContext::new(url.as_str(), &output_root, backends, limits)
                .with_title(title)
                .with_hosted_api(config.hosted_available());

            let store = ArtifactStore::new(&output_root);
            let executors = stages::executor_set(&ctx, &config)?;
            let orchestrator =
                Orchestrator::new(store, executors).with_progress(!cli.quiet);

            // Ctrl-C requests cancellation; an in-flight stage finishes first.
            let cancel = orchestrator.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Cancellation requested; finishing current stage");
                    cancel.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            });

            let result = orchestrator.run(&ctx).await;

            output::print_manifest(&result, &format)?;
            if let Some(path) = manifest {
                output::save_manifest(&result, &path)?;
                println!("Manifest saved to: {}", path.display());
            }

            let required: Vec<StageKind> = require.into_iter().map(StageKind::from).collect();
            let rejected = matches!(result.status, pipeline::RunStatus::Rejected { .. });
            if rejected || !result.required_satisfied(&required) {
                std::process::exit(1);
            }
        }

        Commands::Download { url, output } => {
            let ctx = standalone_context(&url, &config);
            let executor = stages::download::MediaDownloader::new(&config)?;
            let result = run_standalone(&executor, &ctx, StageInputs::new()).await?;

            let dest = output.unwrap_or_else(|| {
                PathBuf::from("./downloads").join(format!("{}.mp3", ctx.source_id))
            });
            write_stage_output(result, &dest)?;
            println!("Audio saved to: {}", dest.display());
        }

        Commands::Transcribe { input, output, model } => {
            utils::check_file_accessible(&input)?;
            let mut config = config;
            if let Some(size) = model {
                config.limits.model_size = size;
                config.validate()?;
            }

            let mut ctx = standalone_context(&input.display().to_string(), &config);
            ctx.source_id = file_stem(&input);

            let inputs = single_input(StageKind::Download, &input)?;
            let executor = stages::transcribe::WhisperTranscriber::new(&config);
            let result = run_standalone(&executor, &ctx, inputs).await?;

            let dest = output.unwrap_or_else(|| {
                PathBuf::from("./transcriptions").join(format!("{}_transcript.txt", ctx.source_id))
            });
            write_stage_output(result, &dest)?;
            println!("Transcription saved to: {}", dest.display());
        }

        Commands::Summarize { input, output, method, max_length } => {
            utils::check_file_accessible(&input)?;
            let mut limits = config.limits();
            if let Some(words) = max_length {
                limits.summary_max_words = words;
            }

            let mut ctx = standalone_context("", &config);
            ctx.limits = limits;
            ctx.source_id = file_stem(&input);

            let inputs = single_input(StageKind::Transcribe, &input)?;
            let executor = summarize_executor(method, &ctx, &config)?;
            let result = run_standalone(executor.as_ref(), &ctx, inputs).await?;

            let dest = output.unwrap_or_else(|| {
                PathBuf::from("./summaries").join(format!("{}_summary.txt", ctx.source_id))
            });
            write_stage_output(result, &dest)?;
            println!("Summary saved to: {}", dest.display());
        }

        Commands::Blog { input, output, method, title, video_url } => {
            utils::check_file_accessible(&input)?;
            let title = title.unwrap_or_else(|| "Video Summary Blog Post".to_string());

            let mut ctx = standalone_context(video_url.as_deref().unwrap_or(""), &config)
                .with_title(Some(title.clone()));
            ctx.source_id = file_stem(&input);

            let inputs = single_input(StageKind::Summarize, &input)?;
            let executor = blog_executor(method, &ctx, &config)?;
            let result = run_standalone(executor.as_ref(), &ctx, inputs).await?;

            let dest = output.unwrap_or_else(|| {
                let slug = utils::sanitize_filename(&title).to_lowercase().replace(' ', "_");
                PathBuf::from("./blogs").join(format!("{}_blog.md", slug))
            });
            write_stage_output(result, &dest)?;
            println!("Blog post saved to: {}", dest.display());
        }

        Commands::Podcast { input, output, method, voice } => {
            utils::check_file_accessible(&input)?;
            let mut ctx = standalone_context("", &config);
            if let Some(voice) = voice {
                ctx.limits.tts_voice = voice;
            }
            ctx.source_id = file_stem(&input);

            let inputs = single_input(StageKind::Summarize, &input)?;
            let executor = podcast_executor(method, &ctx, &config)?;
            let result = run_standalone(executor.as_ref(), &ctx, inputs).await?;

            let dest = output.unwrap_or_else(|| {
                PathBuf::from("./podcasts").join(format!("{}.wav", ctx.source_id))
            });
            write_stage_output(result, &dest)?;
            println!("Podcast saved to: {}", dest.display());
        }

        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save().await?;
                println!("Configuration written; edit it to adjust tools and backends.");
            }
        }
    }

    Ok(())
}

/// Context for a single-stage invocation outside the orchestrated run.
fn standalone_context(source: &str, config: &Config) -> RunContext {
    RunContext::new(
        source,
        &config.app.output_root,
        HashMap::new(),
        config.limits(),
    )
    .with_hosted_api(config.hosted_available())
}

async fn run_standalone(
    executor: &dyn StageExecutor,
    ctx: &RunContext,
    inputs: StageInputs,
) -> Result<StageOutput> {
    tracing::info!("Running {}", executor.name());
    let output = tokio::time::timeout(ctx.limits.stage_timeout, executor.execute(ctx, &inputs))
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {}s", ctx.limits.stage_timeout.as_secs()))??;
    Ok(output)
}

fn single_input(stage: StageKind, path: &Path) -> Result<StageInputs> {
    let mut inputs = StageInputs::new();
    inputs.insert(stage, Artifact::for_file(stage, path)?);
    Ok(inputs)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input")
        .to_string()
}

/// Write a standalone stage's output (and any sibling files) to `dest`.
fn write_stage_output(output: StageOutput, dest: &Path) -> Result<()> {
    let parent = dest.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs_err::create_dir_all(parent)?;
    }

    match output.payload {
        OutputPayload::Bytes(content) => fs_err::write(dest, content)?,
        OutputPayload::StagedFile(staged) => {
            fs_err::copy(&staged, dest)?;
            let _ = fs_err::remove_file(&staged);
        }
    }

    for sibling in output.siblings {
        let sibling_dest = match parent {
            Some(parent) => parent.join(&sibling.file_name),
            None => PathBuf::from(&sibling.file_name),
        };
        fs_err::write(&sibling_dest, sibling.content)?;
        println!("Also wrote: {}", sibling_dest.display());
    }

    Ok(())
}

fn summarize_executor(
    method: Method,
    ctx: &RunContext,
    config: &Config,
) -> Result<Box<dyn StageExecutor>> {
    Ok(match method {
        Method::Template | Method::Local => Box::new(stages::summarize::ExtractiveSummarizer::new()),
        Method::Hosted => Box::new(stages::summarize::HostedSummarizer::new(hosted(ctx, config)?)),
    })
}

fn blog_executor(
    method: Method,
    ctx: &RunContext,
    config: &Config,
) -> Result<Box<dyn StageExecutor>> {
    Ok(match method {
        Method::Template | Method::Local => Box::new(stages::blog::TemplateBlogWriter::new()),
        Method::Hosted => Box::new(stages::blog::HostedBlogWriter::new(hosted(ctx, config)?)),
    })
}

fn podcast_executor(
    method: Method,
    ctx: &RunContext,
    config: &Config,
) -> Result<Box<dyn StageExecutor>> {
    Ok(match method {
        Method::Local | Method::Template => Box::new(stages::podcast::EspeakSynthesizer::new(config)),
        Method::Hosted => {
            Box::new(stages::podcast::HostedSpeechSynthesizer::new(hosted(ctx, config)?))
        }
    })
}

fn hosted(ctx: &RunContext, config: &Config) -> Result<stages::hosted::HostedClient> {
    if !ctx.hosted_api_enabled {
        anyhow::bail!(
            "hosted backend requested but the hosted API is not configured \
             (set {} and enable it in the config file)",
            config.hosted.api_key_env
        );
    }
    stages::hosted::HostedClient::new(config, ctx.limits.stage_timeout)
        .context("failed to build hosted API client")
}
