//! Analyzer that asks a language model to describe the repository.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, AnalyzerConfig};
use crate::llm::{
    ChatMessage, CompletionProvider, CompletionRequest, TokenUsage, ToolCall, ToolDefinition,
};

/// Default report file, relative to the working-copy root.
pub const DEFAULT_OUTPUT_FILE: &str = "AI_ANALYSIS.md";
const DEFAULT_MAX_FILES: u64 = 500;
const DEFAULT_MAX_TURNS: u64 = 12;
const DEFAULT_MAX_FILE_BYTES: u64 = 32 * 1024;

const READ_FILE_TOOL: &str = "read_file";

const SYSTEM_PROMPT: &str = "You are a senior software engineer reviewing a repository you have never seen. \
Use the read_file tool to inspect the files that matter, then write a Markdown report with the sections: \
Overview, Architecture, Build and Run, Dependencies, Risks and Recommendations. \
Answer with the report only.";

/// Effective settings for one analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    output_file: PathBuf,
    max_files: usize,
    max_turns: usize,
    max_file_bytes: usize,
}

impl Settings {
    fn from_config(config: &AnalyzerConfig) -> Result<Self> {
        let output_file =
            PathBuf::from(config.get_str("output_file").unwrap_or(DEFAULT_OUTPUT_FILE));
        if !is_contained(&output_file) {
            anyhow::bail!(
                "output_file must be a relative path inside the repository: {}",
                output_file.display()
            );
        }
        let number = |key: &str, default: u64| -> Result<usize> {
            let value = match config.get(key) {
                None => default,
                Some(_) => config
                    .get_u64(key)
                    .with_context(|| format!("{key} must be a non-negative integer"))?,
            };
            usize::try_from(value.max(1)).with_context(|| format!("{key} is too large"))
        };
        Ok(Self {
            output_file,
            max_files: number("max_files", DEFAULT_MAX_FILES)?,
            max_turns: number("max_turns", DEFAULT_MAX_TURNS)?,
            max_file_bytes: number("max_file_bytes", DEFAULT_MAX_FILE_BYTES)?,
        })
    }
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

/// True when `path` is relative and never climbs above its base.
fn is_contained(path: &Path) -> bool {
    let mut depth = 0_usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}

/// Normal components of a contained relative path, with `.` and `..`
/// resolved lexically.
fn normalized(path: &Path) -> Vec<&std::ffi::OsStr> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => segments.push(name),
            Component::ParentDir => {
                segments.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    segments
}

/// Truncates `text` to at most `max_bytes` on a char boundary.
fn truncate(text: &str, max_bytes: usize) -> (&str, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}

/// Files tracked in the working copy's index, sorted, at most `limit`.
fn tracked_files(root: &Path, limit: usize) -> Result<(Vec<String>, usize)> {
    let repo = git2::Repository::open(root)
        .with_context(|| format!("Failed to open repository at {}", root.display()))?;
    let index = repo.index().context("Failed to read git index")?;
    let mut files: Vec<String> = index
        .iter()
        .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
        .collect();
    files.sort();
    let total = files.len();
    files.truncate(limit);
    Ok((files, total))
}

/// [`Analyzer`] that runs a tool-use conversation with a [`CompletionProvider`].
///
/// The model sees the list of tracked files and may read any of them through
/// the `read_file` tool. Its final answer is written to `output_file`.
pub struct LlmAnalyzer {
    provider: Box<dyn CompletionProvider>,
}

impl LlmAnalyzer {
    /// Creates the analyzer.
    pub fn new(provider: Box<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    fn tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: READ_FILE_TOOL.to_string(),
            description: "Read a file of the repository. Large files are truncated.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the repository root"
                    }
                },
                "required": ["path"]
            }),
        }]
    }

    async fn read_file(root: &Path, call: &ToolCall, max_bytes: usize) -> String {
        let args: ReadFileArgs = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => return format!("Error: {e:#}"),
        };
        let relative = Path::new(&args.path);
        if !is_contained(relative) {
            return format!("Error: '{}' is outside the repository", args.path);
        }
        let path = root.join(relative);
        // Symlinks may still point outside the working copy.
        match (tokio::fs::canonicalize(&path).await, tokio::fs::canonicalize(root).await) {
            (Ok(resolved), Ok(base)) if resolved.starts_with(&base) => {}
            (Ok(_), Ok(_)) => return format!("Error: '{}' is outside the repository", args.path),
            (Err(e), _) | (_, Err(e)) => return format!("Error: cannot read '{}': {e}", args.path),
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let (content, truncated) = truncate(&text, max_bytes);
                if truncated {
                    format!("{content}\n\n[truncated: file is {} bytes]", bytes.len())
                } else {
                    content.to_string()
                }
            }
            Err(e) => format!("Error: cannot read '{}': {e}", args.path),
        }
    }

    /// Writes the report without following symlinks committed to the
    /// repository: parent directories must be real directories under the
    /// root, and an existing link at the target is replaced by a file.
    async fn write_report(root: &Path, settings: &Settings, report: &str) -> Result<PathBuf> {
        let base = tokio::fs::canonicalize(root)
            .await
            .with_context(|| format!("Failed to resolve {}", root.display()))?;
        let mut segments = normalized(&settings.output_file);
        let file_name = segments
            .pop()
            .with_context(|| format!("Invalid output_file '{}'", settings.output_file.display()))?;

        let mut dir = base.clone();
        for segment in segments {
            dir.push(segment);
            match tokio::fs::symlink_metadata(&dir).await {
                Ok(meta) if meta.file_type().is_symlink() => {
                    anyhow::bail!("Refusing to write through symlink {}", dir.display());
                }
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => anyhow::bail!("{} is not a directory", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tokio::fs::create_dir(&dir)
                        .await
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to inspect {}", dir.display()));
                }
            }
        }
        let resolved = tokio::fs::canonicalize(&dir)
            .await
            .with_context(|| format!("Failed to resolve {}", dir.display()))?;
        if !resolved.starts_with(&base) {
            anyhow::bail!("{} is outside the repository", dir.display());
        }

        let target = resolved.join(file_name);
        if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
            if meta.file_type().is_symlink() {
                warn!(path = %target.display(), "Replacing symlinked report file");
                tokio::fs::remove_file(&target)
                    .await
                    .with_context(|| format!("Failed to remove {}", target.display()))?;
            }
        }

        let mut content = report.trim_end().to_string();
        content.push('\n');
        tokio::fs::write(&target, content)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok(target)
    }

    async fn run(&self, root: &Path, config: &AnalyzerConfig) -> Result<()> {
        let settings = Settings::from_config(config)?;
        let (files, total) = tracked_files(root, settings.max_files)?;
        debug!(files = files.len(), total, "Collected tracked files");

        let mut listing = format!("The repository contains {total} tracked files");
        if total > files.len() {
            listing.push_str(&format!(" (showing the first {})", files.len()));
        }
        listing.push_str(":\n");
        for file in &files {
            listing.push_str("- ");
            listing.push_str(file);
            listing.push('\n');
        }

        let mut request = CompletionRequest {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(listing)],
            tools: Self::tools(),
        };
        let mut usage = TokenUsage::default();

        for turn in 1..=settings.max_turns {
            // The last turn must produce the report.
            if turn == settings.max_turns {
                request.tools.clear();
                if turn > 1 {
                    request.messages.push(ChatMessage::user(
                        "No more files can be read. Write the report now.",
                    ));
                }
            }

            let completion = self
                .provider
                .complete(&request)
                .await
                .with_context(|| format!("Completion failed on turn {turn}"))?;
            usage += completion.usage;

            if completion.tool_calls.is_empty() {
                let report = completion
                    .text
                    .filter(|text| !text.trim().is_empty())
                    .context("Model returned an empty report")?;
                let target = Self::write_report(root, &settings, &report).await?;
                info!(
                    model = self.provider.model(),
                    turns = turn,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    output = %target.display(),
                    "Analysis written"
                );
                return Ok(());
            }

            request.messages.push(completion.to_message());
            for call in &completion.tool_calls {
                let result = if call.name == READ_FILE_TOOL {
                    debug!(arguments = %call.arguments, "Model reads file");
                    Self::read_file(root, call, settings.max_file_bytes).await
                } else {
                    warn!(tool = %call.name, "Model called an unknown tool");
                    format!("Error: unknown tool '{}'", call.name)
                };
                request.messages.push(ChatMessage::tool_result(&call.id, result));
            }
        }

        anyhow::bail!(
            "Model did not produce a report within {} turns",
            settings.max_turns
        )
    }
}

impl Analyzer for LlmAnalyzer {
    fn name(&self) -> &str {
        "llm"
    }

    fn analyze<'a>(
        &'a self,
        path: &'a Path,
        config: &'a AnalyzerConfig,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run(path, config))
    }
}
