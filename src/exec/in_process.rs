// src/exec/in_process.rs

//! Work done inside the manager process rather than by an external tool:
//! input splitting, XML include merging and working-directory preparation.
//!
//! Everything here is blocking `std::fs` code; the job runner calls it via
//! `tokio::task::spawn_blocking`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use tracing::debug;

use crate::dag::dispatch::{PrepareStep, SplitSpec};

/// Include directives nested deeper than this are treated as a loop.
const MAX_INCLUDE_DEPTH: usize = 32;

/// Chunk file names for splitting `input` into `num` parts.
///
/// Names depend only on the input name, the count and the offset, so a
/// re-run produces the same paths: `<stem>-<offset + i + 1>.<ext>`.
pub fn split_output_paths(work_dir: &Path, input: &Path, num: usize, offset: usize) -> Vec<PathBuf> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "split".to_string());
    let ext = input.extension().map(|e| e.to_string_lossy().into_owned());

    (0..num)
        .map(|i| {
            let n = offset + i + 1;
            let name = match &ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            };
            work_dir.join(name)
        })
        .collect()
}

/// Split `content` into `num` contiguous chunks of whole lines.
///
/// Earlier chunks take one extra line when the count does not divide
/// evenly; with fewer lines than chunks the trailing chunks are empty.
pub fn split_records(content: &str, num: usize) -> Vec<String> {
    let num = num.max(1);
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let base = lines.len() / num;
    let extra = lines.len() % num;

    let mut chunks = Vec::with_capacity(num);
    let mut start = 0;
    for i in 0..num {
        let len = base + usize::from(i < extra);
        chunks.push(lines[start..start + len].concat());
        start += len;
    }
    chunks
}

/// Write the chunks of `spec.input` to `spec.outputs`.
pub fn split_file(spec: &SplitSpec) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(&spec.input)
        .with_context(|| format!("reading split input {:?}", spec.input))?;
    let chunks = split_records(&content, spec.outputs.len());

    for (path, chunk) in spec.outputs.iter().zip(chunks) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        fs::write(path, chunk).with_context(|| format!("writing chunk {:?}", path))?;
    }

    debug!(input = ?spec.input, parts = spec.outputs.len(), "split input");
    Ok(spec.outputs.clone())
}

fn include_pattern() -> Result<Regex> {
    Ok(Regex::new(r#"<include\s+href\s*=\s*"([^"]+)"\s*/>"#)?)
}

/// Expand every `<include href="..."/>` of `source`, recursively.
///
/// An href is resolved next to the including file first, then in
/// `include_dir`.
pub fn merge_xml(source: &Path, include_dir: Option<&Path>) -> Result<String> {
    let pattern = include_pattern()?;
    let mut stack = Vec::new();
    merge_into(source, include_dir, &pattern, &mut stack)
}

fn merge_into(
    file: &Path,
    include_dir: Option<&Path>,
    pattern: &Regex,
    stack: &mut Vec<PathBuf>,
) -> Result<String> {
    if stack.len() >= MAX_INCLUDE_DEPTH || stack.iter().any(|p| p == file) {
        bail!("include loop through {:?}", file);
    }
    let text = fs::read_to_string(file).with_context(|| format!("reading xml {:?}", file))?;
    stack.push(file.to_path_buf());

    let mut merged = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(&text) {
        let (Some(whole), Some(href)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let target = resolve_include(file, include_dir, href.as_str())?;
        merged.push_str(&text[last..whole.start()]);
        merged.push_str(&merge_into(&target, include_dir, pattern, stack)?);
        last = whole.end();
    }
    merged.push_str(&text[last..]);

    stack.pop();
    Ok(merged)
}

fn resolve_include(file: &Path, include_dir: Option<&Path>, href: &str) -> Result<PathBuf> {
    let beside = file.parent().unwrap_or(Path::new(".")).join(href);
    if beside.is_file() {
        return Ok(beside);
    }
    if let Some(dir) = include_dir {
        let candidate = dir.join(href);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(anyhow!("included file '{}' not found (from {:?})", href, file))
}

/// Run prepare steps in `work_dir`, returning the paths they created.
pub fn prepare_work_dir(work_dir: &Path, steps: &[PrepareStep]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(work_dir).with_context(|| format!("creating work dir {:?}", work_dir))?;

    let mut created = Vec::new();
    for step in steps {
        match step {
            PrepareStep::Copy { from, to } => {
                let dest = work_dir.join(to);
                if dest == *from {
                    continue;
                }
                copy_recursively(from, &dest)?;
                created.push(dest);
            }
            PrepareStep::MergeXml {
                source,
                include_dir,
                to,
            } => {
                let dest = work_dir.join(to);
                let merged = merge_xml(source, include_dir.as_deref())?;
                fs::write(&dest, merged).with_context(|| format!("writing merged xml {:?}", dest))?;
                created.push(dest);
            }
        }
    }
    Ok(created)
}

fn copy_recursively(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
    }
    if from.is_dir() {
        fs::create_dir_all(to).with_context(|| format!("creating dir {:?}", to))?;
        for entry in fs::read_dir(from).with_context(|| format!("reading dir {:?}", from))? {
            let entry = entry?;
            copy_recursively(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        fs::copy(from, to).with_context(|| format!("copying {:?} to {:?}", from, to))?;
    }
    Ok(())
}

/// Remove files and directories created by [`prepare_work_dir`].
pub fn remove_materialized(paths: &[PathBuf]) -> Vec<(PathBuf, std::io::Error)> {
    let mut failures = Vec::new();
    for path in paths {
        let res = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(e) = res {
            failures.push((path.clone(), e));
        }
    }
    failures
}
