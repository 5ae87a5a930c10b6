//! Task builder: turn a source path into an ordered list of conversion tasks.
//!
//! Also hosts [`list_convertible`], which walks the same way but only groups
//! what it finds.

use crate::config::{normalize_filter, BatchConfig};
use crate::error::{DocBatchError, TaskError};
use crate::formats;
use crate::output::{ConversionOutcome, ConversionTask, ConvertibleListing};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Build one task per convertible file under `source`.
///
/// * single file: one task. If `destination` looks like a directory (no
///   extension, a trailing separator, or an existing directory) the output
///   is `<destination>/<stem><ext>`; otherwise `destination` is used as is.
/// * directory: every matching file (immediate children, or the whole tree
///   when `config.recursive`), mirrored under `destination` with the
///   extension replaced.
///
/// Tasks come back sorted by source path. No directories are created here.
pub fn build_tasks(
    source: &Path,
    destination: &Path,
    format_id: &str,
    config: &BatchConfig,
) -> Result<Vec<ConversionTask>, DocBatchError> {
    let source = absolute(source)?;
    let destination = absolute(destination)?;
    let ext = formats::extension_for(format_id);

    let task = |src: PathBuf, dst: PathBuf| ConversionTask {
        source: src,
        destination: dst,
        format: format_id.to_string(),
        overwrite: config.overwrite,
        ocr: config.ocr,
    };

    if source.is_file() {
        let src_ext = formats::extension_of(&source).unwrap_or_default();
        let allowed = formats::is_supported_input(&src_ext)
            || config.filter.as_deref().map(normalize_filter).as_deref()
                == Some(src_ext.as_str());
        if !allowed {
            return Err(DocBatchError::InvalidInput {
                path: source,
                reason: "Not a supported format".into(),
            });
        }

        let dst = if looks_like_dir(&destination) {
            destination.join(format!("{}{}", file_stem(&source), ext))
        } else {
            destination
        };
        return Ok(vec![task(source, dst)]);
    }

    if !source.is_dir() {
        return Err(not_found_or_invalid(source));
    }

    let mut tasks: Vec<ConversionTask> = walk(&source, config.recursive, config.filter.as_deref())
        .into_iter()
        .filter_map(|src| {
            let rel = src.strip_prefix(&source).ok()?.to_path_buf();
            let dst = destination.join(rel).with_extension(ext.trim_start_matches('.'));
            Some(task(src, dst))
        })
        .collect();

    tasks.sort_by(|a, b| a.source.as_os_str().cmp(b.source.as_os_str()));
    debug!("Built {} tasks from {}", tasks.len(), source.display());
    Ok(tasks)
}

/// Give each destination to exactly one task.
///
/// Sources with the same stem in one directory (`report.pdf` and
/// `report.docx`, or `a.md` and `a.markdown`) mirror to the same output
/// path. The first task in source order keeps it; every later claimant
/// becomes a failed outcome naming the winner. Expects `tasks` sorted.
pub fn claim_destinations(
    tasks: Vec<ConversionTask>,
) -> (Vec<ConversionTask>, Vec<ConversionOutcome>) {
    let mut owners: HashMap<PathBuf, PathBuf> = HashMap::with_capacity(tasks.len());
    let mut runnable = Vec::with_capacity(tasks.len());
    let mut conflicts = Vec::new();

    for task in tasks {
        match owners.get(&task.destination) {
            Some(owner) => {
                warn!(
                    "{} and {} both map to {}; keeping the first",
                    owner.display(),
                    task.source.display(),
                    task.destination.display()
                );
                let err = TaskError::DestinationConflict {
                    destination: task.destination.clone(),
                    other: owner.clone(),
                };
                conflicts.push(ConversionOutcome::failed(&task, &err));
            }
            None => {
                owners.insert(task.destination.clone(), task.source.clone());
                runnable.push(task);
            }
        }
    }
    (runnable, conflicts)
}

/// List convertible files under `path`, grouped by extension.
pub fn list_convertible(path: &Path, recursive: bool) -> Result<ConvertibleListing, DocBatchError> {
    let path = absolute(path)?;
    let mut by_format: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    if path.is_file() {
        let ext = formats::extension_of(&path).unwrap_or_default();
        if !formats::is_supported_input(&ext) {
            return Err(DocBatchError::InvalidInput {
                path,
                reason: "Not a supported format".into(),
            });
        }
        by_format.entry(ext).or_default().push(path);
    } else if path.is_dir() {
        for file in walk(&path, recursive, None) {
            let ext = formats::extension_of(&file).unwrap_or_default();
            by_format.entry(ext).or_default().push(file);
        }
    } else {
        return Err(not_found_or_invalid(path));
    }

    for files in by_format.values_mut() {
        files.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
    }
    let count = by_format.values().map(Vec::len).sum();

    Ok(ConvertibleListing {
        success: true,
        count,
        by_format,
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Regular files under `root` whose extension matches `filter`, or any
/// supported input extension when there is no filter.
fn walk(root: &Path, recursive: bool, filter: Option<&str>) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    // Configs assembled without the builder may carry ".PDF" and the like.
    let filter = filter.map(normalize_filter);
    let filter = filter.as_deref();

    WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            let Some(ext) = formats::extension_of(p) else {
                return false;
            };
            match filter {
                Some(f) => ext == f,
                None => formats::is_supported_input(&ext),
            }
        })
        .collect()
}

fn looks_like_dir(path: &Path) -> bool {
    let s = path.as_os_str().to_string_lossy();
    path.extension().is_none() || s.ends_with(MAIN_SEPARATOR) || s.ends_with('/') || path.is_dir()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn absolute(path: &Path) -> Result<PathBuf, DocBatchError> {
    std::path::absolute(path).map_err(|e| DocBatchError::InvalidInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn not_found_or_invalid(path: PathBuf) -> DocBatchError {
    if path.exists() {
        DocBatchError::InvalidInput {
            path,
            reason: "not a regular file or directory".into(),
        }
    } else {
        DocBatchError::NotFound { path }
    }
}
