//! Enumerate-then-encode build pipeline

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use walkdir::{DirEntry, WalkDir};

use super::{BuildError, BuildEvent, BuildProgress, BuildReport, BuildRequest, BuildState, CancelToken};
use crate::disc::{EncoderOptions, ImageEncoder, IsoWriter};

/// Everything to register with the encoder, parents before children
#[derive(Debug, Default)]
struct Staged {
    dirs: Vec<String>,
    files: Vec<(String, PathBuf)>,
    skipped: Vec<PathBuf>,
}

/// Run a build on the current thread
///
/// Emits `StateChanged` and `Progress` events as it goes and a final
/// `StateChanged(Done)` or `StateChanged(Failed)`. The caller delivers the
/// returned result as the terminal notification.
pub fn run_build<E: ImageEncoder + ?Sized>(
    request: &BuildRequest,
    encoder: &mut E,
    cancel: &CancelToken,
    mut emit: impl FnMut(BuildEvent),
) -> Result<BuildReport, BuildError> {
    let result = stage(request, encoder, cancel, &mut emit);

    match &result {
        Ok(report) => {
            log::info!(
                "Created {} ({} directories, {} files, {} bytes)",
                report.output.display(),
                report.directories,
                report.files,
                report.image_bytes
            );
            emit(BuildEvent::StateChanged(BuildState::Done));
        }
        Err(BuildError::Cancelled) => {
            log::info!("Build of {} cancelled", request.output_path().display());
            emit(BuildEvent::StateChanged(BuildState::Failed));
        }
        Err(e) => {
            log::error!("Build of {} failed: {}", request.output_path().display(), e);
            emit(BuildEvent::StateChanged(BuildState::Failed));
        }
    }

    result
}

fn stage<E: ImageEncoder + ?Sized>(
    request: &BuildRequest,
    encoder: &mut E,
    cancel: &CancelToken,
    emit: &mut dyn FnMut(BuildEvent),
) -> Result<BuildReport, BuildError> {
    request.validate()?;
    let output = request.output_path();

    emit(BuildEvent::StateChanged(BuildState::Enumerating));
    // An earlier image in the source folder must not be staged into its successor
    let existing_output = fs::canonicalize(&output).ok();
    let staged = enumerate(
        &request.source,
        request.root_folder().as_deref(),
        existing_output.as_deref(),
        cancel,
    )?;
    log::info!(
        "Staging {} directories and {} files from {}",
        staged.dirs.len(),
        staged.files.len(),
        request.source.display()
    );

    for dir in &staged.dirs {
        cancel.check()?;
        encoder.add_directory(dir)?;
    }

    let total_files = staged.files.len();
    for (index, (iso_path, source)) in staged.files.iter().enumerate() {
        cancel.check()?;
        encoder.add_file(iso_path, source)?;

        let files_added = index + 1;
        emit(BuildEvent::Progress(BuildProgress {
            files_added,
            total_files,
            percent: files_added as f64 / total_files as f64 * 100.0,
        }));
    }

    cancel.check()?;
    emit(BuildEvent::StateChanged(BuildState::Encoding));
    encode(encoder, &output)?;

    let image_bytes = match fs::metadata(&output) {
        Ok(meta) if meta.len() > 0 => meta.len(),
        _ => {
            remove_partial(&output);
            return Err(BuildError::EmptyOutput(output));
        }
    };

    Ok(BuildReport {
        output,
        directories: staged.dirs.len(),
        files: total_files,
        image_bytes,
        skipped: staged.skipped,
    })
}

/// Walk the source in pre-order, collecting internal paths
///
/// Symlinks are followed. A link that loops back to one of its parents, or
/// whose target cannot be read, is left out and reported.
fn enumerate(
    source: &Path,
    root_folder: Option<&str>,
    output: Option<&Path>,
    cancel: &CancelToken,
) -> Result<Staged, BuildError> {
    let mut staged = Staged::default();
    if let Some(root) = root_folder {
        staged.dirs.push(root.to_string());
    }

    let walker = WalkDir::new(source)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_output(entry, output));

    for item in walker {
        cancel.check()?;
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => match skipped_link(&e) {
                Some((path, reason)) => {
                    log::warn!("Leaving out {}: {}", path.display(), reason);
                    staged.skipped.push(path);
                    continue;
                }
                None => return Err(e.into()),
            },
        };

        let iso_path = iso_path(source, entry.path(), root_folder);
        if entry.file_type().is_dir() {
            staged.dirs.push(iso_path);
        } else if entry.file_type().is_file() {
            staged.files.push((iso_path, entry.into_path()));
        } else {
            log::warn!("Leaving out {}: not a regular file", entry.path().display());
            staged.skipped.push(entry.into_path());
        }
    }

    Ok(staged)
}

/// Whether `entry` is the image this build is about to overwrite
fn is_output(entry: &DirEntry, output: Option<&Path>) -> bool {
    let Some(output) = output else {
        return false;
    };
    let matches = Some(entry.file_name()) == output.file_name()
        && fs::canonicalize(entry.path()).is_ok_and(|path| path == output);
    if matches {
        log::info!("Leaving out {}, the image being built", entry.path().display());
    }
    matches
}

/// Walk errors that only drop a link: loops and dangling targets
fn skipped_link(err: &walkdir::Error) -> Option<(PathBuf, String)> {
    let path = err.path()?.to_path_buf();
    if let Some(ancestor) = err.loop_ancestor() {
        return Some((path, format!("link loops back to {}", ancestor.display())));
    }

    let is_link = fs::symlink_metadata(&path).is_ok_and(|meta| meta.file_type().is_symlink());
    match fs::metadata(&path) {
        Err(target) if is_link => Some((path, format!("unreadable link target: {}", target))),
        _ => None,
    }
}

fn iso_path(source: &Path, path: &Path, root_folder: Option<&str>) -> String {
    let relative = path.strip_prefix(source).unwrap_or(path);
    root_folder
        .map(str::to_string)
        .into_iter()
        .chain(relative.components().map(|c| c.as_os_str().to_string_lossy().to_string()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Encode into `output`, removing the partial file if encoding fails
fn encode<E: ImageEncoder + ?Sized>(encoder: &mut E, output: &Path) -> Result<(), BuildError> {
    let mut writer = BufWriter::new(File::create(output)?);

    let result = encoder
        .build(&mut writer)
        .map_err(BuildError::from)
        .and_then(|()| writer.flush().map_err(BuildError::from));

    if result.is_err() {
        drop(writer);
        remove_partial(output);
    }
    result
}

fn remove_partial(output: &Path) {
    if let Err(e) = fs::remove_file(output) {
        log::warn!("Could not remove partial output {}: {}", output.display(), e);
    }
}

/// A build running on a background thread
pub struct BuildHandle {
    events: Receiver<BuildEvent>,
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl BuildHandle {
    /// Ordered event stream; `Finished` is the last item
    pub fn events(&self) -> &Receiver<BuildEvent> {
        &self.events
    }

    /// Request cancellation; takes effect at the next registration step
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the build ends, returning every event not yet received
    pub fn wait(self) -> Vec<BuildEvent> {
        let events: Vec<BuildEvent> = self.events.iter().collect();
        if self.thread.join().is_err() {
            log::error!("Build thread panicked");
        }
        events
    }
}

/// Start a build with the ISO 9660 writer on a background thread
pub fn spawn_build(request: BuildRequest) -> BuildHandle {
    spawn_build_with(request, IsoWriter::new)
}

/// Start a build on a background thread with a custom encoder
pub fn spawn_build_with<E, F>(request: BuildRequest, make_encoder: F) -> BuildHandle
where
    E: ImageEncoder,
    F: FnOnce(EncoderOptions) -> E + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let thread = thread::spawn(move || {
        let mut encoder = make_encoder(request.encoder_options());
        let result = run_build(&request, &mut encoder, &token, |event| {
            let _ = tx.send(event);
        });
        let _ = tx.send(BuildEvent::Finished(result));
    });

    BuildHandle {
        events: rx,
        cancel,
        thread,
    }
}
