use std::io::{self, BufWriter, Read};
use std::path::Path;

use tar::{Builder, EntryType, Header};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{ArchiveError, Result};
use crate::builds::{METADATA_FILE, read_metadata};
use crate::types::BuildRef;

/// A packaged build, ready to be streamed.
#[derive(Debug)]
pub struct Archive {
    file: NamedTempFile,
    /// Number of entries, including the metadata record.
    pub entries: usize,
    /// Size of the archive in bytes.
    pub size: u64,
}

impl Archive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Packages a build on the blocking thread pool.
pub async fn package(build: BuildRef, cancel: CancellationToken) -> Result<Archive> {
    match tokio::task::spawn_blocking(move || package_blocking(&build, &cancel)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(ArchiveError::Task(e.to_string())),
    }
}

/// Packages a build into a temporary tar file.
///
/// Every regular file under the build's root directory is added in file-name
/// order, except the root-level metadata record, which is added last in its
/// transmitted form.
pub fn package_blocking(build: &BuildRef, cancel: &CancellationToken) -> Result<Archive> {
    let prefix = build
        .root_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| build.number().0.to_string());

    let mut file = NamedTempFile::new().map_err(ArchiveError::Write)?;
    let mut entries = 0;

    let outcome = {
        let mut builder = Builder::new(BufWriter::new(file.as_file_mut()));
        let written = append_build(&mut builder, build, &prefix, cancel, &mut entries);
        match written {
            Ok(()) => builder
                .into_inner()
                .and_then(|w| w.into_inner().map_err(io::IntoInnerError::into_error))
                .map(|_| ())
                .map_err(ArchiveError::Write),
            Err(e) => {
                // Closing the stream keeps the framing intact even when aborted.
                let _ = builder.finish();
                Err(e)
            }
        }
    };
    outcome?;

    let size = file
        .as_file()
        .metadata()
        .map_err(ArchiveError::Write)?
        .len();

    debug!(build = %build.key, entries, size, "Packaged build archive");
    Ok(Archive {
        file,
        entries,
        size,
    })
}

fn append_build<W: io::Write>(
    builder: &mut Builder<W>,
    build: &BuildRef,
    prefix: &str,
    cancel: &CancellationToken,
    entries: &mut usize,
) -> Result<()> {
    let root = &build.root_dir;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Aborted);
        }

        // Dangling links and link cycles are skipped, everything else fails the build.
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_bad_link(&e) => {
                warn!(build = %build.key, error = %e, "Skipping unresolvable link");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.depth() == 1 && is_metadata_file(entry.file_name()) {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = format!("{prefix}/{}", slash_path(relative));

        let metadata = entry.metadata().map_err(|e| ArchiveError::Read {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        let source = std::fs::File::open(path).map_err(|e| ArchiveError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut header = Header::new_gnu();
        header.set_metadata(&metadata);
        header.set_entry_type(EntryType::Regular);

        let reader = AbortableReader {
            inner: source,
            cancel,
        };
        builder
            .append_data(&mut header, &name, reader)
            .map_err(|e| {
                if cancel.is_cancelled() {
                    ArchiveError::Aborted
                } else {
                    ArchiveError::Read {
                        path: path.to_path_buf(),
                        source: e,
                    }
                }
            })?;
        *entries += 1;
    }

    if cancel.is_cancelled() {
        return Err(ArchiveError::Aborted);
    }

    let record = transmitted_metadata(build)?;
    let mut header = Header::new_gnu();
    header.set_size(record.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_entry_type(EntryType::Regular);
    builder
        .append_data(
            &mut header,
            format!("{prefix}/{METADATA_FILE}"),
            record.as_slice(),
        )
        .map_err(ArchiveError::Write)?;
    *entries += 1;

    Ok(())
}

/// Returns the metadata record as it is sent to remotes.
///
/// Local publishing status is dropped so the remote copy never shows a
/// transfer in progress. A composite build with no recorded result gets its
/// effective result written out, so the remote does not fall back to a default.
pub fn transmitted_metadata(build: &BuildRef) -> Result<Vec<u8>> {
    let mut metadata = read_metadata(&build.root_dir).map_err(|e| ArchiveError::Read {
        path: build.root_dir.join(METADATA_FILE),
        source: e,
    })?;

    metadata.publishing.clear();
    if build.project.kind.is_composite() && metadata.result.is_none() {
        metadata.result = Some(build.result);
    }

    serde_json::to_vec_pretty(&metadata).map_err(|e| ArchiveError::Write(e.into()))
}

fn is_bad_link(error: &walkdir::Error) -> bool {
    error.loop_ancestor().is_some()
        || error
            .io_error()
            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

fn is_metadata_file(name: &std::ffi::OsStr) -> bool {
    name == METADATA_FILE || name == "build.json.tmp"
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

struct AbortableReader<'a, R> {
    inner: R,
    cancel: &'a CancellationToken,
}

impl<R: Read> Read for AbortableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("archive aborted"));
        }
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builds::BuildStore;
    use crate::test_utils::BuildTree;
    use crate::types::{BuildKey, BuildResult, ProjectKind, StatusRecord, TargetName};

    fn entry_names(archive: &Archive) -> Vec<String> {
        let file = std::fs::File::open(archive.path()).unwrap();
        let mut reader = tar::Archive::new(file);
        reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn read_entry(archive: &Archive, name: &str) -> String {
        let file = std::fs::File::open(archive.path()).unwrap();
        let mut reader = tar::Archive::new(file);
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().to_string_lossy() == name {
                let mut s = String::new();
                entry.read_to_string(&mut s).unwrap();
                return s;
            }
        }
        panic!("entry {name} not found");
    }

    #[test]
    fn packages_every_file_once_with_metadata_last() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.build(
            "app",
            7,
            Some(BuildResult::Success),
            &[
                ("log", "build log"),
                ("archive/target/app.jar", "jar"),
                ("archive/docs/index.html", "<html>"),
            ],
        );
        let build = tree.store().resolve(&BuildKey::new("app", 7)).unwrap().unwrap();

        let archive = package_blocking(&build, &CancellationToken::new()).unwrap();
        let names = entry_names(&archive);

        assert_eq!(
            names,
            vec![
                "7/archive/docs/index.html",
                "7/archive/target/app.jar",
                "7/log",
                "7/build.json",
            ]
        );
        assert_eq!(archive.entries, 4);
        assert_eq!(read_entry(&archive, "7/log"), "build log");
    }

    #[test]
    fn nested_metadata_named_files_are_plain_entries() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.build(
            "app",
            1,
            Some(BuildResult::Success),
            &[("archive/build.json", "{}")],
        );
        let build = tree.store().resolve(&BuildKey::new("app", 1)).unwrap().unwrap();

        let names = entry_names(&package_blocking(&build, &CancellationToken::new()).unwrap());
        assert_eq!(names, vec!["1/archive/build.json", "1/build.json"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_archived_and_dangling_links_skipped() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.build("app", 2, Some(BuildResult::Success), &[("log", "build log")]);
        let build = tree.store().resolve(&BuildKey::new("app", 2)).unwrap().unwrap();

        let shared = tree.root().join("shared.txt");
        std::fs::write(&shared, "shared").unwrap();
        std::os::unix::fs::symlink(&shared, build.root_dir.join("linked.txt")).unwrap();
        std::os::unix::fs::symlink(build.root_dir.join("gone"), build.root_dir.join("dangling")).unwrap();
        std::os::unix::fs::symlink(&build.root_dir, build.root_dir.join("cycle")).unwrap();

        let archive = package_blocking(&build, &CancellationToken::new()).unwrap();
        assert_eq!(
            entry_names(&archive),
            vec!["2/linked.txt", "2/log", "2/build.json"]
        );
        assert_eq!(read_entry(&archive, "2/linked.txt"), "shared");
    }

    #[test]
    fn transmitted_metadata_drops_publishing_status() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.build("app", 2, Some(BuildResult::Success), &[]);
        let target = TargetName::parse("public").unwrap();
        tree.set_status("app", 2, StatusRecord::in_progress(target));

        let build = tree.store().resolve(&BuildKey::new("app", 2)).unwrap().unwrap();
        let record: serde_json::Value =
            serde_json::from_slice(&transmitted_metadata(&build).unwrap()).unwrap();

        assert!(record.get("publishing").is_none());
        assert_eq!(record["result"], "SUCCESS");
    }

    #[test]
    fn composite_result_is_written_out() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::MultiModule);
        tree.project("app/core", ProjectKind::Module);
        tree.build("app/core", 3, Some(BuildResult::Success), &[]);
        tree.composite_build("app", 3, None, &[("core", 3)]);

        let build = tree.store().resolve(&BuildKey::new("app", 3)).unwrap().unwrap();
        let record: serde_json::Value =
            serde_json::from_slice(&transmitted_metadata(&build).unwrap()).unwrap();

        assert_eq!(record["result"], "SUCCESS");
    }

    #[test]
    fn cancelled_packaging_is_aborted() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.build("app", 1, Some(BuildResult::Success), &[("log", "x")]);
        let build = tree.store().resolve(&BuildKey::new("app", 1)).unwrap().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = package_blocking(&build, &cancel).unwrap_err();
        assert!(matches!(err, ArchiveError::Aborted));
    }

    #[tokio::test]
    async fn async_package_runs_on_blocking_pool() {
        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.build("app", 5, Some(BuildResult::Unstable), &[("log", "x")]);
        let build = tree.store().resolve(&BuildKey::new("app", 5)).unwrap().unwrap();

        let archive = package(build, CancellationToken::new()).await.unwrap();
        assert_eq!(archive.entries, 2);
        assert!(archive.size > 0);
    }
}
