//! Per-job scratch workspaces and package isolation.
//!
//! Every job gets its own copy of the model package before anything is
//! mutated, so no two jobs ever share a mutable model file, whether they
//! run sequentially or concurrently.

use std::io;
use std::path::{Path, PathBuf};

/// Generate a unique filename by appending `_1`, `_2`, ... before the
/// extension until a non-existing path is found.
pub fn get_unique_filename(base_path: &Path, filename: &str) -> PathBuf {
    let candidate = base_path.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (filename.to_string(), String::new()),
    };
    let mut counter = 1;
    loop {
        let candidate = base_path.join(format!("{stem}_{counter}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Scratch directory for one job's intermediate files.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    /// Create (or reuse) `base_temp_dir/job_<id>`.
    pub fn create(base_temp_dir: &Path, job_id: usize) -> io::Result<Self> {
        let root = base_temp_dir.join(format!("job_{job_id}"));
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn remove(&self) {
        if self.root.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.root) {
                tracing::warn!(
                    workspace = %self.root.display(),
                    error = %e,
                    "failed to remove job workspace"
                );
            }
        }
    }

    /// Copy the model package into this workspace and return the path of
    /// the isolated package entry file.
    ///
    /// A lone `.mo` file that is not `package.mo` is copied as a single
    /// file; otherwise the whole package directory tree is copied and the
    /// entry file path is reconstructed inside the copy.
    pub fn isolate_package(&self, original_package_path: &Path) -> io::Result<PathBuf> {
        let is_package_file = original_package_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n == "package.mo")
            .unwrap_or(false);

        if original_package_path.is_file() && !is_package_file {
            let dest = self.root.join(
                original_package_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("package.mo")),
            );
            std::fs::copy(original_package_path, &dest)?;
            tracing::info!(
                source_path = %original_package_path.display(),
                destination_path = %dest.display(),
                "copied single-file package"
            );
            return Ok(dest);
        }

        let original_dir = if original_package_path.is_file() {
            original_package_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
        } else {
            original_package_path
        };
        let dir_name = original_dir
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("package"));
        let isolated_dir = self.root.join(dir_name);
        if isolated_dir.exists() {
            std::fs::remove_dir_all(&isolated_dir)?;
        }
        copy_dir_all(original_dir, &isolated_dir)?;
        tracing::info!(
            source_dir = %original_dir.display(),
            destination_dir = %isolated_dir.display(),
            "copied multi-file package"
        );

        let entry = if original_package_path.is_file() {
            isolated_dir.join(
                original_package_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("package.mo")),
            )
        } else {
            isolated_dir.join("package.mo")
        };
        Ok(entry)
    }

    /// Copy the directory containing an asset file into the workspace
    /// (once per directory) and return the relocated asset path.
    pub fn relocate_asset(&self, asset_path: &Path) -> io::Result<Option<PathBuf>> {
        let Some(asset_dir) = asset_path.parent() else {
            return Ok(None);
        };
        if !asset_dir.exists() {
            tracing::warn!(
                asset_dir = %asset_dir.display(),
                "asset directory not found, skipping copy"
            );
            return Ok(None);
        }
        let dir_name = asset_dir
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("assets"));
        let dest_dir = self.root.join(dir_name);
        if !dest_dir.exists() {
            copy_dir_all(asset_dir, &dest_dir)?;
            tracing::info!(
                source_dir = %asset_dir.display(),
                destination_dir = %dest_dir.display(),
                "copied asset directory"
            );
        }
        let file_name = asset_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new(""));
        Ok(Some(dest_dir.join(file_name)))
    }
}

/// Extensions of compiler litter that is never copied alongside a built
/// executable.
const IGNORED_ARTIFACT_EXTS: &[&str] = &["c", "h", "o", "cpp", "log", "makefile", "libs", "json"];

/// Copy a built model executable and its sibling artifacts (init XML,
/// binary tables) into `dest_dir`, skipping compiler litter. Returns the
/// destination executable path.
pub fn copy_build_artifacts(exe_source: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    let build_dir = exe_source.parent().unwrap_or_else(|| Path::new("."));
    let prefix = exe_source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let exe_name = exe_source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    std::fs::create_dir_all(dest_dir)?;
    let mut dest_exe = None;
    for entry in std::fs::read_dir(build_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&prefix) || name == "Makefile" {
            continue;
        }
        let ext = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if IGNORED_ARTIFACT_EXTS.contains(&ext.as_str()) {
            continue;
        }
        let dst = dest_dir.join(&name);
        std::fs::copy(entry.path(), &dst)?;
        if name == exe_name {
            dest_exe = Some(dst);
        }
    }
    dest_exe.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("failed to copy executable {}", exe_source.display()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_filename_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        let first = get_unique_filename(dir.path(), "data.csv");
        assert_eq!(first, dir.path().join("data.csv"));
        std::fs::write(&first, "x").unwrap();
        let second = get_unique_filename(dir.path(), "data.csv");
        assert_eq!(second, dir.path().join("data_1.csv"));
        std::fs::write(&second, "x").unwrap();
        assert_eq!(
            get_unique_filename(dir.path(), "data.csv"),
            dir.path().join("data_2.csv")
        );
    }

    #[test]
    fn test_isolate_single_file_package() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("Cycle.mo");
        std::fs::write(&package, "package Cycle\nend Cycle;").unwrap();

        let workspace = JobWorkspace::create(&dir.path().join("temp"), 1).unwrap();
        let isolated = workspace.isolate_package(&package).unwrap();
        assert!(isolated.exists());
        assert_eq!(isolated, workspace.path().join("Cycle.mo"));
    }

    #[test]
    fn test_isolate_multi_file_package() {
        let dir = tempfile::tempdir().unwrap();
        let package_dir = dir.path().join("Cycle");
        std::fs::create_dir_all(&package_dir).unwrap();
        std::fs::write(package_dir.join("package.mo"), "package Cycle\nend Cycle;").unwrap();
        std::fs::write(package_dir.join("Blanket.mo"), "model Blanket\nend Blanket;").unwrap();

        let workspace = JobWorkspace::create(&dir.path().join("temp"), 2).unwrap();
        let isolated = workspace
            .isolate_package(&package_dir.join("package.mo"))
            .unwrap();
        assert_eq!(isolated, workspace.path().join("Cycle").join("package.mo"));
        assert!(workspace.path().join("Cycle").join("Blanket.mo").exists());
    }

    #[test]
    fn test_copy_build_artifacts_skips_litter() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join("Cycle"), "exe").unwrap();
        std::fs::write(build.join("Cycle_init.xml"), "<xml/>").unwrap();
        std::fs::write(build.join("Cycle.c"), "litter").unwrap();

        let dest = dir.path().join("job_1");
        let exe = copy_build_artifacts(&build.join("Cycle"), &dest).unwrap();
        assert_eq!(exe, dest.join("Cycle"));
        assert!(dest.join("Cycle_init.xml").exists());
        assert!(!dest.join("Cycle.c").exists());
    }
}
