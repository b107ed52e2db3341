//! Confinement of planner-supplied paths to the project directory.

use std::path::{Component, Path, PathBuf};

use crate::core::error::GateError;

/// Normalize a step target into a project-relative path.
///
/// `./` segments are dropped. Absolute paths, drive prefixes and any `..`
/// segment are rejected so a step can never touch files outside the project.
pub fn confine(target: &str) -> Result<PathBuf, GateError> {
    let mut out = PathBuf::new();
    for component in Path::new(target).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(GateError::PathOutsideProject {
                    path: PathBuf::from(target),
                });
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(GateError::PathOutsideProject {
            path: PathBuf::from(target),
        });
    }
    Ok(out)
}
