use std::path::{Component, Path, PathBuf};

/// Project-relative, `/` separated form of `path`
///
/// Relative inputs are taken as already relative to `root`. Returns `None`
/// for absolute paths outside the root and for paths that climb out of it.
pub fn to_relative(root: &Path, path: &Path) -> Option<String> {
  let relative = if path.is_absolute() {
    path.strip_prefix(root).ok()?
  } else {
    path
  };

  let mut parts: Vec<String> = Vec::new();
  for component in relative.components() {
    match component {
      Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
      Component::CurDir => {}
      Component::ParentDir => {
        parts.pop()?;
      }
      Component::RootDir | Component::Prefix(_) => return None,
    }
  }

  if parts.is_empty() {
    return None;
  }
  Some(parts.join("/"))
}

/// Absolute path of a project-relative key
pub fn to_absolute(root: &Path, relative: &str) -> PathBuf {
  relative.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// True for paths owned by tooling rather than the project (`.git/`, the index directory)
pub fn is_internal(root: &Path, index_path: &Path, path: &Path) -> bool {
  let absolute = if path.is_absolute() {
    path.to_path_buf()
  } else {
    root.join(path)
  };

  if absolute.starts_with(index_path) {
    return true;
  }
  match absolute.strip_prefix(root) {
    Ok(rel) => rel.components().next() == Some(Component::Normal(".git".as_ref())),
    Err(_) => false,
  }
}
