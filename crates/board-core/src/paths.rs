use std::path::{Component, Path, PathBuf};

/// Expands a leading `~` and makes the path absolute against the current directory.
/// Blank input resolves to an empty string.
pub fn resolve_project_path(value: &str) -> String {
    let home = home_dir();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    resolve_against(value, home.as_deref(), &cwd)
}

fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

fn resolve_against(value: &str, home: Option<&Path>, cwd: &Path) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let expanded = match home {
        Some(home) if trimmed == "~" => home.to_path_buf(),
        Some(home) if trimmed.starts_with("~/") || trimmed.starts_with("~\\") => {
            home.join(&trimmed[2..])
        }
        _ => PathBuf::from(trimmed),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };
    normalize(&absolute).to_string_lossy().to_string()
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
