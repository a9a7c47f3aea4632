use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use std::sync::{OnceLock, RwLock};

fn app_root_override_lock() -> &'static RwLock<Option<PathBuf>> {
    static OVERRIDE: OnceLock<RwLock<Option<PathBuf>>> = OnceLock::new();
    OVERRIDE.get_or_init(|| RwLock::new(None))
}

fn app_root_override() -> Option<PathBuf> {
    let lock = app_root_override_lock();
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[cfg(test)]
pub(crate) fn set_app_root_override_for_tests(path: Option<PathBuf>) {
    let lock = app_root_override_lock();
    match lock.write() {
        Ok(mut guard) => *guard = path,
        Err(poisoned) => {
            let mut guard = poisoned.into_inner();
            *guard = path;
        }
    }
}

fn platform_app_root() -> PathBuf {
    if let Some(project_dirs) = ProjectDirs::from("", "", "goallist") {
        return project_dirs.data_dir().to_path_buf();
    }

    if let Some(base_dirs) = BaseDirs::new() {
        return base_dirs.data_local_dir().join("goallist");
    }

    std::env::temp_dir().join("goallist")
}

pub fn app_root() -> PathBuf {
    app_root_override().unwrap_or_else(platform_app_root)
}

pub fn default_db_path() -> String {
    app_root()
        .join("data")
        .join("goallist.db")
        .to_string_lossy()
        .to_string()
}

pub fn default_template_path() -> PathBuf {
    app_root().join("static").join("profile_template.png")
}

pub fn default_font_path() -> PathBuf {
    app_root().join("fonts").join("profile.ttf")
}

pub fn default_output_dir() -> PathBuf {
    app_root().join("static").join("profiles")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_moves_every_default_path() {
        let temp = tempfile::tempdir().expect("temp dir");
        set_app_root_override_for_tests(Some(temp.path().to_path_buf()));

        assert!(default_db_path().starts_with(&*temp.path().to_string_lossy()));
        assert!(default_template_path().starts_with(temp.path()));
        assert!(default_font_path().starts_with(temp.path()));
        assert!(default_output_dir().starts_with(temp.path()));

        set_app_root_override_for_tests(None);
        assert!(!default_output_dir().starts_with(temp.path()));
    }
}
