//! Project context management on the build thread.
//!
//! [`ProjectContextManager`] is the state owned by the build thread: the
//! engine's project table plus the unsaved-content overrides registered by
//! the IDE. It is only ever reached through the executor, so none of its
//! methods need locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::engine::{EngineProject, ProjectEngine, CONFIGURATION_PROPERTY, PLATFORM_PROPERTY};
use super::error::{BridgeError, BridgeResult, EngineError};
use super::types::ProjectConfigurationInfo;

/// Maps project paths to live, configured engine projects.
pub struct ProjectContextManager<E> {
    engine: E,
    overrides: HashMap<PathBuf, String>,
}

impl<E: ProjectEngine> ProjectContextManager<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            overrides: HashMap::new(),
        }
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Returns the project for `path`, loading it if needed.
    ///
    /// An already loaded project is reused as is. Otherwise the registered
    /// override text is loaded under `path` when there is one, and the file
    /// on disk when there is not.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be loaded.
    pub fn resolve(&mut self, path: &Path) -> Result<&mut E::Project, EngineError> {
        if self.engine.loaded_project(path).is_some() {
            debug!(path = %path.display(), "Reusing loaded project");
            return self
                .engine
                .loaded_project(path)
                .ok_or_else(|| EngineError::NotLoaded { path: path.to_path_buf() });
        }

        match self.overrides.get(path) {
            Some(content) => {
                debug!(path = %path.display(), bytes = content.len(), "Loading project from unsaved content");
                self.engine.load_project_content(path, content)
            }
            None => {
                debug!(path = %path.display(), "Loading project from disk");
                self.engine.load_project(path)
            }
        }
    }

    /// Applies a configuration/platform pair to `project`.
    ///
    /// Both properties are overwritten on every call. An empty `platform`
    /// is applied as an empty value so a previous platform never lingers.
    pub fn configure(project: &mut E::Project, configuration: &str, platform: &str) {
        project.set_property(CONFIGURATION_PROPERTY, configuration);
        project.set_property(PLATFORM_PROPERTY, platform);
    }

    /// Evicts the loaded project for `path` so the next resolve re-parses it.
    pub fn unload(&mut self, path: &Path) {
        debug!(path = %path.display(), "Unloading project");
        self.engine.unload_project(path);
    }

    /// Registers (`Some`) or clears (`None`) the unsaved content for `path`.
    ///
    /// This does not unload an already loaded project; call [`Self::unload`]
    /// first for the override to take effect.
    pub fn set_override_content(&mut self, path: &Path, content: Option<String>) {
        match content {
            Some(content) => {
                self.overrides.insert(path.to_path_buf(), content);
            }
            None => {
                self.overrides.remove(path);
            }
        }
    }

    /// Returns the unsaved content registered for `path`.
    #[must_use]
    pub fn override_content(&self, path: &Path) -> Option<&str> {
        self.overrides.get(path).map(String::as_str)
    }

    /// Resolves and configures every entry of a build request and returns
    /// the project for `owned_file`.
    ///
    /// Entries are processed in order; when several name `owned_file`, the
    /// last one decides its configuration. Afterwards the process working
    /// directory is switched to the directory of `owned_file` and left
    /// there.
    ///
    /// # Errors
    ///
    /// Returns an error if a project fails to load, if no entry names
    /// `owned_file`, or if the working directory cannot be changed.
    pub fn setup(
        &mut self,
        owned_file: &Path,
        configurations: &[ProjectConfigurationInfo],
    ) -> BridgeResult<&mut E::Project> {
        let mut primary = None;

        for (index, info) in configurations.iter().enumerate() {
            let project = self.resolve(&info.project_file)?;
            Self::configure(project, &info.configuration, &info.platform);
            debug!(
                path = %info.project_file.display(),
                configuration = %info.configuration,
                platform = %info.platform,
                "Configured project"
            );
            if info.project_file == owned_file {
                primary = Some(index);
            }
        }

        let Some(index) = primary else {
            return Err(BridgeError::PrimaryProjectMissing {
                path: owned_file.to_path_buf(),
            });
        };
        debug!(entry = index, path = %owned_file.display(), "Selected primary project");

        if let Some(dir) = owned_file.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::env::set_current_dir(dir).map_err(|source| BridgeError::WorkingDirectory {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        Ok(self.resolve(owned_file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::fakes::MemoryEngine;

    const PROJECT: &str = "<Project>\nwarning W001: from content\n</Project>";

    fn manager_with(dir: &Path, files: &[(&str, &str)]) -> ProjectContextManager<MemoryEngine> {
        let engine = MemoryEngine::new();
        for (name, content) in files {
            engine.add_file(dir.join(name), *content);
        }
        ProjectContextManager::new(engine)
    }

    #[test]
    fn resolve_reuses_loaded_project() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.csproj");
        let mut manager = manager_with(dir.path(), &[("App.csproj", PROJECT)]);

        manager.resolve(&path).unwrap();
        manager.resolve(&path).unwrap();

        assert_eq!(manager.engine().load_count(&path), 1);
    }

    #[test]
    fn override_content_takes_precedence_over_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.csproj");
        let mut manager = manager_with(dir.path(), &[("App.csproj", PROJECT)]);

        manager.set_override_content(&path, Some("<Project>\nunsaved\n</Project>".to_string()));
        let project = manager.resolve(&path).unwrap();

        assert_eq!(project.path(), path);
        assert!(project.content().contains("unsaved"));
        assert!(project.loaded_from_content());
    }

    #[test]
    fn override_needs_unload_to_become_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.csproj");
        let mut manager = manager_with(dir.path(), &[("App.csproj", PROJECT)]);

        manager.resolve(&path).unwrap();
        manager.set_override_content(&path, Some("<Project>\nunsaved\n</Project>".to_string()));
        assert!(!manager.resolve(&path).unwrap().content().contains("unsaved"));

        manager.unload(&path);
        assert!(manager.resolve(&path).unwrap().content().contains("unsaved"));
    }

    #[test]
    fn configure_resets_platform() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.csproj");
        let mut manager = manager_with(dir.path(), &[("App.csproj", PROJECT)]);

        let project = manager.resolve(&path).unwrap();
        ProjectContextManager::<MemoryEngine>::configure(project, "Debug", "x86");
        assert_eq!(project.property(PLATFORM_PROPERTY), Some("x86"));

        ProjectContextManager::<MemoryEngine>::configure(project, "Release", "");
        assert_eq!(project.property(CONFIGURATION_PROPERTY), Some("Release"));
        assert_eq!(project.property(PLATFORM_PROPERTY), Some(""));
    }

    #[test]
    fn setup_selects_last_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("Lib.csproj");
        let app_dir = dir.path().join("app");
        std::fs::create_dir(&app_dir).unwrap();
        let app = app_dir.join("App.csproj");

        let engine = MemoryEngine::new();
        engine.add_file(&lib, PROJECT);
        engine.add_file(&app, PROJECT);
        let mut manager = ProjectContextManager::new(engine);

        let configurations = [
            ProjectConfigurationInfo::new(&app, "Debug", "x86"),
            ProjectConfigurationInfo::new(&lib, "Debug", ""),
            ProjectConfigurationInfo::new(&app, "Release", "x64"),
        ];

        let primary = manager.setup(&app, &configurations).unwrap();
        assert_eq!(primary.path(), app);
        assert_eq!(primary.property(CONFIGURATION_PROPERTY), Some("Release"));
        assert_eq!(primary.property(PLATFORM_PROPERTY), Some("x64"));
    }

    #[test]
    fn setup_without_owned_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("Lib.csproj");
        let app = dir.path().join("App.csproj");
        let mut manager = manager_with(dir.path(), &[("Lib.csproj", PROJECT)]);

        let result = manager.setup(&app, &[ProjectConfigurationInfo::new(&lib, "Debug", "")]);
        assert!(matches!(result, Err(BridgeError::PrimaryProjectMissing { .. })));
    }
}
