//! A search-path module loader.
//!
//! Resolves a dotted module path to `<dir>/<path-with-slashes>.minz`,
//! trying each search directory in order; the first existing file wins.
//! Built-in module names never reach the loader.

use crate::environ::{LoadError, LoadedModule, ModuleLoader, Parser};
use minz_ast::NodeIds;
use std::path::PathBuf;

/// A [`ModuleLoader`] over an ordered list of search directories.
pub struct FileModuleLoader {
    search_paths: Vec<PathBuf>,
}

impl FileModuleLoader {
    /// Create a loader over the given directories, checked in order.
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let rel = format!("{}.minz", path.replace('.', "/"));
        self.search_paths
            .iter()
            .map(|dir| dir.join(&rel))
            .find(|cand| cand.is_file())
    }
}

impl ModuleLoader for FileModuleLoader {
    fn load(
        &mut self,
        path: &str,
        parser: &mut dyn Parser,
        ids: &mut NodeIds,
    ) -> Result<LoadedModule, LoadError> {
        let file = self
            .resolve(path)
            .ok_or_else(|| LoadError::NotFound(path.to_string()))?;
        log::debug!("loading module `{path}` from {}", file.display());
        // The handle is released before analysis continues; only the text
        // survives the call.
        let source = std::fs::read_to_string(&file).map_err(|source| LoadError::Io {
            path: path.to_string(),
            source,
        })?;
        let decls = parser
            .parse(&source, &file.to_string_lossy(), ids)
            .map_err(|source| LoadError::Parse {
                path: path.to_string(),
                source,
            })?;
        Ok(LoadedModule {
            decls,
            module_name: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environ::DummyParser;

    #[test]
    fn first_matching_search_path_wins() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(b.path().join("game")).unwrap();
        std::fs::write(
            b.path().join("game/sprites.minz"),
            "const COUNT: u8 = 8;\n",
        )
        .unwrap();

        let mut loader =
            FileModuleLoader::new(vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        let mut parser = DummyParser::new();
        let mut ids = NodeIds::new();
        let loaded = loader
            .load("game.sprites", &mut parser, &mut ids)
            .expect("module should resolve");
        assert_eq!(loaded.module_name, "game.sprites");
        assert_eq!(loaded.decls.len(), 1);

        assert!(matches!(
            loader.load("game.missing", &mut parser, &mut ids),
            Err(LoadError::NotFound(_))
        ));
    }
}
