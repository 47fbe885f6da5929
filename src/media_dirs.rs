use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Configured media directories keyed by alias. Paths are canonical so
/// watcher events can be mapped back to their alias by equality.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Directories {
    by_alias: BTreeMap<String, PathBuf>,
}

impl Directories {
    pub fn new(by_alias: BTreeMap<String, PathBuf>) -> Self {
        let by_alias = by_alias
            .into_iter()
            .map(|(alias, path)| {
                let canonical = path.canonicalize().unwrap_or(path);
                (alias, canonical)
            })
            .collect();
        Self { by_alias }
    }

    pub fn get(&self, alias: &str) -> Option<&Path> {
        self.by_alias.get(alias).map(PathBuf::as_path)
    }

    /// Alias whose directory is exactly `dir`.
    pub fn alias_for(&self, dir: &Path) -> Option<&str> {
        let canonical = dir.canonicalize().ok();
        let dir = canonical.as_deref().unwrap_or(dir);
        self.by_alias
            .iter()
            .find(|(_, path)| path.as_path() == dir)
            .map(|(alias, _)| alias.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.by_alias
            .iter()
            .map(|(alias, path)| (alias.as_str(), path.as_path()))
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_lookup_both_ways() {
        let tmp = tempfile::tempdir().unwrap();
        let phone = tmp.path().join("phone");
        let laptop = tmp.path().join("laptop");
        std::fs::create_dir_all(&phone).unwrap();
        std::fs::create_dir_all(&laptop).unwrap();

        let dirs = Directories::new(BTreeMap::from([
            ("phone".to_string(), phone.clone()),
            ("laptop".to_string(), laptop.clone()),
        ]));

        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs.alias_for(&phone), Some("phone"));
        assert_eq!(dirs.alias_for(&laptop.join(".").join("..").join("laptop")), Some("laptop"));
        assert_eq!(dirs.alias_for(tmp.path()), None);
        assert_eq!(dirs.get("phone"), Some(phone.canonicalize().unwrap().as_path()));

        let aliases: Vec<&str> = dirs.iter().map(|(alias, _)| alias).collect();
        assert_eq!(aliases, vec!["laptop", "phone"]);
    }
}
