//! YAML program store
//!
//! The desired program list lives in one YAML file as a sequence of program
//! records in declaration order:
//!
//! ```yaml
//! - name: web
//!   command: /usr/bin/python3
//!   args: ["-m", "http.server", "8080"]
//!   auto_start: true
//!   max_retries: 3
//! ```

use crate::constants::daemon::PROGRAMS_FILE;
use crate::domain::ports::{check_unique_names, ProgramStore};
use crate::domain::{DomainError, ProgramSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct YamlProgramStore {
    path: PathBuf,
}

impl YamlProgramStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by `programs.yml` inside `config_dir`
    pub fn in_dir(config_dir: impl AsRef<Path>) -> Self {
        Self::new(config_dir.as_ref().join(PROGRAMS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, contents: &str) -> Result<Vec<ProgramSpec>, DomainError> {
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let programs: Vec<ProgramSpec> = serde_yaml::from_str(contents).map_err(|e| {
            DomainError::Persistence(format!(
                "Failed to parse '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        for program in &programs {
            program.validate()?;
        }
        check_unique_names(&programs)?;
        Ok(programs)
    }
}

#[async_trait]
impl ProgramStore for YamlProgramStore {
    async fn load(&self) -> Result<Vec<ProgramSpec>, DomainError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no program file yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(DomainError::Persistence(format!(
                    "Failed to read '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let programs = self.parse(&contents)?;
        debug!(path = %self.path.display(), programs = programs.len(), "loaded programs");
        Ok(programs)
    }

    async fn save(&self, programs: &[ProgramSpec]) -> Result<(), DomainError> {
        let io_err = |e: std::io::Error| {
            DomainError::Persistence(format!("Failed to write '{}': {}", self.path.display(), e))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let yaml = serde_yaml::to_string(programs)
            .map_err(|e| DomainError::Persistence(format!("Failed to serialize programs: {e}")))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, yaml).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        debug!(path = %self.path.display(), programs = programs.len(), "saved programs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlProgramStore::in_dir(dir.path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_keeps_order_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlProgramStore::in_dir(dir.path().join("nested"));
        let programs = vec![
            ProgramSpec::builder("web", "/usr/bin/python3")
                .args(["-m", "http.server", "8080"])
                .working_dir("/srv/www")
                .auto_start(true)
                .max_retries(5)
                .env("PORT", "8080")
                .stdout("/var/log/web.log")
                .start_secs(2.5)
                .build()
                .unwrap(),
            ProgramSpec::builder("db", "/usr/bin/redis-server")
                .environment_file("-/etc/default/redis")
                .stop_timeout_secs(30.0)
                .build()
                .unwrap(),
        ];

        store.save(&programs).await.unwrap();
        assert_eq!(store.load().await.unwrap(), programs);
        assert!(!dir.path().join("nested/programs.yml.tmp").exists());
    }

    #[tokio::test]
    async fn test_defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.yml");
        std::fs::write(&path, "- name: web\n  command: /bin/sleep\n").unwrap();

        let programs = YamlProgramStore::new(&path).load().await.unwrap();
        assert_eq!(programs.len(), 1);
        assert!(!programs[0].auto_start);
        assert_eq!(programs[0].max_retries, 3);
        assert_eq!(programs[0].start_secs, 1.0);
        assert_eq!(programs[0].stop_timeout_secs, 10.0);
    }

    #[tokio::test]
    async fn test_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.yml");
        std::fs::write(&path, "- name: [unclosed\n").unwrap();

        let err = YamlProgramStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, DomainError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.yml");
        std::fs::write(
            &path,
            "- name: web\n  command: /bin/true\n- name: web\n  command: /bin/false\n",
        )
        .unwrap();

        let err = YamlProgramStore::new(&path).load().await.unwrap_err();
        assert_eq!(err, DomainError::DuplicateProgram("web".to_string()));
    }
}
