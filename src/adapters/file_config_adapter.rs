//! INI file configuration adapter.

use crate::domain::error::PapertrailError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

fn unparseable(section: &str, key: &str, reason: String) -> PapertrailError {
    PapertrailError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    }
}

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PapertrailError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| PapertrailError::ConfigParse {
                file: path.display().to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, PapertrailError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| PapertrailError::ConfigParse {
                file: "<inline>".into(),
                reason,
            })?;
        Ok(Self { config })
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> Result<i64, PapertrailError> {
        self.config
            .getint(section, key)
            .map(|v| v.unwrap_or(default))
            .map_err(|reason| unparseable(section, key, reason))
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> Result<f64, PapertrailError> {
        self.config
            .getfloat(section, key)
            .map(|v| v.unwrap_or(default))
            .map_err(|reason| unparseable(section, key, reason))
    }
}
