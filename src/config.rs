use serde::{Serialize, Deserialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use crate::error::{MixtureError, Result};
use crate::model::DEFAULT_CATCH_UP_THRESHOLD;
use crate::switch::SwitchPolicy;

/// Settings of a mixture model, read from and written to JSON. Missing fields take
/// their default values:
///
/// ```json
/// { "nclassifiers" : 6, "policy" : { "kind" : "bayes" }, "save_cl_perf" : true, "catch_up_threshold" : -20.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixtureConfig {

    pub nclassifiers : usize,

    pub policy : SwitchPolicy,

    /// Keep per-classifier loss and accuracy in the switch.
    pub save_cl_perf : bool,

    /// Log-posterior below which update_switch resets a head.
    pub catch_up_threshold : f64

}

impl Default for MixtureConfig {

    fn default() -> Self {
        Self {
            nclassifiers : 6,
            policy : SwitchPolicy::default(),
            save_cl_perf : true,
            catch_up_threshold : DEFAULT_CATCH_UP_THRESHOLD
        }
    }

}

impl MixtureConfig {

    pub fn validate(&self) -> Result<()> {
        if self.nclassifiers == 0 {
            return Err(MixtureError::NoClassifiers);
        }
        if self.catch_up_threshold.is_nan() || self.catch_up_threshold > 0.0 {
            let msg = format!("catch-up threshold must be a log-probability, got {}", self.catch_up_threshold);
            return Err(MixtureError::InvalidConfig(msg));
        }
        self.policy.validate()
    }

    pub fn load_from_path<P>(path : P) -> Result<Self>
    where
        P : AsRef<Path>
    {
        let f = File::open(path)?;
        Self::load(f)
    }

    pub fn load<R>(mut reader : R) -> Result<Self>
    where
        R : Read
    {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        let config : Self = serde_json::from_str(&content[..])?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_path<P>(&self, path : P) -> Result<()>
    where
        P : AsRef<Path>
    {
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        self.save(file)
    }

    pub fn save<W>(&self, mut writer : W) -> Result<()>
    where
        W : Write
    {
        let content = serde_json::to_string_pretty(&self)?;
        writer.write_all(content.as_bytes())?;
        Ok(())
    }

}
