//! Metrics JSON writer with provenance and deep merging.

use crate::errors::{PmpError, Result};
use chrono::Local;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const DEFAULT_JSON_VERSION: f64 = 3.0;

pub const DISCLAIMER: &str = "USER-NOTICE: The results in this file were produced with the PMP \
v1.1 (https://github.com/PCMDI/pcmdi_metrics). They are for research purposes only. They are \
subject to ongoing quality control and change as the PMP software advances, interpolation \
methods are modified, observational data sets are updated, problems with model data are \
corrected, etc. Use of these results for research (presentation, publications, etc.) should \
reference: Gleckler, P. J., C. Doutriaux, P. J. Durack, K. E. Taylor, Y. Zhang, and D. N. \
Williams, E. Mason, and J. Servonnat (2016), A more powerful reality test for climate models, \
Eos, 97, doi:10.1029/2016EO051663. If any problems are uncovered in using these results please \
contact the PMP development team at pcmdi-metrics@llnl.gov";

/// Recursively merge `update` into `target`; objects merge, everything
/// else replaces.
pub fn update_dict(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(t), Value::Object(u)) => {
            for (k, v) in u {
                match t.get_mut(k) {
                    Some(existing) if v.is_object() && existing.is_object() => {
                        update_dict(existing, v);
                    }
                    _ => {
                        t.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (t, u) => *t = u.clone(),
    }
}

/// Machine, user and invocation details recorded with every result file.
pub fn generate_provenance() -> Value {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let command_line: Vec<String> = std::env::args().collect();
    json!({
        "platform": {
            "OS": std::env::consts::OS,
            "Arch": std::env::consts::ARCH,
            "Name": host,
        },
        "userId": user,
        "commandLine": command_line.join(" "),
        "date": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        "packages": {
            "PMP": env!("CARGO_PKG_VERSION"),
            "PMPObs": "See 'References' key below, for detailed obs provenance information.",
        },
    })
}

/// Open or fresh write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Overwrite,
    /// Merge into an existing file when present
    Append,
}

#[derive(Debug, Clone)]
pub struct MetricsOutput {
    path: PathBuf,
    json_version: f64,
    json_structure: Option<Vec<String>>,
    mode: WriteMode,
    include_provenance: bool,
}

impl MetricsOutput {
    /// `name` gets a `.json` suffix unless it already has one.
    pub fn new(dir: &Path, name: &str) -> Self {
        let file = if name.ends_with(".json") {
            name.to_string()
        } else {
            format!("{name}.json")
        };
        Self {
            path: dir.join(file),
            json_version: DEFAULT_JSON_VERSION,
            json_structure: None,
            mode: WriteMode::Overwrite,
            include_provenance: true,
        }
    }

    pub fn with_structure<S: AsRef<str>>(mut self, structure: &[S]) -> Self {
        self.json_structure = Some(structure.iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    pub fn with_version(mut self, version: f64) -> Self {
        self.json_version = version;
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn without_provenance(mut self) -> Self {
        self.include_provenance = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` (a JSON object) to the output file.
    ///
    /// # Errors
    ///
    /// Version 3.0 and later require a `json_structure`, passed through
    /// [`with_structure`](Self::with_structure) or present in `data`.
    pub fn write(&self, data: &Value) -> Result<PathBuf> {
        let Value::Object(payload) = data else {
            return Err(PmpError::Generic("metrics output must be a JSON object".into()));
        };
        let mut payload = payload.clone();

        let json_version = payload
            .get("json_version")
            .and_then(Value::as_f64)
            .unwrap_or(self.json_version);
        let json_structure = match &self.json_structure {
            Some(s) => Some(json!(s)),
            None => payload.get("json_structure").cloned(),
        };
        if json_version >= 3.0 && json_structure.is_none() {
            return Err(PmpError::Generic(
                "json_version 3.0 of PMP requires json_structure to be passed to the write \
                 function or part of the dictionary dumped"
                    .into(),
            ));
        }
        payload.insert("json_version".into(), json!(json_version));
        payload.insert("json_structure".into(), json_structure.unwrap_or(Value::Null));

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).inspect_err(|e| {
                    error!("Could not create output directory: {}: {e}", dir.display());
                })?;
            }
        }

        let mut out = if self.mode == WriteMode::Append && self.path.exists() {
            serde_json::from_str(&fs::read_to_string(&self.path)?)?
        } else if self.include_provenance {
            json!({ "provenance": generate_provenance() })
        } else {
            json!({ "provenance": {} })
        };
        update_dict(&mut out, &Value::Object(payload));

        fs::write(&self.path, serde_json::to_string_pretty(&out)?)?;
        info!("Results saved to a json file: {}", self.path.display());
        Ok(self.path.clone())
    }
}

/// Header blocks of a mean-climate result file.
pub fn mean_climate_header(variable: &str, level: Option<f64>, references: Map<String, Value>) -> Value {
    let mut var = Map::new();
    var.insert("id".into(), json!(variable));
    if let Some(level) = level {
        // hPa to Pa
        var.insert("level".into(), json!(level * 100.0));
    }
    json!({
        "DISCLAIMER": DISCLAIMER,
        "Variable": var,
        "References": references,
        "RegionalMasking": {},
    })
}
