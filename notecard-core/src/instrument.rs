//! # Instrument Module
//!
//! Loads an instrument's playable range from its JSON configuration and turns it into the
//! notes a session asks for.
//!
//! ## Features
//! - `<assets>/configs/<instrument>/config.json` loading with typed errors
//! - Dual spellings ("C#4/Db4") expanded into one note per spelling
//! - Staff and fingering image paths resolved per spelling

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tuning;

/// Directory holding one `<instrument>/config.json` per instrument.
pub const CONFIGS_DIR: &str = "configs";
/// Directory holding staff transcriptions, one `<spelling>.png` per note spelling.
pub const NOTE_IMAGES_DIR: &str = "images/notes";
/// Directory holding fingering charts, one `<instrument>/<spelling>.png` per note spelling.
pub const FINGERING_IMAGES_DIR: &str = "images/instruments";

const CONFIG_FILE: &str = "config.json";

/// Errors raised while loading an instrument.
#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("instrument {0} has no playable notes")]
    EmptyRange(String),
}

/// The on-disk configuration of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Display name; the instrument path is used when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Playable notes, lowest first. Dual spellings are written "C#4/Db4".
    pub range: Vec<String>,
}

/// A note to play, together with the images a frontend may show for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Full note name as listed in the instrument range, e.g. "C#4/Db4".
    pub name: String,
    /// Staff transcription image.
    pub transcription: PathBuf,
    /// Fingering chart image.
    pub fingering: PathBuf,
}

impl Note {
    /// A note with no images attached.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transcription: PathBuf::new(),
            fingering: PathBuf::new(),
        }
    }
}

/// A loaded instrument and the asset directories its notes point into.
#[derive(Debug, Clone)]
pub struct Instrument {
    id: PathBuf,
    config: InstrumentConfig,
    notes_dir: PathBuf,
    fingering_dir: PathBuf,
}

impl Instrument {
    /// Loads `<assets>/configs/<instrument>/config.json`.
    ///
    /// `instrument` is a relative path such as `concertina/30button/jeffries_cg`; it also
    /// names the instrument's fingering image directory.
    pub fn load(assets: &Path, instrument: &Path) -> Result<Self, InstrumentError> {
        let path = assets.join(CONFIGS_DIR).join(instrument).join(CONFIG_FILE);
        let text = fs::read_to_string(&path).map_err(|source| InstrumentError::Io {
            path: path.clone(),
            source,
        })?;
        let config: InstrumentConfig =
            serde_json::from_str(&text).map_err(|source| InstrumentError::Parse { path, source })?;
        Self::from_config(assets, instrument, config)
    }

    /// Builds an instrument from an already parsed configuration.
    pub fn from_config(
        assets: &Path,
        instrument: &Path,
        config: InstrumentConfig,
    ) -> Result<Self, InstrumentError> {
        if config.range.iter().all(|entry| entry.trim().is_empty()) {
            return Err(InstrumentError::EmptyRange(instrument.display().to_string()));
        }
        Ok(Self {
            id: instrument.to_path_buf(),
            config,
            notes_dir: assets.join(NOTE_IMAGES_DIR),
            fingering_dir: assets.join(FINGERING_IMAGES_DIR).join(instrument),
        })
    }

    pub fn name(&self) -> String {
        match &self.config.name {
            Some(name) => name.clone(),
            None => self.id.display().to_string(),
        }
    }

    pub fn range(&self) -> &[String] {
        &self.config.range
    }

    /// Every playable note, once per spelling.
    ///
    /// "C#4/Db4" yields two notes, both named "C#4/Db4", whose images are `c#4.png` and
    /// `db4.png` respectively.
    pub fn notes(&self) -> Vec<Note> {
        let mut notes = Vec::new();
        for entry in &self.config.range {
            let lowered = entry.to_lowercase();
            for spelling in tuning::spellings(&lowered) {
                let filename = format!("{spelling}.png");
                notes.push(Note {
                    name: entry.trim().to_string(),
                    transcription: self.notes_dir.join(&filename),
                    fingering: self.fingering_dir.join(&filename),
                });
            }
        }
        notes
    }
}
