//! # Musical Tuning Module
//!
//! This module provides the conversions between frequencies, note numbers and note names
//! used by the listening pipeline. Everything here is pure and deterministic.
//!
//! ## Features
//! - Equal temperament frequency calculations (A4 = note 69 = 440 Hz)
//! - Note number to name mapping with enharmonic spellings ("C#4/Db4")
//! - Nearest-note lookup with sharp/flat/natural classification
//! - Enharmonic-aware name matching

use std::fmt;

/// Reference frequency of A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// Note number of A4.
pub const A4_NUMBER: i32 = 69;

/// Default distance in Hz from the standard frequency within which a note is still natural.
pub const ACCIDENTAL_TOLERANCE: f32 = 5.0;

/// Separator between the two spellings of an enharmonic note name.
pub const SPELLING_SEPARATOR: char = '/';

/// Pitch-class labels, indexed by `note_number mod 12`, starting at C.
const PITCH_CLASSES: [&[&str]; 12] = [
    &["C"],
    &["C#", "Db"],
    &["D"],
    &["D#", "Eb"],
    &["E"],
    &["F"],
    &["F#", "Gb"],
    &["G"],
    &["G#", "Ab"],
    &["A"],
    &["A#", "Bb"],
    &["B"],
];

/// Direction in which a measured pitch deviates from its nearest standard note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accidental {
    Flat,
    Natural,
    Sharp,
}

impl fmt::Display for Accidental {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Accidental::Flat => "flat",
            Accidental::Natural => "natural",
            Accidental::Sharp => "sharp",
        };
        f.write_str(label)
    }
}

/// The note nearest to a measured frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestNote {
    /// Canonical name, possibly with two spellings (e.g. "A#4/Bb4").
    pub name: String,
    /// Note number of the nearest equal-tempered note.
    pub number: i32,
    /// The measured frequency, rounded to two decimals.
    pub frequency: f32,
    /// Equal-tempered frequency of `number`.
    pub standard_frequency: f32,
    /// Whether the measurement is sharp, flat or natural.
    pub accidental: Accidental,
}

/// Gets the note number from a frequency (e.g. 440 -> 69).
///
/// # Returns
/// * `Some(number)` - nearest note number
/// * `None` - the frequency is zero, negative or not finite
pub fn frequency_to_note_number(freq: f32) -> Option<i32> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let number = (12.0 * (freq / A4_FREQUENCY).log2() + A4_NUMBER as f32).round();
    Some(number as i32)
}

/// Gets the standard equal-tempered frequency of a note number.
pub fn note_number_to_frequency(number: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((number - A4_NUMBER) as f32 / 12.0)
}

/// Gets the canonical name of a note number, e.g. 61 -> "C#4/Db4".
///
/// The octave is `floor(number / 12) - 1`, so note 60 is C4 and note 0 is C-1.
pub fn note_number_to_name(number: i32) -> String {
    let spellings = PITCH_CLASSES[number.rem_euclid(12) as usize];
    let octave = number.div_euclid(12) - 1;
    spellings
        .iter()
        .map(|letter| format!("{letter}{octave}"))
        .collect::<Vec<_>>()
        .join("/")
}

/// Finds the note nearest to `freq` using the default tolerance.
pub fn nearest_note(freq: f32) -> Option<NearestNote> {
    nearest_note_with_tolerance(freq, ACCIDENTAL_TOLERANCE)
}

/// Finds the note nearest to `freq` and classifies the measurement.
///
/// The frequency is first rounded to two decimals. It is natural when it lies within
/// `tolerance` Hz of the standard frequency (inclusive), otherwise sharp or flat.
///
/// # Returns
/// * `None` - the frequency has no note (zero, negative or not finite)
pub fn nearest_note_with_tolerance(freq: f32, tolerance: f32) -> Option<NearestNote> {
    let frequency = round_to_hundredths(freq);
    let number = frequency_to_note_number(frequency)?;
    let standard_frequency = note_number_to_frequency(number);

    let accidental = if frequency > standard_frequency + tolerance {
        Accidental::Sharp
    } else if frequency < standard_frequency - tolerance {
        Accidental::Flat
    } else {
        Accidental::Natural
    };

    Some(NearestNote {
        name: note_number_to_name(number),
        number,
        frequency,
        standard_frequency,
        accidental,
    })
}

/// Splits a note name into its individual spellings ("C#4/Db4" -> ["C#4", "Db4"]).
pub fn spellings(name: &str) -> impl Iterator<Item = &str> {
    name.split(SPELLING_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Whether two note names denote the same note.
///
/// Both names are split into spellings; they match when any spelling of one equals any
/// spelling of the other. "Db4" matches "C#4/Db4", and "C#4/Db4" matches itself.
pub fn names_match(heard: &str, target: &str) -> bool {
    spellings(heard).any(|h| spellings(target).any(|t| t == h))
}

/// Rounds a frequency to two decimal places.
pub(crate) fn round_to_hundredths(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
