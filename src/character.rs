//! Characters and the voices they speak with.
//!
//! Every character maps to one of the prebuilt voices of the live speech
//! model. The mapping is fixed by character id; unknown ids fall back to
//! [`GeminiVoice::Orus`].

use crate::defaults;
use crate::error::{Result, VoiceCallError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Prebuilt voices offered by the live speech model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeminiVoice {
    Orus,
    Enceladus,
    Achird,
    Iapetus,
    Umbriel,
    Schedar,
    Algieba,
    Laomedeia,
    Vindemiatrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePitch {
    Lower,
    LowerMiddle,
    Middle,
    Higher,
}

impl fmt::Display for VoicePitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoicePitch::Lower => "lower",
            VoicePitch::LowerMiddle => "lower middle",
            VoicePitch::Middle => "middle",
            VoicePitch::Higher => "higher",
        };
        f.write_str(s)
    }
}

impl GeminiVoice {
    pub const ALL: [GeminiVoice; 9] = [
        GeminiVoice::Orus,
        GeminiVoice::Enceladus,
        GeminiVoice::Achird,
        GeminiVoice::Iapetus,
        GeminiVoice::Umbriel,
        GeminiVoice::Schedar,
        GeminiVoice::Algieba,
        GeminiVoice::Laomedeia,
        GeminiVoice::Vindemiatrix,
    ];

    /// Name as the wire protocol expects it.
    pub fn name(self) -> &'static str {
        match self {
            GeminiVoice::Orus => "Orus",
            GeminiVoice::Enceladus => "Enceladus",
            GeminiVoice::Achird => "Achird",
            GeminiVoice::Iapetus => "Iapetus",
            GeminiVoice::Umbriel => "Umbriel",
            GeminiVoice::Schedar => "Schedar",
            GeminiVoice::Algieba => "Algieba",
            GeminiVoice::Laomedeia => "Laomedeia",
            GeminiVoice::Vindemiatrix => "Vindemiatrix",
        }
    }

    pub fn style(self) -> &'static str {
        match self {
            GeminiVoice::Orus => "Firm",
            GeminiVoice::Enceladus => "Breathy",
            GeminiVoice::Achird => "Friendly",
            GeminiVoice::Iapetus => "Clear",
            GeminiVoice::Umbriel => "Easy-going",
            GeminiVoice::Schedar => "Even",
            GeminiVoice::Algieba => "Smooth",
            GeminiVoice::Laomedeia => "Upbeat",
            GeminiVoice::Vindemiatrix => "Gentle",
        }
    }

    pub fn pitch(self) -> VoicePitch {
        match self {
            GeminiVoice::Enceladus | GeminiVoice::Algieba => VoicePitch::Lower,
            GeminiVoice::Laomedeia => VoicePitch::Higher,
            GeminiVoice::Vindemiatrix => VoicePitch::Middle,
            _ => VoicePitch::LowerMiddle,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|voice| voice.name() == name)
    }

    /// Voice assigned to a character id.
    pub fn for_character(character_id: &str) -> Self {
        match character_id {
            "1" => GeminiVoice::Orus,
            "2" => GeminiVoice::Enceladus,
            "3" => GeminiVoice::Achird,
            "4" => GeminiVoice::Iapetus,
            "5" => GeminiVoice::Umbriel,
            "6" => GeminiVoice::Laomedeia,
            "7" => GeminiVoice::Schedar,
            "8" => GeminiVoice::Vindemiatrix,
            "9" => GeminiVoice::Algieba,
            _ => GeminiVoice::Orus,
        }
    }
}

impl fmt::Display for GeminiVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Names of every supported voice.
pub fn available_voices() -> Vec<&'static str> {
    GeminiVoice::ALL.iter().map(|voice| voice.name()).collect()
}

pub fn is_valid_voice(name: &str) -> bool {
    GeminiVoice::from_name(name).is_some()
}

/// Everything the live session needs to speak as a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceProfile {
    pub voice_name: String,
    pub language_code: String,
    pub system_instruction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub background_story: String,
}

impl Character {
    pub fn voice(&self) -> GeminiVoice {
        GeminiVoice::for_character(&self.id)
    }

    pub fn voice_profile(&self, language_code: &str) -> VoiceProfile {
        VoiceProfile {
            voice_name: self.voice().name().to_string(),
            language_code: language_code.to_string(),
            system_instruction: self.background_story.clone(),
        }
    }
}

/// Lookup of characters by id.
pub trait CharacterRegistry: Send + Sync {
    fn character(&self, id: &str) -> Option<Character>;

    fn characters(&self) -> Vec<Character>;

    fn language_code(&self) -> &str {
        defaults::LANGUAGE_CODE
    }

    fn voice_profile(&self, id: &str) -> Option<VoiceProfile> {
        self.character(id)
            .map(|character| character.voice_profile(self.language_code()))
    }
}

#[derive(Debug, Deserialize)]
struct CharacterFile {
    #[serde(default)]
    character: Vec<Character>,
}

/// Characters held in memory, usually loaded from a TOML roster.
#[derive(Debug, Clone)]
pub struct RosterRegistry {
    characters: BTreeMap<String, Character>,
    language_code: String,
}

impl RosterRegistry {
    pub fn new(characters: impl IntoIterator<Item = Character>) -> Self {
        Self {
            characters: characters
                .into_iter()
                .map(|character| (character.id.clone(), character))
                .collect(),
            language_code: defaults::LANGUAGE_CODE.to_string(),
        }
    }

    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        self.language_code = language_code.into();
        self
    }

    /// Parse a roster of `[[character]]` tables.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: CharacterFile = toml::from_str(contents)?;
        if let Some(dup) = first_duplicate(&file.character) {
            return Err(VoiceCallError::ConfigInvalidValue {
                key: "character.id".to_string(),
                message: format!("duplicate id {dup}"),
            });
        }
        Ok(Self::new(file.character))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// The stock cast, used when no roster file is configured.
    pub fn builtin() -> Self {
        let cast = [
            ("1", "Andang"),
            ("2", "Rian"),
            ("3", "Nofrianto"),
            ("4", "Dr. Ardi"),
            ("5", "Ustadz Fikri"),
            ("6", "Mbak Rara"),
            ("7", "Pastor Samuel"),
            ("8", "Ida Ayu Wulan"),
            ("9", "Bhante Dhammasila"),
        ];
        Self::new(cast.into_iter().map(|(id, name)| Character {
            id: id.to_string(),
            name: name.to_string(),
            background_story: format!(
                "You are {name}. Talk with the user as a warm, attentive companion."
            ),
        }))
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

fn first_duplicate(characters: &[Character]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    characters
        .iter()
        .map(|character| character.id.as_str())
        .find(|id| !seen.insert(*id))
}

impl CharacterRegistry for RosterRegistry {
    fn character(&self, id: &str) -> Option<Character> {
        self.characters.get(id).cloned()
    }

    fn characters(&self) -> Vec<Character> {
        self.characters.values().cloned().collect()
    }

    fn language_code(&self) -> &str {
        &self.language_code
    }
}

/// Problems worth fixing in a roster: missing or very short instructions.
pub fn validate_voice_assignments(registry: &dyn CharacterRegistry) -> Vec<String> {
    let mut issues = Vec::new();
    for character in registry.characters() {
        let instruction = character.background_story.trim();
        if instruction.is_empty() {
            issues.push(format!(
                "Character \"{}\" has no system instruction",
                character.name
            ));
        } else if instruction.len() < 100 {
            issues.push(format!(
                "Character \"{}\" has a very short system instruction ({} chars)",
                character.name,
                instruction.len()
            ));
        }
    }
    issues
}
