use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{PromptError, Result};

/// Stable visual descriptors per animal, reused verbatim across every
/// scene of a run so the downstream models render the same individual.
pub type CharacterDna = BTreeMap<String, String>;

/// The user's selections for one generation run. Snapshotted when a run
/// starts; a run never observes later edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInput {
    pub scenario: String,
    pub duration: String,
    pub environment: String,
    pub time_of_day: String,
    pub mood: String,
    pub aspect_ratio: String,
    pub reference_video: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoPrompt {
    pub scene_number: u32,
    pub scene_prompt: String,
    #[serde(rename = "characterDNA")]
    pub character_dna: CharacterDna,
    pub story_context: String,
    pub aspect_ratio: String,
    pub scene_ending_summary: String,
    pub caption_display: String,
    pub cultural_context: String,
    pub quality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoundDesign {
    pub ambient_sounds: Vec<String>,
    pub audio_mix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CameraMood {
    pub camera_work: String,
    pub target_mood: String,
}

/// One scene of a generated sequence. Content fields are immutable after
/// the sequence round trip; only the orchestrator's per-scene UI state
/// changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SceneDescriptor {
    pub scene_number: u32,
    pub total_scenes: u32,
    pub story_beat: String,
    pub image_prompt: String,
    pub video_prompt: VideoPrompt,
    pub sound_design: SoundDesign,
    pub camera_mood: CameraMood,
}

/// Wire form of a scene as the collaborator emits it: identical to
/// `SceneDescriptor` except that `characterDNA` arrives as a JSON-encoded
/// string and still needs parsing into a mapping.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScene {
    pub scene_number: u32,
    pub total_scenes: u32,
    pub story_beat: String,
    pub image_prompt: String,
    pub video_prompt: RawVideoPrompt,
    pub sound_design: SoundDesign,
    pub camera_mood: CameraMood,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVideoPrompt {
    pub scene_number: u32,
    pub scene_prompt: String,
    #[serde(rename = "characterDNA")]
    pub character_dna: String,
    pub story_context: String,
    pub aspect_ratio: String,
    pub scene_ending_summary: String,
    pub caption_display: String,
    pub cultural_context: String,
    pub quality: String,
}

impl SceneDescriptor {
    /// Lifts a wire scene into the domain model, parsing the embedded
    /// characterDNA string. A string that is not a JSON object of string
    /// values is a schema violation.
    pub fn from_raw(raw: RawScene) -> Result<Self> {
        let character_dna: CharacterDna =
            serde_json::from_str(&raw.video_prompt.character_dna).map_err(|e| {
                PromptError::MalformedResponse(format!(
                    "scene {}: characterDNA is not a valid JSON object: {}",
                    raw.scene_number, e
                ))
            })?;

        Ok(SceneDescriptor {
            scene_number: raw.scene_number,
            total_scenes: raw.total_scenes,
            story_beat: raw.story_beat,
            image_prompt: raw.image_prompt,
            video_prompt: VideoPrompt {
                scene_number: raw.video_prompt.scene_number,
                scene_prompt: raw.video_prompt.scene_prompt,
                character_dna,
                story_context: raw.video_prompt.story_context,
                aspect_ratio: raw.video_prompt.aspect_ratio,
                scene_ending_summary: raw.video_prompt.scene_ending_summary,
                caption_display: raw.video_prompt.caption_display,
                cultural_context: raw.video_prompt.cultural_context,
                quality: raw.video_prompt.quality,
            },
            sound_design: raw.sound_design,
            camera_mood: raw.camera_mood,
        })
    }
}

/// Post-parse validation of a full sequence: exact scene count and
/// non-empty prompts. Pure; valid input passes unchanged.
pub fn validate_sequence(scenes: &[SceneDescriptor], expected: usize) -> Result<()> {
    if scenes.len() != expected {
        return Err(PromptError::MalformedResponse(format!(
            "collaborator returned an invalid number of scenes: expected {}, got {}",
            expected,
            scenes.len()
        )));
    }
    for scene in scenes {
        if scene.image_prompt.trim().is_empty() || scene.video_prompt.scene_prompt.trim().is_empty()
        {
            return Err(PromptError::MalformedResponse(format!(
                "scene {} is missing critical prompt fields",
                scene.scene_number
            )));
        }
    }
    Ok(())
}

/// Splits a `data:<mime>;base64,<payload>` reference into its media type
/// and decoded bytes. Revision requires this to succeed on the stored
/// image before any network call.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| PromptError::InvalidState("image reference is not a data URL".into()))?;
    let (mime, payload) = rest.split_once(";base64,").ok_or_else(|| {
        PromptError::InvalidState("image reference is missing a base64 payload".into())
    })?;
    if mime.is_empty() {
        return Err(PromptError::InvalidState(
            "image reference has an empty media type".into(),
        ));
    }
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| PromptError::InvalidState(format!("image payload is not valid base64: {}", e)))?;
    Ok((mime.to_string(), bytes))
}

/// Inverse of [`decode_data_url`].
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_scene(n: u32, dna: &str) -> RawScene {
        RawScene {
            scene_number: n,
            total_scenes: 2,
            story_beat: "The Stalk".into(),
            image_prompt: "photorealistic cheetah in tall grass".into(),
            video_prompt: RawVideoPrompt {
                scene_number: n,
                scene_prompt: "the cheetah creeps forward".into(),
                character_dna: dna.into(),
                story_context: "the hunt begins".into(),
                aspect_ratio: "9:16".into(),
                scene_ending_summary: "the cheetah freezes".into(),
                caption_display: "No captions".into(),
                cultural_context: "African savanna wildlife".into(),
                quality: "Ultra Sharp 4K Quality".into(),
            },
            sound_design: SoundDesign {
                ambient_sounds: vec!["Savanna winds (40%)".into()],
                audio_mix: "wind bed under sparse foley".into(),
            },
            camera_mood: CameraMood {
                camera_work: "Slow push in on the predator".into(),
                target_mood: "Tense".into(),
            },
        }
    }

    #[test]
    fn character_dna_string_round_trips_into_a_mapping() {
        let raw = raw_scene(1, r#"{"Cheetah": "lithe, scar over right eye, dark spots"}"#);
        let scene = SceneDescriptor::from_raw(raw).unwrap();
        assert_eq!(
            scene.video_prompt.character_dna.get("Cheetah").unwrap(),
            "lithe, scar over right eye, dark spots"
        );
    }

    #[test]
    fn malformed_character_dna_is_a_schema_violation() {
        let raw = raw_scene(2, "not json at all");
        let err = SceneDescriptor::from_raw(raw).unwrap_err();
        assert!(matches!(err, PromptError::MalformedResponse(_)));
        assert!(err.to_string().contains("scene 2"));
    }

    #[test]
    fn validation_accepts_a_well_formed_sequence_unchanged() {
        let scenes: Vec<SceneDescriptor> = (1..=2)
            .map(|n| SceneDescriptor::from_raw(raw_scene(n, r#"{"Cheetah": "lithe"}"#)).unwrap())
            .collect();
        let before = scenes.clone();
        validate_sequence(&scenes, 2).unwrap();
        // Validation must not mutate.
        assert_eq!(scenes, before);
        // And must stay valid on a second pass.
        validate_sequence(&scenes, 2).unwrap();
    }

    #[test]
    fn validation_rejects_a_count_mismatch() {
        let scenes =
            vec![SceneDescriptor::from_raw(raw_scene(1, r#"{"Cheetah": "lithe"}"#)).unwrap()];
        let err = validate_sequence(&scenes, 3).unwrap_err();
        assert!(matches!(err, PromptError::MalformedResponse(_)));
        assert!(err.to_string().contains("expected 3, got 1"));
    }

    #[test]
    fn validation_rejects_empty_prompt_fields() {
        let mut scene =
            SceneDescriptor::from_raw(raw_scene(1, r#"{"Cheetah": "lithe"}"#)).unwrap();
        scene.image_prompt = "   ".into();
        let err = validate_sequence(&[scene], 1).unwrap_err();
        assert!(err.to_string().contains("scene 1"));
    }

    #[test]
    fn data_url_round_trip() {
        let url = encode_data_url("image/png", b"fake png bytes");
        let (mime, bytes) = decode_data_url(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"fake png bytes");
    }

    #[test]
    fn decode_rejects_non_data_urls() {
        for bad in ["https://example.com/a.png", "data:image/png,raw", "data:;base64,AAAA"] {
            let err = decode_data_url(bad).unwrap_err();
            assert!(matches!(err, PromptError::InvalidState(_)), "{}", bad);
        }
    }
}
