//! Writes a finished (or partially finished) run to the work directory
//! as a prompt package: a JSON manifest, per-scene copy-ready prompt
//! text, and the decoded keyframe images.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PromptError, Result};
use crate::pipeline::{RunState, SceneSlot};
use crate::scene::{decode_data_url, UserInput};

const MANIFEST_FILE: &str = "sequence.json";

/// The package manifest: the inputs that produced a run plus the full
/// run state, errors included, so a partial run stays inspectable and
/// revisable.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub input: UserInput,
    pub state: RunState,
}

pub struct PackageWriter {
    work_dir: PathBuf,
}

impl PackageWriter {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Persists the manifest and, for every scene holding an image, the
    /// decoded keyframe and a prompt text file. An undecodable stored
    /// image is logged and skipped rather than failing the export.
    pub async fn write_run(&self, input: &UserInput, state: &RunState) -> Result<()> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let manifest = RunManifest {
            input: input.clone(),
            state: state.clone(),
        };
        let manifest_path = self.work_dir.join(MANIFEST_FILE);
        tokio::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?).await?;

        for slot in state.scenes.as_deref().unwrap_or_default() {
            let n = slot.scene.scene_number;

            let prompts_path = self.work_dir.join(format!("scene_{}_prompts.txt", n));
            tokio::fs::write(&prompts_path, scene_prompts_text(slot)).await?;

            if let Some(url) = &slot.image_url {
                match decode_data_url(url) {
                    Ok((mime, bytes)) => {
                        let image_path =
                            self.work_dir.join(format!("scene_{}.{}", n, extension_for(&mime)));
                        tokio::fs::write(&image_path, bytes).await?;
                        info!("Saved keyframe for scene {} to {}", n, image_path.display());
                    }
                    Err(e) => warn!("Skipping keyframe file for scene {}: {}", n, e),
                }
            }
        }

        info!("Wrote prompt package to {}", self.work_dir.display());
        Ok(())
    }

    pub async fn load_manifest(&self) -> Result<RunManifest> {
        let path = self.work_dir.join(MANIFEST_FILE);
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            PromptError::InvalidState(format!("no run manifest at {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "img",
    }
}

/// Copy-ready rendering of one scene's prompt package.
fn scene_prompts_text(slot: &SceneSlot) -> String {
    let scene = &slot.scene;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Scene {}/{} - {}",
        scene.scene_number, scene.total_scenes, scene.story_beat
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "IMAGE PROMPT");
    let _ = writeln!(out, "{}", scene.image_prompt);
    let _ = writeln!(out);
    let _ = writeln!(out, "VIDEO PROMPT");
    let _ = writeln!(out, "{}", scene.video_prompt.scene_prompt);
    let _ = writeln!(out);
    let _ = writeln!(out, "CHARACTER DNA");
    for (animal, descriptors) in &scene.video_prompt.character_dna {
        let _ = writeln!(out, "  {}: {}", animal, descriptors);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "STORY CONTEXT");
    let _ = writeln!(out, "{}", scene.video_prompt.story_context);
    let _ = writeln!(out, "Aspect ratio: {}", scene.video_prompt.aspect_ratio);
    let _ = writeln!(out, "Scene ending: {}", scene.video_prompt.scene_ending_summary);
    let _ = writeln!(out, "Captions: {}", scene.video_prompt.caption_display);
    let _ = writeln!(out, "Cultural context: {}", scene.video_prompt.cultural_context);
    let _ = writeln!(out, "Quality: {}", scene.video_prompt.quality);
    let _ = writeln!(out);
    let _ = writeln!(out, "SOUND DESIGN");
    for sound in &scene.sound_design.ambient_sounds {
        let _ = writeln!(out, "  - {}", sound);
    }
    let _ = writeln!(out, "Mix: {}", scene.sound_design.audio_mix);
    let _ = writeln!(out);
    let _ = writeln!(out, "CAMERA & MOOD");
    let _ = writeln!(out, "Camera: {}", scene.camera_mood.camera_work);
    let _ = writeln!(out, "Mood: {}", scene.camera_mood.target_mood);

    if let Some(error) = &slot.error {
        let _ = writeln!(out);
        let _ = writeln!(out, "KEYFRAME ERROR");
        let _ = writeln!(out, "{}", error);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{apply, RunEvent};
    use crate::scene::{
        encode_data_url, CameraMood, SceneDescriptor, SoundDesign, VideoPrompt,
    };
    use tempfile::TempDir;

    fn sample_input() -> UserInput {
        UserInput {
            scenario: "cheetah hunts gazelle".into(),
            duration: "14_seconds".into(),
            environment: "African Savanna".into(),
            time_of_day: "Golden Hour".into(),
            mood: "Tense".into(),
            aspect_ratio: "9:16".into(),
            reference_video: None,
        }
    }

    fn descriptor(n: u32) -> SceneDescriptor {
        SceneDescriptor {
            scene_number: n,
            total_scenes: 2,
            story_beat: "The Stalk".into(),
            image_prompt: "photorealistic cheetah".into(),
            video_prompt: VideoPrompt {
                scene_number: n,
                scene_prompt: "the cheetah creeps".into(),
                character_dna: [("Cheetah".to_string(), "lithe, dark spots".to_string())].into(),
                story_context: "hunt begins".into(),
                aspect_ratio: "9:16".into(),
                scene_ending_summary: "it freezes".into(),
                caption_display: "No captions".into(),
                cultural_context: "savanna wildlife".into(),
                quality: "4K".into(),
            },
            sound_design: SoundDesign {
                ambient_sounds: vec!["Savanna winds (40%)".into()],
                audio_mix: "wind bed".into(),
            },
            camera_mood: CameraMood {
                camera_work: "push in".into(),
                target_mood: "Tense".into(),
            },
        }
    }

    fn settled_state() -> RunState {
        let mut state = apply(RunState::default(), RunEvent::RunStarted { run: 1 });
        state = apply(
            state,
            RunEvent::SequenceReady {
                run: 1,
                scenes: vec![descriptor(1), descriptor(2)],
            },
        );
        state = apply(
            state,
            RunEvent::ImageReady {
                run: 1,
                scene: 1,
                url: encode_data_url("image/png", b"png bytes"),
            },
        );
        apply(
            state,
            RunEvent::ImageFailed {
                run: 1,
                scene: 2,
                message: "model overloaded".into(),
                fatal: false,
            },
        )
    }

    #[tokio::test]
    async fn package_round_trips_through_the_manifest() {
        let dir = TempDir::new().unwrap();
        let writer = PackageWriter::new(dir.path());
        let input = sample_input();
        let state = settled_state();

        writer.write_run(&input, &state).await.unwrap();

        assert!(dir.path().join("sequence.json").exists());
        assert_eq!(
            std::fs::read(dir.path().join("scene_1.png")).unwrap(),
            b"png bytes"
        );
        // Scene 2 failed: prompts are still exported, no image file.
        assert!(dir.path().join("scene_2_prompts.txt").exists());
        assert!(!dir.path().join("scene_2.png").exists());

        let manifest = writer.load_manifest().await.unwrap();
        assert_eq!(manifest.input.scenario, input.scenario);
        let slots = manifest.state.scenes.as_deref().unwrap();
        assert!(slots[0].image_url.is_some());
        assert_eq!(slots[1].error.as_deref(), Some("model overloaded"));
    }

    #[tokio::test]
    async fn missing_manifest_is_an_invalid_state() {
        let dir = TempDir::new().unwrap();
        let writer = PackageWriter::new(dir.path().join("empty"));
        let err = writer.load_manifest().await.unwrap_err();
        assert!(matches!(err, PromptError::InvalidState(_)));
    }

    #[test]
    fn prompt_text_carries_the_whole_package() {
        let state = settled_state();
        let text = scene_prompts_text(&state.scenes.as_deref().unwrap()[0]);
        assert!(text.contains("Scene 1/2 - The Stalk"));
        assert!(text.contains("photorealistic cheetah"));
        assert!(text.contains("Cheetah: lithe, dark spots"));
        assert!(text.contains("Savanna winds (40%)"));
        assert!(text.contains("Camera: push in"));
        assert!(!text.contains("KEYFRAME ERROR"));

        let failed = scene_prompts_text(&state.scenes.as_deref().unwrap()[1]);
        assert!(failed.contains("KEYFRAME ERROR"));
        assert!(failed.contains("model overloaded"));
    }
}
