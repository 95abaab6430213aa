//! The generation orchestrator: a run-level state machine folded through a
//! pure reducer, driven by strictly sequential collaborator round trips.
//!
//! A run moves Idle -> SequenceLoading -> ScenesStreamingImages and ends
//! Settled (loop exhausted) or Aborted (sequence failure, or a quota
//! failure that cancels every not-yet-started scene). Revisions are an
//! independent per-scene sub-flow and never escalate past their scene.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::GenerativeBackend;
use crate::error::{PromptError, Result};
use crate::scene::{decode_data_url, SceneDescriptor, UserInput};

/// Delay between consecutive scene image calls, to respect collaborator
/// rate limits. Skipped after the last scene and after a fatal stop.
const SCENE_PACING: Duration = Duration::from_millis(1000);

/// Error shown on scenes whose generation never started because an
/// earlier scene exhausted the quota.
pub const CANCELLED_MESSAGE: &str = "Generation cancelled due to API quota error.";

/// One scene plus its orchestrator-owned display state. Content is
/// immutable after installation; only the image fields change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSlot {
    pub scene: SceneDescriptor,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(rename = "isGeneratingImage")]
    pub is_generating: bool,
    #[serde(rename = "imageError")]
    pub error: Option<String>,
    /// Token of the latest revision issued for this slot; results carrying
    /// an older token are stale and dropped by the reducer.
    #[serde(skip)]
    revision: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    /// Monotonically increasing run id; events from superseded runs are
    /// discarded when folded.
    pub run: u64,
    #[serde(rename = "sequence")]
    pub scenes: Option<Vec<SceneSlot>>,
    #[serde(rename = "isLoading")]
    pub is_loading: bool,
    #[serde(rename = "runError")]
    pub error: Option<String>,
}

impl RunState {
    pub fn slot(&self, scene_number: u32) -> Option<&SceneSlot> {
        self.scenes
            .as_deref()?
            .iter()
            .find(|s| s.scene.scene_number == scene_number)
    }

    fn slot_mut(&mut self, scene_number: u32) -> Option<&mut SceneSlot> {
        self.scenes
            .as_deref_mut()?
            .iter_mut()
            .find(|s| s.scene.scene_number == scene_number)
    }
}

/// Everything that can happen to a run. Every event names the run it
/// belongs to; revision events also carry their slot token.
#[derive(Debug)]
pub enum RunEvent {
    RunStarted { run: u64 },
    SequenceReady { run: u64, scenes: Vec<SceneDescriptor> },
    SequenceFailed { run: u64, message: String },
    ImageReady { run: u64, scene: u32, url: String },
    ImageFailed { run: u64, scene: u32, message: String, fatal: bool },
    RevisionStarted { run: u64, scene: u32, revision: u64 },
    RevisionReady { run: u64, scene: u32, revision: u64, url: String },
    RevisionFailed { run: u64, scene: u32, revision: u64, message: String },
}

impl RunEvent {
    fn run(&self) -> u64 {
        match self {
            RunEvent::RunStarted { run }
            | RunEvent::SequenceReady { run, .. }
            | RunEvent::SequenceFailed { run, .. }
            | RunEvent::ImageReady { run, .. }
            | RunEvent::ImageFailed { run, .. }
            | RunEvent::RevisionStarted { run, .. }
            | RunEvent::RevisionReady { run, .. }
            | RunEvent::RevisionFailed { run, .. } => *run,
        }
    }
}

/// Pure reducer: folds one event into the run state. Stale events (wrong
/// run id, or a revision token that was superseded) leave the state
/// untouched.
pub fn apply(mut state: RunState, event: RunEvent) -> RunState {
    match event {
        RunEvent::RunStarted { run } => {
            // A new run replaces the previous one wholesale, with no
            // stale display while the sequence request is in flight.
            return RunState {
                run,
                scenes: None,
                is_loading: true,
                error: None,
            };
        }
        _ if event.run() != state.run => {
            debug!("Discarding stale event from run {}: {:?}", event.run(), event);
            return state;
        }
        RunEvent::SequenceReady { scenes, .. } => {
            state.scenes = Some(
                scenes
                    .into_iter()
                    .map(|scene| SceneSlot {
                        scene,
                        image_url: None,
                        is_generating: true,
                        error: None,
                        revision: 0,
                    })
                    .collect(),
            );
            state.is_loading = false;
        }
        RunEvent::SequenceFailed { message, .. } => {
            state.error = Some(message);
            state.is_loading = false;
        }
        RunEvent::ImageReady { scene, url, .. } => {
            if let Some(slot) = state.slot_mut(scene) {
                slot.image_url = Some(url);
                slot.is_generating = false;
                slot.error = None;
            }
        }
        RunEvent::ImageFailed {
            scene,
            message,
            fatal,
            ..
        } => {
            if let Some(slot) = state.slot_mut(scene) {
                slot.is_generating = false;
                slot.error = Some(message.clone());
            }
            if fatal {
                state.error = Some(format!("Image generation stopped: {}", message));
                // Cancel every strictly-later scene that has not started.
                if let Some(slots) = state.scenes.as_deref_mut() {
                    for slot in slots {
                        if slot.scene.scene_number > scene && slot.is_generating {
                            slot.is_generating = false;
                            slot.error = Some(CANCELLED_MESSAGE.to_string());
                        }
                    }
                }
            }
        }
        RunEvent::RevisionStarted {
            scene, revision, ..
        } => {
            if let Some(slot) = state.slot_mut(scene) {
                slot.is_generating = true;
                slot.error = None;
                slot.revision = revision;
            }
        }
        RunEvent::RevisionReady {
            scene,
            revision,
            url,
            ..
        } => {
            if let Some(slot) = state.slot_mut(scene) {
                if slot.revision == revision {
                    slot.image_url = Some(url);
                    slot.is_generating = false;
                }
            }
        }
        RunEvent::RevisionFailed {
            scene,
            revision,
            message,
            ..
        } => {
            if let Some(slot) = state.slot_mut(scene) {
                if slot.revision == revision {
                    slot.is_generating = false;
                    // The last good image stays in the slot; a surface
                    // renders the error while it is present.
                    slot.error = Some(message);
                }
            }
        }
    }
    state
}

type Observer = Box<dyn Fn(&RunState) + Send>;

/// Owns the run state and drives the collaborators. All mutation goes
/// through [`apply`], one resolved async step at a time.
pub struct Orchestrator<B> {
    backend: B,
    state: RunState,
    run_seq: u64,
    revision_seq: u64,
    on_change: Option<Observer>,
}

impl<B: GenerativeBackend> Orchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: RunState::default(),
            run_seq: 0,
            revision_seq: 0,
            on_change: None,
        }
    }

    /// Registers a callback fired after every state mutation, so a
    /// surface can render partial progress.
    pub fn on_change(&mut self, observer: impl Fn(&RunState) + Send + 'static) {
        self.on_change = Some(Box::new(observer));
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Seeds the orchestrator with a previously exported run so its
    /// scenes can be revised.
    pub fn restore(&mut self, state: RunState) {
        self.run_seq = state.run;
        self.state = state;
    }

    fn dispatch(&mut self, event: RunEvent) {
        self.state = apply(std::mem::take(&mut self.state), event);
        if let Some(observer) = &self.on_change {
            observer(&self.state);
        }
    }

    /// One end-to-end run: a sequence round trip, then keyframe images
    /// strictly in ascending scene order, one in flight at a time.
    pub async fn run(&mut self, input: &UserInput) -> &RunState {
        self.run_seq += 1;
        let run = self.run_seq;
        self.dispatch(RunEvent::RunStarted { run });

        match self.backend.generate_sequence(input).await {
            Ok(scenes) => self.dispatch(RunEvent::SequenceReady { run, scenes }),
            Err(e) => {
                warn!("Sequence generation failed: {}", e);
                self.dispatch(RunEvent::SequenceFailed {
                    run,
                    message: e.to_string(),
                });
                return &self.state;
            }
        }

        let mut pending: Vec<(u32, String)> = self
            .state
            .scenes
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|slot| (slot.scene.scene_number, slot.scene.image_prompt.clone()))
            .collect();
        pending.sort_by_key(|(n, _)| *n);

        let total = pending.len();
        for (idx, (scene, prompt)) in pending.into_iter().enumerate() {
            info!("Generating keyframe for scene {} ({}/{})", scene, idx + 1, total);
            match self.backend.generate_image(&prompt, &input.aspect_ratio).await {
                Ok(url) => self.dispatch(RunEvent::ImageReady { run, scene, url }),
                Err(e) => {
                    warn!("Keyframe for scene {} failed: {}", scene, e);
                    let fatal = e.is_fatal();
                    self.dispatch(RunEvent::ImageFailed {
                        run,
                        scene,
                        message: e.to_string(),
                        fatal,
                    });
                    if fatal {
                        // No further image calls for this run.
                        break;
                    }
                }
            }

            if idx + 1 < total {
                tokio::time::sleep(SCENE_PACING).await;
            }
        }

        &self.state
    }

    /// Revises one scene's keyframe from its current image plus a
    /// free-text instruction. Failures stay on that scene, whatever their
    /// kind; a revision never cancels sibling work.
    pub async fn revise(&mut self, scene_number: u32, instruction: &str) -> Result<()> {
        let run = self.state.run;
        let url = {
            let slot = self.state.slot(scene_number).ok_or_else(|| {
                PromptError::InvalidState(format!("scene {} does not exist", scene_number))
            })?;
            if slot.is_generating {
                return Err(PromptError::InvalidState(format!(
                    "scene {} already has work in flight",
                    scene_number
                )));
            }
            slot.image_url.clone().ok_or_else(|| {
                PromptError::InvalidState(format!("scene {} has no image to revise", scene_number))
            })?
        };

        self.revision_seq += 1;
        let revision = self.revision_seq;
        self.dispatch(RunEvent::RevisionStarted {
            run,
            scene: scene_number,
            revision,
        });

        let (mime_type, bytes) = match decode_data_url(&url) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.dispatch(RunEvent::RevisionFailed {
                    run,
                    scene: scene_number,
                    revision,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        info!("Revising keyframe for scene {}", scene_number);
        match self
            .backend
            .revise_image(&bytes, &mime_type, instruction)
            .await
        {
            Ok(new_url) => {
                self.dispatch(RunEvent::RevisionReady {
                    run,
                    scene: scene_number,
                    revision,
                    url: new_url,
                });
                Ok(())
            }
            Err(e) => {
                self.dispatch(RunEvent::RevisionFailed {
                    run,
                    scene: scene_number,
                    revision,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
