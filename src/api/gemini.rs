use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::GenerativeBackend;
use crate::error::{PromptError, Result};
use crate::options::duration_info;
use crate::scene::{validate_sequence, RawScene, SceneDescriptor, UserInput};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const SEQUENCE_MODEL: &str = "gemini-2.5-flash";
const IMAGE_MODEL: &str = "imagen-4.0-generate-001";
const REVISION_MODEL: &str = "gemini-2.5-flash-image";

/// Fixed sampling temperature for the sequence round trip.
const SEQUENCE_TEMPERATURE: f32 = 0.8;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Option<Vec<Prediction>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self { api_key, client }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}?key={}", API_BASE, model, method, self.api_key)
    }

    /// Posts a request body and classifies non-success responses at the
    /// boundary, so quota exhaustion leaves here already typed.
    async fn post(&self, model: &str, method: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(model, method))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_http(status, &error_text));
        }
        Ok(response)
    }

    async fn video_part(&self, path: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(path).await?;
        Ok(json!({
            "inlineData": {
                "mimeType": video_mime(path),
                "data": BASE64.encode(&bytes),
            }
        }))
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_sequence(&self, input: &UserInput) -> Result<Vec<SceneDescriptor>> {
        let duration = duration_info(&input.duration)?;

        info!(
            "Requesting a {}-scene sequence for \"{}\"...",
            duration.scenes, input.scenario
        );

        let mut parts = vec![json!({ "text": build_user_prompt(input)? })];
        if let Some(path) = &input.reference_video {
            info!("Attaching reference video: {}", path.display());
            parts.push(self.video_part(path).await?);
        }

        let body = json!({
            "systemInstruction": { "parts": [{ "text": build_system_instruction(input)? }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": sequence_response_schema(),
                "temperature": SEQUENCE_TEMPERATURE,
            }
        });

        let response = self.post(SEQUENCE_MODEL, "generateContent", &body).await?;
        let content: GenerateContentResponse = response.json().await?;

        let text = first_text(&content).ok_or_else(|| {
            PromptError::MalformedResponse("no text candidate in sequence response".into())
        })?;

        let raw_scenes = parse_sequence_text(text)?;
        let scenes = raw_scenes
            .into_iter()
            .map(SceneDescriptor::from_raw)
            .collect::<Result<Vec<_>>>()?;
        validate_sequence(&scenes, duration.scenes)?;

        info!("Received {} scenes", scenes.len());
        Ok(scenes)
    }

    async fn generate_image(&self, prompt: &str, aspect_ratio: &str) -> Result<String> {
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "sampleCount": 1, "aspectRatio": aspect_ratio }
        });

        let response = self.post(IMAGE_MODEL, "predict", &body).await?;
        let predict: PredictResponse = response.json().await?;

        let prediction = predict
            .predictions
            .as_deref()
            .and_then(|p| p.first())
            .ok_or_else(|| {
                PromptError::MalformedResponse("no prediction in image response".into())
            })?;

        Ok(format!(
            "data:image/jpeg;base64,{}",
            prediction.bytes_base64_encoded
        ))
    }

    async fn revise_image(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<String> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inlineData": { "mimeType": mime_type, "data": BASE64.encode(image) } },
                    { "text": instruction },
                ]
            }]
        });

        let response = self.post(REVISION_MODEL, "generateContent", &body).await?;
        let content: GenerateContentResponse = response.json().await?;

        first_inline_image(&content)
            .map(|inline| format!("data:{};base64,{}", inline.mime_type, inline.data))
            .ok_or_else(|| {
                PromptError::MalformedResponse("no image part in revision response".into())
            })
    }
}

/// 429, or the collaborator's quota status in the body, is the one
/// condition the orchestrator treats as run-fatal.
fn classify_http(status: StatusCode, body: &str) -> PromptError {
    let detail = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    };
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        PromptError::QuotaExceeded(detail)
    } else {
        PromptError::Api(detail)
    }
}

fn first_text(content: &GenerateContentResponse) -> Option<&str> {
    content
        .candidates
        .as_deref()?
        .first()?
        .content
        .as_ref()?
        .parts
        .as_deref()?
        .iter()
        .find_map(|p| p.text.as_deref())
}

fn first_inline_image(content: &GenerateContentResponse) -> Option<&InlineData> {
    content
        .candidates
        .as_deref()?
        .first()?
        .content
        .as_ref()?
        .parts
        .as_deref()?
        .iter()
        .find_map(|p| p.inline_data.as_ref())
}

/// Decodes the collaborator's JSON text into wire scenes, tolerating a
/// markdown fence around the payload.
fn parse_sequence_text(text: &str) -> Result<Vec<RawScene>> {
    let json_text = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(json_text).map_err(|e| {
        warn!("Sequence response failed to decode: {}", e);
        PromptError::MalformedResponse(format!("scene array failed to decode: {}", e))
    })
}

fn video_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "video/mp4",
    }
}

fn build_system_instruction(input: &UserInput) -> Result<String> {
    let duration = duration_info(&input.duration)?;
    Ok(format!(
        r#"You are a world-class film director and scriptwriter specializing in cinematic wildlife documentaries. Break the user's scenario into detailed, professional-grade prompts for AI image and video generation tools.

You MUST adhere to the following rules:
1. Strict JSON output: your entire output is a single valid JSON array of scene objects matching the provided schema. No text or markdown around it.
2. Continuity: create a 'characterDNA' of 3-5 distinct, consistent visual descriptors for each primary animal and reference it in EVERY prompt where that character appears, so the same-looking animal is generated across scenes. Format it as a JSON string inside the 'videoPrompt' object.
3. Core conflict representation: the characters of the scenario's central conflict must be visually present in every scene's imagePrompt, framed together, even in a setup scene.
4. imagePrompt is a still keyframe: composition, lighting, detail, the emotional peak of the scene. videoPrompt.scenePrompt is a 7-second clip: action and movement from start to end.
5. Scene structure: follow the provided story structure ({structure}). Each scene logically follows the last.
6. soundDesign carries 'ambientSounds' (descriptive sounds with percentages) and 'audioMix'. videoPrompt carries 'captionDisplay', 'culturalContext' and 'quality' with specific, professional instructions.
7. videoPrompt.aspectRatio MUST be "{aspect_ratio}". 'sceneEndingSummary' links each scene to the next.
8. The 'totalScenes' field of every object must be {scenes}."#,
        structure = duration.structure.join(", "),
        aspect_ratio = input.aspect_ratio,
        scenes = duration.scenes,
    ))
}

fn build_user_prompt(input: &UserInput) -> Result<String> {
    let duration = duration_info(&input.duration)?;
    let video_note = if input.reference_video.is_some() {
        "A reference video is attached. Analyze its content, style and pacing to influence the generated prompts. "
    } else {
        ""
    };
    Ok(format!(
        r#"Generate a cinematic sequence based on the following specifications.
- Scenario: {scenario}
- Total Duration: {duration} ({description})
- Number of Scenes: {scenes}
- Environment: {environment}
- Time of Day: {time_of_day}
- Overall Mood: {mood}
- Aspect Ratio: {aspect_ratio}
- Scene Structure to Follow: {structure}

{video_note}Maintain strict continuity for all animals using a detailed 'characterDNA' formatted as a JSON string, and keep all key characters present in each scene's image prompt. Output ONLY the JSON array."#,
        scenario = input.scenario,
        duration = input.duration,
        description = duration.description,
        scenes = duration.scenes,
        environment = input.environment,
        time_of_day = input.time_of_day,
        mood = input.mood,
        aspect_ratio = input.aspect_ratio,
        structure = duration.structure.join(" -> "),
        video_note = video_note,
    ))
}

/// The response schema sent with every sequence request; the collaborator
/// is constrained to emit a JSON array of scene objects in which
/// characterDNA is itself a JSON-encoded string.
fn sequence_response_schema() -> Value {
    let video_prompt = json!({
        "type": "OBJECT",
        "properties": {
            "sceneNumber": { "type": "INTEGER" },
            "scenePrompt": { "type": "STRING", "description": "Action and movement across the 7-second clip." },
            "characterDNA": { "type": "STRING", "description": "JSON string mapping animal names to comma-separated visual descriptors, identical across all scenes." },
            "storyContext": { "type": "STRING" },
            "aspectRatio": { "type": "STRING" },
            "sceneEndingSummary": { "type": "STRING" },
            "captionDisplay": { "type": "STRING" },
            "culturalContext": { "type": "STRING" },
            "quality": { "type": "STRING" }
        },
        "required": ["sceneNumber", "scenePrompt", "characterDNA", "storyContext",
                     "aspectRatio", "sceneEndingSummary", "captionDisplay",
                     "culturalContext", "quality"]
    });

    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "sceneNumber": { "type": "INTEGER" },
                "totalScenes": { "type": "INTEGER" },
                "storyBeat": { "type": "STRING", "description": "Short cinematic title for this scene's moment." },
                "imagePrompt": { "type": "STRING", "description": "Detailed cinematic prompt for a keyframe still image." },
                "videoPrompt": video_prompt,
                "soundDesign": {
                    "type": "OBJECT",
                    "properties": {
                        "ambientSounds": { "type": "ARRAY", "items": { "type": "STRING" } },
                        "audioMix": { "type": "STRING" }
                    },
                    "required": ["ambientSounds", "audioMix"]
                },
                "cameraMood": {
                    "type": "OBJECT",
                    "properties": {
                        "cameraWork": { "type": "STRING" },
                        "targetMood": { "type": "STRING" }
                    },
                    "required": ["cameraWork", "targetMood"]
                }
            },
            "required": ["sceneNumber", "totalScenes", "storyBeat", "imagePrompt",
                         "videoPrompt", "soundDesign", "cameraMood"]
        }
    })
}
