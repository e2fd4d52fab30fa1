//! Request and response bodies of the `/sdapi/v1` endpoints.

use std::fmt;

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use sdbot_core::job::{RenderParams, UpscaleParams};

/// Body of `POST /sdapi/v1/txt2img`.
#[derive(Debug, Clone, Serialize)]
pub struct Txt2ImgRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: i64,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    /// Number of sequential batches.
    pub n_iter: u32,
    pub batch_size: u32,
    pub cfg_scale: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sampler_name: String,
    pub enable_hr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_upscaler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_second_pass_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denoising_strength: Option<f32>,
    pub override_settings: OverrideSettings,
    /// Keep the requested checkpoint loaded after the job.
    pub override_settings_restore_afterwards: bool,
    pub send_images: bool,
    pub save_images: bool,
}

/// Per-request overrides of web UI options.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sd_model_checkpoint: Option<String>,
    /// Without this the response leads with a grid of all images.
    pub return_grid: bool,
}

impl From<&RenderParams> for Txt2ImgRequest {
    fn from(params: &RenderParams) -> Self {
        let hr = params.highres_enabled().then_some(&params.hr);
        Self {
            prompt: params.prompt.clone(),
            negative_prompt: params.negative_prompt.clone(),
            seed: i64::from(params.seed),
            width: params.width,
            height: params.height,
            steps: params.steps,
            n_iter: params.num_outputs,
            batch_size: params.batch_size,
            cfg_scale: params.cfg_scale,
            sampler_name: params.sampler_name.clone(),
            enable_hr: hr.is_some(),
            hr_scale: hr.map(|hr| hr.scale),
            hr_upscaler: hr.map(|hr| hr.upscaler.clone()),
            hr_second_pass_steps: hr.map(|hr| hr.second_pass_steps),
            denoising_strength: hr.map(|hr| hr.denoising_strength),
            override_settings: OverrideSettings {
                sd_model_checkpoint: Some(params.model_name.clone()).filter(|m| !m.is_empty()),
                return_grid: false,
            },
            override_settings_restore_afterwards: false,
            send_images: true,
            save_images: false,
        }
    }
}

/// Response of `POST /sdapi/v1/txt2img`.
#[derive(Debug, Deserialize)]
pub struct Txt2ImgResponse {
    /// Base64-encoded PNGs.
    #[serde(default)]
    pub images: Vec<String>,
}

/// Body of `POST /sdapi/v1/extra-single-image`.
#[derive(Debug, Clone, Serialize)]
pub struct ExtraSingleImageRequest {
    /// Base64-encoded source image.
    pub image: String,
    pub upscaling_resize: f32,
    pub upscaler_1: String,
}

impl ExtraSingleImageRequest {
    pub fn new(image_base64: String, params: &UpscaleParams) -> Self {
        Self {
            image: image_base64,
            upscaling_resize: params.scale,
            upscaler_1: params.upscaler.clone(),
        }
    }
}

/// Response of `POST /sdapi/v1/extra-single-image`.
#[derive(Debug, Deserialize)]
pub struct ExtraSingleImageResponse {
    pub image: String,
}

/// Response of `GET /sdapi/v1/progress`.
#[derive(Debug, Deserialize)]
pub struct ProgressResponse {
    /// Fraction done, `0.0..=1.0`.
    pub progress: f64,
    /// Estimated seconds remaining.
    #[serde(default)]
    pub eta_relative: f64,
}

impl ProgressResponse {
    pub fn percent(&self) -> u8 {
        (self.progress * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn eta_secs(&self) -> Option<f64> {
        (self.eta_relative > 0.0).then_some(self.eta_relative)
    }
}

/// Entry of `GET /sdapi/v1/sd-models`.
#[derive(Debug, Deserialize)]
pub struct ModelEntry {
    pub model_name: String,
}

/// Entry of `GET /sdapi/v1/sd-vae`.
#[derive(Debug, Deserialize)]
pub struct VaeEntry {
    pub model_name: String,
}

/// Entry of the samplers, upscalers and LoRA lists.
#[derive(Debug, Deserialize)]
pub struct NamedEntry {
    pub name: String,
}

/// Response of `GET /sdapi/v1/embeddings`.
#[derive(Debug, Deserialize)]
pub struct EmbeddingsResponse {
    /// Names of the loaded embeddings, in the order the web UI lists them.
    #[serde(default, deserialize_with = "object_keys")]
    pub loaded: Vec<String>,
}

/// Keys of a JSON object in document order; the values are skipped.
fn object_keys<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct KeysVisitor;

    impl<'de> Visitor<'de> for KeysVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut keys = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, IgnoredAny)) = map.next_entry::<String, IgnoredAny>()? {
                keys.push(key);
            }
            Ok(keys)
        }
    }

    deserializer.deserialize_map(KeysVisitor)
}
