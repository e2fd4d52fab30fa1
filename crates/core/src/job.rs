//! Job specifications.
//!
//! A [`JobSpec`] is either a text-to-image [`RenderParams`] job or an
//! [`UpscaleParams`] job for an uploaded image. Both keep the untouched
//! message text for diagnostics.

use std::fmt;

use crate::defaults::DefaultGenerationParameters;
use crate::reply::escape_html;
use crate::types::OutputFormat;

/// Upscaler used by plain upscale jobs unless overridden.
pub const DEFAULT_UPSCALER: &str = "LDSR";

/// Scale factor of standalone upscale jobs unless overridden.
pub const DEFAULT_UPSCALE_SCALE: f32 = 4.0;

pub const DEFAULT_HR_UPSCALER: &str = "R-ESRGAN 4x+";
pub const DEFAULT_HR_DENOISING_STRENGTH: f32 = 0.4;
pub const DEFAULT_HR_SECOND_PASS_STEPS: u32 = 15;

/// Negative prompts longer than this are shortened in summaries.
const NEGATIVE_PREVIEW_CHARS: usize = 10;

/// A fully resolved generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSpec {
    Render(RenderParams),
    Upscale(UpscaleParams),
}

impl JobSpec {
    pub fn orig_prompt(&self) -> &str {
        match self {
            Self::Render(render) => &render.orig_prompt,
            Self::Upscale(upscale) => &upscale.orig_prompt,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        match self {
            Self::Render(render) => OutputFormat::from_png_flag(render.output_png),
            Self::Upscale(upscale) => OutputFormat::from_png_flag(upscale.output_png),
        }
    }

    /// Short job kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Render(_) => "render",
            Self::Upscale(_) => "upscale",
        }
    }
}

impl fmt::Display for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(render) => render.fmt(f),
            Self::Upscale(upscale) => upscale.fmt(f),
        }
    }
}

/// Upscale settings, standalone or as the post-pass of a render.
///
/// A `scale` of zero disables the post-pass of a render.
#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleParams {
    pub orig_prompt: String,
    pub scale: f32,
    pub upscaler: String,
    pub output_png: bool,
}

impl UpscaleParams {
    /// Starting values of a standalone upscale request.
    pub fn new(orig_prompt: impl Into<String>) -> Self {
        Self {
            orig_prompt: orig_prompt.into(),
            scale: DEFAULT_UPSCALE_SCALE,
            upscaler: DEFAULT_UPSCALER.to_string(),
            output_png: false,
        }
    }

    /// The disabled post-pass embedded in a fresh render request.
    fn disabled() -> Self {
        Self {
            orig_prompt: String::new(),
            scale: 0.0,
            upscaler: DEFAULT_UPSCALER.to_string(),
            output_png: false,
        }
    }
}

impl fmt::Display for UpscaleParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "🔎 {}x{}", escape_html(&self.upscaler), self.scale)?;
        if self.output_png {
            f.write_str("/PNG")?;
        }
        Ok(())
    }
}

/// Highres fix: a second denoising pass over an upsampled first image.
#[derive(Debug, Clone, PartialEq)]
pub struct HighresParams {
    pub denoising_strength: f32,
    /// Zero disables the highres pass.
    pub scale: f32,
    pub upscaler: String,
    pub second_pass_steps: u32,
}

impl Default for HighresParams {
    fn default() -> Self {
        Self {
            denoising_strength: DEFAULT_HR_DENOISING_STRENGTH,
            scale: 0.0,
            upscaler: DEFAULT_HR_UPSCALER.to_string(),
            second_pass_steps: DEFAULT_HR_SECOND_PASS_STEPS,
        }
    }
}

/// A text-to-image request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub orig_prompt: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u32,
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    pub steps: u32,
    /// Number of backend iterations; each produces `batch_size` images.
    pub num_outputs: u32,
    pub output_png: bool,
    pub cfg_scale: f64,
    pub sampler_name: String,
    pub model_name: String,
    pub upscale: UpscaleParams,
    pub hr: HighresParams,
}

impl RenderParams {
    /// Starting values before flags are parsed: a random seed and the
    /// deployment defaults.
    pub fn new(orig_prompt: impl Into<String>, defaults: &DefaultGenerationParameters) -> Self {
        Self {
            orig_prompt: orig_prompt.into(),
            prompt: String::new(),
            negative_prompt: String::new(),
            seed: rand::random(),
            width: defaults.width,
            height: defaults.height,
            batch_size: defaults.batch,
            steps: defaults.steps,
            num_outputs: defaults.cnt,
            output_png: false,
            cfg_scale: defaults.cfg_scale,
            sampler_name: defaults.sampler.clone(),
            model_name: defaults.model.clone(),
            upscale: UpscaleParams::disabled(),
            hr: HighresParams::default(),
        }
    }

    pub fn highres_enabled(&self) -> bool {
        self.hr.scale > 0.0
    }

    pub fn upscale_enabled(&self) -> bool {
        self.upscale.scale > 0.0
    }

    /// Total images the backend will return.
    pub fn expected_images(&self) -> u32 {
        self.num_outputs.saturating_mul(self.batch_size)
    }
}

impl fmt::Display for RenderParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.negative_prompt.is_empty() {
            let mut negative: String = self
                .negative_prompt
                .chars()
                .take(NEGATIVE_PREVIEW_CHARS)
                .collect();
            if self.negative_prompt.chars().count() > NEGATIVE_PREVIEW_CHARS {
                negative.push_str("...");
            }
            write!(f, "📍{} ", escape_html(&negative))?;
        }

        write!(
            f,
            "🌱<code>{}</code> 👟{} 🕹{:.1} 🖼{}x{}",
            self.seed, self.steps, self.cfg_scale, self.width, self.height,
        )?;
        if self.num_outputs > 1 {
            write!(f, "x{}", self.num_outputs)?;
        }
        if self.output_png {
            f.write_str("/PNG")?;
        }
        write!(
            f,
            " 🔭{} 🧩{}",
            escape_html(&self.sampler_name),
            escape_html(&self.model_name),
        )?;

        if self.highres_enabled() {
            write!(
                f,
                " 🔎 {}x{}/{}",
                escape_html(&self.hr.upscaler),
                self.hr.scale,
                self.hr.denoising_strength,
            )?;
        } else if self.upscale_enabled() {
            write!(f, " {}", self.upscale)?;
        }
        Ok(())
    }
}
