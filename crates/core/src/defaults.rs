//! Deployment-wide fallback generation parameters.

/// Fallback values applied to render requests that do not set them.
///
/// Built once at startup from configuration and shared read-only for the
/// lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultGenerationParameters {
    /// Model checkpoint used when the request names none. Empty means
    /// "whatever the backend has loaded".
    pub model: String,
    /// Sampler used when the request names none.
    pub sampler: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    /// Width used for SDXL-class models.
    pub width_sdxl: u32,
    /// Height used for SDXL-class models.
    pub height_sdxl: u32,
    /// Step count used for SDXL-class models.
    pub steps_sdxl: u32,
    /// Number of output images (backend iterations).
    pub cnt: u32,
    pub batch: u32,
    pub cfg_scale: f64,
}

impl Default for DefaultGenerationParameters {
    fn default() -> Self {
        Self {
            model: String::new(),
            sampler: String::new(),
            width: 512,
            height: 512,
            steps: 30,
            width_sdxl: 512,
            height_sdxl: 512,
            steps_sdxl: 25,
            cnt: 2,
            batch: 1,
            cfg_scale: 7.0,
        }
    }
}

impl DefaultGenerationParameters {
    /// Default `(width, height, steps)` for the given model name.
    pub fn dimensions_for(&self, model_name: &str) -> (u32, u32, u32) {
        if is_sdxl_model(model_name) {
            (self.width_sdxl, self.height_sdxl, self.steps_sdxl)
        } else {
            (self.width, self.height, self.steps)
        }
    }
}

/// SDXL-class checkpoints are recognized by an `xl` substring in their
/// name, case-insensitively.
pub fn is_sdxl_model(model_name: &str) -> bool {
    model_name.to_lowercase().contains("xl")
}
