//! Build job specifications from chat command text.

use crate::backend::Catalog;
use crate::defaults::DefaultGenerationParameters;
use crate::error::ParamsError;
use crate::job::{JobSpec, RenderParams, UpscaleParams};
use crate::params::parse_params;

/// Build a render job from `text`.
///
/// The first line is the prompt; any further lines, joined with spaces,
/// form the negative prompt. Flags are read from the negative prompt when
/// there is one, otherwise from the prompt, and cut off the line they
/// were found on.
pub async fn build_render_job<C>(
    catalog: &C,
    defaults: &DefaultGenerationParameters,
    text: &str,
) -> Result<JobSpec, ParamsError>
where
    C: Catalog + ?Sized,
{
    let (mut prompt, mut negative) = match text.split_once('\n') {
        Some((first, rest)) => (
            first.to_string(),
            Some(rest.split('\n').collect::<Vec<_>>().join(" ")),
        ),
        None => (text.to_string(), None),
    };

    let mut spec = JobSpec::Render(RenderParams::new(text, defaults));
    let params_line = negative.as_mut().unwrap_or(&mut prompt);
    if let Some(at) = parse_params(catalog, defaults, params_line.as_str(), &mut spec).await? {
        params_line.truncate(at);
    }

    if let JobSpec::Render(render) = &mut spec {
        render.prompt = prompt.trim().to_string();
        render.negative_prompt = negative.as_deref().unwrap_or_default().trim().to_string();
        if render.prompt.is_empty() {
            return Err(ParamsError::MissingPrompt);
        }
    }
    Ok(spec)
}

/// Build an upscale job from the flags in `text`.
pub async fn build_upscale_job<C>(
    catalog: &C,
    defaults: &DefaultGenerationParameters,
    text: &str,
) -> Result<JobSpec, ParamsError>
where
    C: Catalog + ?Sized,
{
    let mut spec = JobSpec::Upscale(UpscaleParams::new(text));
    parse_params(catalog, defaults, text, &mut spec).await?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::backend::CatalogKind;
    use crate::error::BackendError;

    struct Models;

    #[async_trait]
    impl Catalog for Models {
        async fn list(&self, kind: CatalogKind) -> Result<Vec<String>, BackendError> {
            Ok(match kind {
                CatalogKind::Models => vec!["SDXL-base".to_string(), "v1-5".to_string()],
                CatalogKind::Upscalers => vec!["LDSR".to_string()],
                _ => Vec::new(),
            })
        }
    }

    async fn render(text: &str) -> Result<RenderParams, ParamsError> {
        let spec = build_render_job(&Models, &DefaultGenerationParameters::default(), text).await?;
        match spec {
            JobSpec::Render(render) => Ok(render),
            JobSpec::Upscale(_) => panic!("expected a render spec"),
        }
    }

    #[tokio::test]
    async fn flags_on_second_line_leave_empty_negative_prompt() {
        let r = render("a cat\n-s 42 -w 768 -h 512 -t 20").await.unwrap();
        assert_eq!(r.prompt, "a cat");
        assert_eq!(r.negative_prompt, "");
        assert_eq!(r.seed, 42);
        assert_eq!((r.width, r.height, r.steps), (768, 512, 20));
        assert_eq!(r.orig_prompt, "a cat\n-s 42 -w 768 -h 512 -t 20");
    }

    #[tokio::test]
    async fn single_line_flags_are_cut_from_prompt() {
        let r = render("portrait -model SDXL-base -cnt 3 -upscale 2").await.unwrap();
        assert_eq!(r.prompt, "portrait");
        assert_eq!(r.num_outputs, 1);
        assert_eq!(r.model_name, "SDXL-base");
    }

    #[tokio::test]
    async fn negative_prompt_lines_are_joined() {
        let r = render("castle\nblurry\nlowres -s 9").await.unwrap();
        assert_eq!(r.prompt, "castle");
        assert_eq!(r.negative_prompt, "blurry lowres");
        assert_eq!(r.seed, 9);
    }

    #[tokio::test]
    async fn flags_only_is_missing_prompt() {
        assert_matches!(render("-s 1").await, Err(ParamsError::MissingPrompt));
        assert_matches!(render("   ").await, Err(ParamsError::MissingPrompt));
    }

    #[tokio::test]
    async fn upscale_job_keeps_defaults_without_flags() {
        let spec = build_upscale_job(&Models, &DefaultGenerationParameters::default(), "")
            .await
            .unwrap();
        assert_matches!(spec, JobSpec::Upscale(up) => {
            assert_eq!(up.scale, 4.0);
            assert_eq!(up.upscaler, "LDSR");
        });
    }
}
