//! Flag parser for chat requests.
//!
//! Parameters follow the prompt as shell-style flags, e.g.
//! `a cat in a hat -seed 42 -w 768 -model "sd_xl_base_1.0"`. Flags that
//! name catalog members (sampler, model, upscalers) are validated against
//! the backend's live catalogs.

use std::str::FromStr;

use crate::backend::{Catalog, CatalogKind};
use crate::defaults::DefaultGenerationParameters;
use crate::error::ParamsError;
use crate::job::{JobSpec, RenderParams};

/// Seeds copied from a previous result summary carry this prefix.
const SEED_GLYPH: &str = "🌱";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Seed,
    Width,
    Height,
    Steps,
    Batch,
    Count,
    Png,
    Cfg,
    Sampler,
    Model,
    Upscale,
    Upscaler,
    Highres,
    HighresDenoise,
    HighresUpscaler,
    HighresSteps,
}

impl Flag {
    fn from_name(name: &str) -> Option<Self> {
        let flag = match name {
            "seed" | "s" => Self::Seed,
            "width" | "w" => Self::Width,
            "height" | "h" => Self::Height,
            "steps" | "t" => Self::Steps,
            "batch" | "b" => Self::Batch,
            "cnt" | "o" => Self::Count,
            "png" | "p" => Self::Png,
            "cfg" | "c" => Self::Cfg,
            "sampler" | "r" => Self::Sampler,
            "model" | "m" => Self::Model,
            "upscale" | "u" => Self::Upscale,
            "upscaler" => Self::Upscaler,
            "hr" => Self::Highres,
            "hr-denoisestrength" | "hrd" => Self::HighresDenoise,
            "hr-upscaler" | "hru" => Self::HighresUpscaler,
            "hr-steps" | "hrt" => Self::HighresSteps,
            _ => return None,
        };
        Some(flag)
    }

    fn takes_value(self) -> bool {
        self != Self::Png
    }

    fn applies_to(self, spec: &JobSpec) -> bool {
        match spec {
            JobSpec::Render(_) => true,
            JobSpec::Upscale(_) => matches!(self, Self::Png | Self::Upscale | Self::Upscaler),
        }
    }
}

/// Render fields given explicitly; everything else gets a default.
#[derive(Debug, Default)]
struct Given {
    width: bool,
    height: bool,
    steps: bool,
    batch: bool,
    count: bool,
}

/// Apply the flags found in `raw` to `target`.
///
/// Returns the byte offset of the first recognized flag in `raw`, or
/// `None` if there was none, so the caller can cut the flags off the
/// prompt text. Render targets get unset count, batch, size and steps
/// filled from `defaults` (SDXL values for SDXL-class models).
pub async fn parse_params<C>(
    catalog: &C,
    defaults: &DefaultGenerationParameters,
    raw: &str,
    target: &mut JobSpec,
) -> Result<Option<usize>, ParamsError>
where
    C: Catalog + ?Sized,
{
    let mut tokens = tokenize(raw).into_iter();
    let mut given = Given::default();
    let mut first_flag_at: Option<usize> = None;

    while let Some(token) = tokens.next() {
        let Some(name) = token.text.strip_prefix('-') else {
            if first_flag_at.is_some() {
                return Err(ParamsError::ParamsAfterPrompt);
            }
            continue;
        };
        let name = name.to_lowercase();

        let Some(flag) = Flag::from_name(&name) else {
            tracing::debug!(flag = %token.text, "Ignoring unknown flag");
            continue;
        };

        if !flag.applies_to(target) {
            if flag.takes_value() {
                tokens.next();
            }
            continue;
        }

        let value = if flag.takes_value() {
            tokens
                .next()
                .map(|value| value.text)
                .ok_or_else(|| ParamsError::MissingValue(name.clone()))?
        } else {
            String::new()
        };

        apply_flag(catalog, flag, &value, target, &mut given).await?;

        first_flag_at.get_or_insert(token.at);
    }

    if let JobSpec::Render(render) = target {
        apply_render_defaults(render, defaults, &given);
    }

    Ok(first_flag_at)
}

async fn apply_flag<C>(
    catalog: &C,
    flag: Flag,
    value: &str,
    target: &mut JobSpec,
    given: &mut Given,
) -> Result<(), ParamsError>
where
    C: Catalog + ?Sized,
{
    match target {
        JobSpec::Render(render) => match flag {
            Flag::Seed => {
                let seed = value.strip_prefix(SEED_GLYPH).unwrap_or(value);
                render.seed = parse_number(seed, "seed")?;
            }
            Flag::Width => {
                render.width = parse_positive(value, "width")?;
                given.width = true;
            }
            Flag::Height => {
                render.height = parse_positive(value, "height")?;
                given.height = true;
            }
            Flag::Steps => {
                render.steps = parse_positive(value, "steps")?;
                given.steps = true;
            }
            Flag::Batch => {
                render.batch_size = parse_positive(value, "batch size")?;
                given.batch = true;
            }
            Flag::Count => {
                render.num_outputs = parse_positive(value, "output count")?;
                given.count = true;
            }
            Flag::Png => render.output_png = true,
            Flag::Cfg => render.cfg_scale = parse_float(value, "CFG scale")?,
            Flag::Sampler => {
                render.sampler_name = in_catalog(catalog, CatalogKind::Samplers, value).await?;
            }
            Flag::Model => {
                render.model_name = in_catalog(catalog, CatalogKind::Models, value).await?;
            }
            Flag::Upscale => render.upscale.scale = parse_float(value, "upscale scale")?,
            Flag::Upscaler => {
                render.upscale.upscaler = in_catalog(catalog, CatalogKind::Upscalers, value).await?;
            }
            Flag::Highres => render.hr.scale = parse_float(value, "hr scale")?,
            Flag::HighresDenoise => {
                render.hr.denoising_strength = parse_float(value, "hr denoise strength")?;
            }
            Flag::HighresUpscaler => {
                render.hr.upscaler = in_catalog(catalog, CatalogKind::Upscalers, value).await?;
            }
            Flag::HighresSteps => {
                render.hr.second_pass_steps = parse_number(value, "hr second pass steps")?;
            }
        },
        JobSpec::Upscale(upscale) => match flag {
            Flag::Png => upscale.output_png = true,
            Flag::Upscale => upscale.scale = parse_float(value, "upscale scale")?,
            Flag::Upscaler => {
                upscale.upscaler = in_catalog(catalog, CatalogKind::Upscalers, value).await?;
            }
            _ => {}
        },
    }
    Ok(())
}

fn apply_render_defaults(
    render: &mut RenderParams,
    defaults: &DefaultGenerationParameters,
    given: &Given,
) {
    if !given.count {
        render.num_outputs = defaults.cnt;
    }
    if !given.batch {
        render.batch_size = defaults.batch;
    }

    let (width, height, steps) = defaults.dimensions_for(&render.model_name);
    if !given.width {
        render.width = width;
    }
    if !given.height {
        render.height = height;
    }
    if !given.steps {
        render.steps = steps;
    }

    // Highres and plain upscale are exclusive; highres wins.
    if render.highres_enabled() {
        render.upscale.scale = 0.0;
    }
    if render.highres_enabled() || render.upscale_enabled() {
        render.num_outputs = 1;
    }
}

/// A word of the parameter text and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
struct Token {
    text: String,
    at: usize,
}

/// Shell-style split honoring quotes. Lines with unbalanced quotes (an
/// apostrophe in the prompt, say) fall back to whitespace splitting.
fn tokenize(raw: &str) -> Vec<Token> {
    match shell_words::split(raw) {
        Ok(words) => {
            let starts = word_starts(raw);
            if starts.len() == words.len() {
                return words
                    .into_iter()
                    .zip(starts)
                    .map(|(text, at)| Token { text, at })
                    .collect();
            }
            tracing::debug!("Word offsets out of step, falling back to whitespace tokenizing");
        }
        Err(e) => {
            tracing::debug!(error = %e, "Falling back to whitespace tokenizing");
        }
    }
    whitespace_tokens(raw)
}

fn whitespace_tokens(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in raw.char_indices().chain(std::iter::once((raw.len(), ' '))) {
        match (c.is_whitespace(), start) {
            (true, Some(at)) => {
                tokens.push(Token {
                    text: raw[at..i].to_string(),
                    at,
                });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    tokens
}

/// Start offsets of the words `shell_words::split` yields for `raw`,
/// following the same quoting, escaping and comment rules.
fn word_starts(raw: &str) -> Vec<usize> {
    enum State {
        Delimiter,
        Backslash(usize),
        Unquoted,
        UnquotedBackslash,
        Single,
        Double,
        DoubleBackslash,
        Comment,
    }

    let mut starts = Vec::new();
    let mut state = State::Delimiter;
    for (i, c) in raw.char_indices() {
        state = match state {
            State::Delimiter => match c {
                ' ' | '\t' | '\n' => State::Delimiter,
                '#' => State::Comment,
                '\\' => State::Backslash(i),
                _ => {
                    starts.push(i);
                    match c {
                        '\'' => State::Single,
                        '"' => State::Double,
                        _ => State::Unquoted,
                    }
                }
            },
            // An escaped newline between words is a line continuation.
            State::Backslash(at) => match c {
                '\n' => State::Delimiter,
                _ => {
                    starts.push(at);
                    State::Unquoted
                }
            },
            State::Unquoted => match c {
                ' ' | '\t' | '\n' => State::Delimiter,
                '\'' => State::Single,
                '"' => State::Double,
                '\\' => State::UnquotedBackslash,
                _ => State::Unquoted,
            },
            State::UnquotedBackslash => State::Unquoted,
            State::Single if c == '\'' => State::Unquoted,
            State::Single => State::Single,
            State::Double => match c {
                '"' => State::Unquoted,
                '\\' => State::DoubleBackslash,
                _ => State::Double,
            },
            State::DoubleBackslash => State::Double,
            State::Comment if c == '\n' => State::Delimiter,
            State::Comment => State::Comment,
        };
    }
    if let State::Backslash(at) = state {
        starts.push(at);
    }
    starts
}

async fn in_catalog<C>(catalog: &C, kind: CatalogKind, value: &str) -> Result<String, ParamsError>
where
    C: Catalog + ?Sized,
{
    let names = catalog
        .list(kind)
        .await
        .map_err(|source| ParamsError::Catalog { kind, source })?;

    if names.iter().any(|name| name == value) {
        Ok(value.to_string())
    } else {
        Err(ParamsError::NotInCatalog {
            kind,
            value: value.to_string(),
        })
    }
}

fn parse_number<T: FromStr>(value: &str, what: &'static str) -> Result<T, ParamsError> {
    value.parse().map_err(|_| ParamsError::InvalidValue(what))
}

fn parse_positive(value: &str, what: &'static str) -> Result<u32, ParamsError> {
    match parse_number::<u32>(value, what)? {
        0 => Err(ParamsError::InvalidValue(what)),
        n => Ok(n),
    }
}

fn parse_float<T>(value: &str, what: &'static str) -> Result<T, ParamsError>
where
    T: FromStr + Into<f64> + Copy,
{
    let parsed: T = parse_number(value, what)?;
    if parsed.into().is_finite() {
        Ok(parsed)
    } else {
        Err(ParamsError::InvalidValue(what))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::error::BackendError;
    use crate::job::UpscaleParams;

    struct FakeCatalog {
        lists: HashMap<CatalogKind, Vec<String>>,
        unreachable: bool,
    }

    impl FakeCatalog {
        fn new() -> Self {
            let mut lists = HashMap::new();
            lists.insert(
                CatalogKind::Models,
                vec!["dreamshaper_8".to_string(), "SDXL-base".to_string()],
            );
            lists.insert(
                CatalogKind::Samplers,
                vec!["Euler a".to_string(), "DPM++ 2M Karras".to_string()],
            );
            lists.insert(
                CatalogKind::Upscalers,
                vec!["LDSR".to_string(), "R-ESRGAN 4x+".to_string(), "ESRGAN_4x".to_string()],
            );
            Self {
                lists,
                unreachable: false,
            }
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn list(&self, kind: CatalogKind) -> Result<Vec<String>, BackendError> {
            if self.unreachable {
                return Err(BackendError::Request("connection refused".into()));
            }
            Ok(self.lists.get(&kind).cloned().unwrap_or_default())
        }
    }

    fn defaults() -> DefaultGenerationParameters {
        DefaultGenerationParameters {
            model: "dreamshaper_8".into(),
            sampler: "Euler a".into(),
            width: 512,
            height: 768,
            steps: 30,
            width_sdxl: 1024,
            height_sdxl: 1024,
            steps_sdxl: 25,
            cnt: 2,
            batch: 1,
            cfg_scale: 7.0,
        }
    }

    fn render_spec(text: &str) -> JobSpec {
        JobSpec::Render(RenderParams::new(text, &defaults()))
    }

    async fn parse(raw: &str) -> (Result<Option<usize>, ParamsError>, JobSpec) {
        let mut spec = render_spec(raw);
        let result = parse_params(&FakeCatalog::new(), &defaults(), raw, &mut spec).await;
        (result, spec)
    }

    fn render(spec: &JobSpec) -> &RenderParams {
        match spec {
            JobSpec::Render(render) => render,
            JobSpec::Upscale(_) => panic!("expected a render spec"),
        }
    }

    #[tokio::test]
    async fn explicit_values_are_applied() {
        let (result, spec) = parse("-s 42 -w 768 -h 512 -t 20").await;
        assert_eq!(result.unwrap(), Some(0));
        let r = render(&spec);
        assert_eq!(r.seed, 42);
        assert_eq!((r.width, r.height, r.steps), (768, 512, 20));
    }

    #[tokio::test]
    async fn first_flag_offset_points_past_prompt() {
        let raw = "a cat -seed 7";
        let (result, _) = parse(raw).await;
        assert_eq!(result.unwrap(), Some(6));
        assert_eq!(&raw[..6], "a cat ");
    }

    #[tokio::test]
    async fn no_flags_reports_none() {
        let (result, spec) = parse("just a prompt").await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(render(&spec).num_outputs, 2);
    }

    #[tokio::test]
    async fn flag_names_are_case_insensitive() {
        let (result, spec) = parse("x -SEED 5 -W 640").await;
        assert!(result.is_ok());
        assert_eq!(render(&spec).seed, 5);
        assert_eq!(render(&spec).width, 640);
    }

    #[tokio::test]
    async fn seed_glyph_is_stripped() {
        let (result, spec) = parse("x -s 🌱1234").await;
        assert!(result.is_ok());
        assert_eq!(render(&spec).seed, 1234);
    }

    #[tokio::test]
    async fn seed_must_fit_u32() {
        let (result, _) = parse("x -s 4294967296").await;
        assert_matches!(result, Err(ParamsError::InvalidValue("seed")));
    }

    #[tokio::test]
    async fn malformed_numbers_are_rejected() {
        assert_matches!(parse("x -w wide").await.0, Err(ParamsError::InvalidValue("width")));
        assert_matches!(parse("x -c high").await.0, Err(ParamsError::InvalidValue("CFG scale")));
        assert_matches!(parse("x -hr nan").await.0, Err(ParamsError::InvalidValue("hr scale")));
        assert_matches!(parse("x -t 0").await.0, Err(ParamsError::InvalidValue("steps")));
    }

    #[tokio::test]
    async fn missing_value_names_the_flag() {
        let (result, _) = parse("x -steps").await;
        let err = result.unwrap_err();
        assert_matches!(&err, ParamsError::MissingValue(flag) if flag == "steps");
        assert_eq!(err.to_string(), "steps is missing value");
    }

    #[tokio::test]
    async fn text_after_a_flag_is_an_error() {
        let (result, _) = parse("a cat -s 1 more words -w 512").await;
        assert_matches!(result, Err(ParamsError::ParamsAfterPrompt));
    }

    #[tokio::test]
    async fn unknown_flags_are_ignored_and_not_recognized() {
        let raw = "a cat -foo -s 3";
        let (result, spec) = parse(raw).await;
        assert_eq!(result.unwrap(), raw.find("-s"));
        assert_eq!(render(&spec).seed, 3);
    }

    #[tokio::test]
    async fn sampler_and_model_must_be_in_catalog() {
        let (result, spec) = parse("x -r \"DPM++ 2M Karras\" -m SDXL-base").await;
        assert!(result.is_ok());
        assert_eq!(render(&spec).sampler_name, "DPM++ 2M Karras");
        assert_eq!(render(&spec).model_name, "SDXL-base");

        let (result, _) = parse("x -sampler Heun").await;
        let err = result.unwrap_err();
        assert_matches!(&err, ParamsError::NotInCatalog { kind: CatalogKind::Samplers, .. });
        assert_eq!(err.to_string(), "invalid sampler: Heun");

        assert_matches!(
            parse("x -hru nope").await.0,
            Err(ParamsError::NotInCatalog { kind: CatalogKind::Upscalers, .. })
        );
    }

    #[tokio::test]
    async fn catalog_failure_is_propagated() {
        let mut catalog = FakeCatalog::new();
        catalog.unreachable = true;
        let mut spec = render_spec("x -m SDXL-base");
        let result = parse_params(&catalog, &defaults(), "x -m SDXL-base", &mut spec).await;
        assert_matches!(
            result,
            Err(ParamsError::Catalog {
                kind: CatalogKind::Models,
                source: BackendError::Request(_)
            })
        );
    }

    #[tokio::test]
    async fn standard_defaults_fill_unset_fields() {
        let (_, spec) = parse("x -s 1").await;
        let r = render(&spec);
        assert_eq!((r.width, r.height, r.steps), (512, 768, 30));
        assert_eq!((r.num_outputs, r.batch_size), (2, 1));
    }

    #[tokio::test]
    async fn sdxl_defaults_follow_model_name() {
        let (_, spec) = parse("x -m SDXL-base").await;
        let r = render(&spec);
        assert_eq!((r.width, r.height, r.steps), (1024, 1024, 25));
    }

    #[tokio::test]
    async fn explicit_steps_and_batch_survive_defaulting() {
        let (_, spec) = parse("x -m SDXL-base -t 12 -b 3 -w 640").await;
        let r = render(&spec);
        assert_eq!(r.steps, 12);
        assert_eq!(r.batch_size, 3);
        assert_eq!((r.width, r.height), (640, 1024));
    }

    #[tokio::test]
    async fn highres_clears_upscale_and_forces_single_output() {
        let (_, spec) = parse("x -u 2 -hr 1.5 -cnt 4").await;
        let r = render(&spec);
        assert_eq!(r.hr.scale, 1.5);
        assert_eq!(r.upscale.scale, 0.0);
        assert_eq!(r.num_outputs, 1);
    }

    #[tokio::test]
    async fn upscale_forces_single_output() {
        let (result, spec) = parse("portrait -model SDXL-base -cnt 3 -upscale 2").await;
        assert!(result.is_ok());
        let r = render(&spec);
        assert_eq!(r.num_outputs, 1);
        assert_eq!(r.upscale.scale, 2.0);
        assert_eq!(r.model_name, "SDXL-base");
    }

    #[tokio::test]
    async fn highres_settings_are_applied() {
        let (_, spec) = parse("x -hr 2 -hrd 0.55 -hru ESRGAN_4x -hrt 20").await;
        let r = render(&spec);
        assert_eq!(r.hr.denoising_strength, 0.55);
        assert_eq!(r.hr.upscaler, "ESRGAN_4x");
        assert_eq!(r.hr.second_pass_steps, 20);
    }

    #[tokio::test]
    async fn png_flag_sets_output_format() {
        let (result, spec) = parse("x -png").await;
        assert_eq!(result.unwrap(), Some(2));
        assert!(render(&spec).output_png);
    }

    #[tokio::test]
    async fn upscale_target_takes_only_its_flags() {
        let raw = "-u 2 -upscaler ESRGAN_4x -seed 5 -p";
        let mut spec = JobSpec::Upscale(UpscaleParams::new(raw));
        let result = parse_params(&FakeCatalog::new(), &defaults(), raw, &mut spec).await;
        assert_eq!(result.unwrap(), Some(0));
        assert_matches!(spec, JobSpec::Upscale(up) => {
            assert_eq!(up.scale, 2.0);
            assert_eq!(up.upscaler, "ESRGAN_4x");
            assert!(up.output_png);
        });
    }

    fn words(tokens: Vec<Token>) -> Vec<(String, usize)> {
        tokens.into_iter().map(|t| (t.text, t.at)).collect()
    }

    #[test]
    fn unbalanced_quotes_fall_back_to_whitespace() {
        assert_eq!(
            words(tokenize("a cat's  toy -s 1")),
            vec![
                ("a".to_string(), 0),
                ("cat's".to_string(), 2),
                ("toy".to_string(), 9),
                ("-s".to_string(), 13),
                ("1".to_string(), 16),
            ]
        );
    }

    #[test]
    fn quoted_words_keep_their_start_offsets() {
        assert_eq!(
            words(tokenize("x -r \"Euler a\" 'it''s' \\-s")),
            vec![
                ("x".to_string(), 0),
                ("-r".to_string(), 2),
                ("Euler a".to_string(), 5),
                ("its".to_string(), 15),
                ("-s".to_string(), 23),
            ]
        );
    }

    #[tokio::test]
    async fn flag_text_inside_quotes_is_not_the_cut_point() {
        let raw = "\"a -s b\" -s 3";
        let (result, spec) = parse(raw).await;
        assert_eq!(result.unwrap(), Some(9));
        assert_eq!(&raw[9..], "-s 3");
        assert_eq!(render(&spec).seed, 3);
    }

    #[tokio::test]
    async fn flag_inside_a_word_is_not_the_cut_point() {
        let raw = "re-s thing -s 1";
        let (result, spec) = parse(raw).await;
        assert_eq!(result.unwrap(), Some(11));
        assert_eq!(render(&spec).seed, 1);
    }
}
