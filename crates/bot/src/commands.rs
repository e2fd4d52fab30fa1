//! Chat command parsing and the replies of the informational commands.

use sdbot_core::backend::{Catalog, CatalogKind};
use sdbot_core::defaults::DefaultGenerationParameters;
use sdbot_core::error::BackendError;
use sdbot_core::reply::escape_html;

pub const WELCOME_TEXT: &str =
    "🤖 Welcome! This is a Telegram Bot frontend for rendering images with Stable Diffusion.";

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("error getting {kind}: {source}")]
    Catalog {
        kind: CatalogKind,
        #[source]
        source: BackendError,
    },

    #[error("error running nvidia-smi: {0}")]
    Smi(#[from] std::io::Error),

    #[error("error running nvidia-smi: {0}")]
    SmiStatus(std::process::ExitStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Sd,
    Upscale,
    Cancel,
    List(CatalogKind),
    Smi,
    Help,
    Start,
    Unknown(String),
}

impl Command {
    fn from_name(name: &str) -> Self {
        match name {
            "sd" => Self::Sd,
            "upscale" => Self::Upscale,
            "cancel" => Self::Cancel,
            "models" => Self::List(CatalogKind::Models),
            "samplers" => Self::List(CatalogKind::Samplers),
            "embeddings" => Self::List(CatalogKind::Embeddings),
            "loras" => Self::List(CatalogKind::Loras),
            "upscalers" => Self::List(CatalogKind::Upscalers),
            "vaes" => Self::List(CatalogKind::Vaes),
            "smi" => Self::Smi,
            "help" => Self::Help,
            "start" => Self::Start,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A command found at the start of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub command: Command,
    /// `/` or `!`, whichever the user typed.
    pub cmd_char: char,
    /// Bot name after `@`, if the command was addressed.
    pub addressee: Option<&'a str>,
    /// Text after the command word.
    pub args: &'a str,
}

impl ParsedCommand<'_> {
    /// Unaddressed commands are for every bot in the chat.
    pub fn is_for(&self, bot_username: &str) -> bool {
        self.addressee
            .map_or(true, |name| name.eq_ignore_ascii_case(bot_username))
    }
}

/// Split `text` into a command and its arguments. Returns `None` when the
/// text does not start with `/` or `!`.
pub fn parse_command(text: &str) -> Option<ParsedCommand<'_>> {
    let cmd_char = text.chars().next().filter(|c| matches!(c, '/' | '!'))?;

    let body = &text[cmd_char.len_utf8()..];
    let (word, rest) = match body.find(char::is_whitespace) {
        Some(at) => body.split_at(at),
        None => (body, ""),
    };
    let args = rest.strip_prefix(char::is_whitespace).unwrap_or(rest);
    let (name, addressee) = match word.split_once('@') {
        Some((name, bot)) => (name, Some(bot)),
        None => (word, None),
    };

    Some(ParsedCommand {
        command: Command::from_name(&name.to_lowercase()),
        cmd_char,
        addressee,
        args,
    })
}

/// HTML listing of a backend catalog. Configured defaults are highlighted.
pub async fn catalog_listing<C>(
    catalog: &C,
    defaults: &DefaultGenerationParameters,
    kind: CatalogKind,
) -> Result<String, CommandError>
where
    C: Catalog + ?Sized,
{
    let names = catalog
        .list(kind)
        .await
        .map_err(|source| CommandError::Catalog { kind, source })?;

    let default = match kind {
        CatalogKind::Models => defaults.model.as_str(),
        CatalogKind::Samplers => defaults.sampler.as_str(),
        _ => "",
    };
    Ok(format_listing(kind, &names, default))
}

fn format_listing(kind: CatalogKind, names: &[String], default: &str) -> String {
    let label = listing_label(kind);
    if names.is_empty() {
        return format!("No available {label}.");
    }

    let lines: Vec<String> = names
        .iter()
        .map(|name| {
            if !default.is_empty() && name == default {
                format!("- <b>{}</b> (default)", escape_html(name))
            } else {
                format!("- <code>{}</code>", escape_html(name))
            }
        })
        .collect();
    format!(
        "{} Available {label}:\n{}",
        listing_icon(kind),
        lines.join("\n")
    )
}

fn listing_label(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Loras => "LoRAs",
        CatalogKind::Vaes => "VAEs",
        other => other.as_str(),
    }
}

fn listing_icon(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Models => "🧩",
        CatalogKind::Samplers => "🔭",
        CatalogKind::Upscalers => "🔎",
        CatalogKind::Embeddings | CatalogKind::Loras | CatalogKind::Vaes => "📚",
    }
}

/// Output of `nvidia-smi`, preformatted.
pub async fn smi_output() -> Result<String, CommandError> {
    let output = tokio::process::Command::new("nvidia-smi")
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(CommandError::SmiStatus(output.status));
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(format!("<pre>{}</pre>", escape_html(&text)))
}

pub fn help_text(cmd_char: char) -> String {
    let c = cmd_char;
    format!(
        "🤖 Stable Diffusion Telegram Bot\n\n\
         Available commands:\n\n\
         {c}sd [prompt] - render prompt (negative prompt can be put on the next line)\n\
         {c}upscale - upscale image\n\
         {c}cancel - cancel ongoing request\n\
         {c}models - list available models\n\
         {c}samplers - list available samplers\n\
         {c}embeddings - list available embeddings\n\
         {c}loras - list available LoRAs\n\
         {c}upscalers - list available upscalers\n\
         {c}vaes - list available VAEs\n\
         {c}smi - get the output of nvidia-smi\n\
         {c}help - show this help\n\n\
         Available render parameters at the end of the prompt:\n\n\
         -seed/s - set seed\n\
         -width/w - set output image width\n\
         -height/h - set output image height\n\
         -steps/t - set the number of steps\n\
         -cnt/o - set count of output images\n\
         -batch/b - set batch size of output images\n\
         -png/p - upload PNGs instead of JPEGs\n\
         -cfg/c - set CFG scale\n\
         -sampler/r - set sampler, get valid values with {c}samplers\n\
         -model/m - set model, get valid values with {c}models\n\
         -upscale/u - upscale output image with ratio\n\
         -upscaler - set upscaler method, get valid values with {c}upscalers\n\
         -hr - enable highres mode and set upscale ratio\n\
         -hr-denoisestrength/hrd - set highres mode denoise strength\n\
         -hr-upscaler/hru - set highres mode upscaler, get valid values with {c}upscalers\n\
         -hr-steps/hrt - set the number of highres mode second pass steps\n\n\
         Available upscale parameters:\n\n\
         -upscale/u - upscale output image with ratio\n\
         -upscaler - set upscaler method, get valid values with {c}upscalers\n\
         -png/p - upload PNGs instead of JPEGs\n\n\
         To upscale, send an image with {c}upscale in its caption, or send \
         {c}upscale first and the image after it."
    )
}
