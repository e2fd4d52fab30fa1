use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use sdbot_core::defaults::DefaultGenerationParameters;
use sdbot_queue::QueueConfig;

use crate::access::AccessPolicy;

/// Bot configuration from command-line flags, falling back to environment
/// variables (a `.env` file is loaded first).
///
/// | Env Var                   | Default                 |
/// |---------------------------|-------------------------|
/// | `BOT_TOKEN`               | required                |
/// | `STABLE_DIFFUSION_API`    | `http://localhost:7860` |
/// | `ALLOWED_USERIDS`         | empty                   |
/// | `ADMIN_USERIDS`           | empty                   |
/// | `ALLOWED_GROUPIDS`        | empty                   |
/// | `DEFAULT_MODEL`           | empty (web UI default)  |
/// | `DEFAULT_SAMPLER`         | empty (web UI default)  |
/// | `DEFAULT_CNT`             | `2`                     |
/// | `DEFAULT_BATCH`           | `1`                     |
/// | `DEFAULT_STEPS`           | `30`                    |
/// | `DEFAULT_WIDTH`           | `512`                   |
/// | `DEFAULT_HEIGHT`          | `512`                   |
/// | `DEFAULT_WIDTH_SDXL`      | `512`                   |
/// | `DEFAULT_HEIGHT_SDXL`     | `512`                   |
/// | `DEFAULT_STEPS_SDXL`      | `25`                    |
/// | `DEFAULT_CFG_SCALE`       | `7.0`                   |
/// | `IMAGE_WAIT_TIMEOUT_SECS` | `300`                   |
/// | `PROGRESS_POLL_MS`        | `1000`                  |
#[derive(Debug, Clone, Parser)]
#[command(name = "sdbot", version, about = "Telegram front end for Stable Diffusion")]
pub struct BotConfig {
    /// Telegram bot token.
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Address of the AUTOMATIC1111 web UI API.
    #[arg(long, env = "STABLE_DIFFUSION_API", default_value = "http://localhost:7860")]
    pub sd_api: String,

    /// Comma-separated user ids allowed to use the bot in private chats.
    #[arg(long, env = "ALLOWED_USERIDS")]
    pub allowed_user_ids: Option<IdList>,

    /// Comma-separated admin user ids; admins are always allowed.
    #[arg(long, env = "ADMIN_USERIDS")]
    pub admin_user_ids: Option<IdList>,

    /// Comma-separated group chat ids the bot answers in.
    #[arg(long, env = "ALLOWED_GROUPIDS")]
    pub allowed_group_ids: Option<IdList>,

    #[arg(long, env = "DEFAULT_MODEL", default_value = "")]
    pub default_model: String,

    #[arg(long, env = "DEFAULT_SAMPLER", default_value = "")]
    pub default_sampler: String,

    /// Default number of backend iterations per render.
    #[arg(long, env = "DEFAULT_CNT", default_value_t = 2, value_parser = positive)]
    pub default_cnt: u32,

    #[arg(long, env = "DEFAULT_BATCH", default_value_t = 1, value_parser = positive)]
    pub default_batch: u32,

    #[arg(long, env = "DEFAULT_STEPS", default_value_t = 30, value_parser = positive)]
    pub default_steps: u32,

    #[arg(long, env = "DEFAULT_WIDTH", default_value_t = 512, value_parser = positive)]
    pub default_width: u32,

    #[arg(long, env = "DEFAULT_HEIGHT", default_value_t = 512, value_parser = positive)]
    pub default_height: u32,

    #[arg(long, env = "DEFAULT_WIDTH_SDXL", default_value_t = 512, value_parser = positive)]
    pub default_width_sdxl: u32,

    #[arg(long, env = "DEFAULT_HEIGHT_SDXL", default_value_t = 512, value_parser = positive)]
    pub default_height_sdxl: u32,

    #[arg(long, env = "DEFAULT_STEPS_SDXL", default_value_t = 25, value_parser = positive)]
    pub default_steps_sdxl: u32,

    #[arg(long, env = "DEFAULT_CFG_SCALE", default_value_t = 7.0)]
    pub default_cfg_scale: f64,

    /// Seconds an upscale request waits for its image.
    #[arg(long, env = "IMAGE_WAIT_TIMEOUT_SECS", default_value_t = 300)]
    pub image_wait_timeout_secs: u64,

    /// Interval between backend progress polls, in milliseconds.
    #[arg(long, env = "PROGRESS_POLL_MS", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub progress_poll_ms: u64,
}

impl BotConfig {
    pub fn generation_defaults(&self) -> DefaultGenerationParameters {
        DefaultGenerationParameters {
            model: self.default_model.clone(),
            sampler: self.default_sampler.clone(),
            width: self.default_width,
            height: self.default_height,
            steps: self.default_steps,
            width_sdxl: self.default_width_sdxl,
            height_sdxl: self.default_height_sdxl,
            steps_sdxl: self.default_steps_sdxl,
            cnt: self.default_cnt,
            batch: self.default_batch,
            cfg_scale: self.default_cfg_scale,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            poll_interval: Duration::from_millis(self.progress_poll_ms),
            image_wait_timeout: Duration::from_secs(self.image_wait_timeout_secs),
        }
    }

    pub fn access_policy(&self) -> AccessPolicy {
        let ids = |list: &Option<IdList>| list.as_ref().map(|l| l.0.clone()).unwrap_or_default();
        AccessPolicy::new(
            ids(&self.allowed_user_ids),
            ids(&self.admin_user_ids),
            ids(&self.allowed_group_ids),
        )
    }
}

/// Comma-separated list of chat or user ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdList(pub Vec<i64>);

impl FromStr for IdList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| id.parse().map_err(|_| format!("invalid id: {id}")))
            .collect::<Result<Vec<_>, _>>()
            .map(IdList)
    }
}

fn positive(s: &str) -> Result<u32, String> {
    match s.trim().parse::<u32>() {
        Ok(0) => Err("must be greater than zero".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
