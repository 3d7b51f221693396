use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Each level silences one more tier of log output.
    pub quiet: u8,
    pub no_color: bool,
    /// Skips reverse lookups of discovered addresses.
    ///
    /// Forward resolution of the targets themselves still happens.
    pub no_dns: bool,
    pub output: OutputFormat,
    /// Upper bound on targets probed at once, `None` picks a default.
    pub concurrency: Option<usize>,
}

impl Config {
    pub fn is_json(&self) -> bool {
        self.output == OutputFormat::Json
    }
}
