use clap::Parser;
use linetap_core::conf::{IntervalSetting, SettingsFile, SizeSetting};
use linetap_core::logging::LogFormat;
use linetap_core::writer::CompressMode;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "linetap",
    version,
    about = "Capture a line stream into rotating files, with metrics and live tailing over HTTP"
)]
pub struct Cli {
    /// Command whose stdout is captured; stdin is read when omitted
    #[arg(short = 'c', long = "cmd")]
    pub cmd: Option<String>,

    /// Output directory [default: .]
    #[arg(short = 'o', long)]
    pub out_dir: Option<PathBuf>,

    /// File name prefix [default: capture]
    #[arg(short = 'n', long)]
    pub prefix: Option<String>,

    /// Rotate once the active file reaches this size (e.g. 25M, 1.5G)
    #[arg(short = 's', long)]
    pub max_bytes: Option<String>,

    /// Rotate after this long (e.g. 90, 10s, 5m, 2h, 1d)
    #[arg(short = 't', long)]
    pub interval: Option<String>,

    /// Compression: none, inline or after [default: none]
    #[arg(short = 'z', long, value_parser = str::parse::<CompressMode>)]
    pub compress: Option<CompressMode>,

    /// Rotated files to keep per prefix [default: 10]
    #[arg(short = 'r', long)]
    pub retain: Option<usize>,

    /// Extra environment for the command, KEY=VALUE (repeatable)
    #[arg(short = 'v', long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Working directory for the command
    #[arg(short = 'w', long)]
    pub cwd: Option<PathBuf>,

    /// Also copy every captured line to stdout
    #[arg(short = 'e', long)]
    pub echo: bool,

    /// Prefix every line with a local timestamp
    #[arg(short = 'T', long)]
    pub timestamp: bool,

    /// Write an idle marker after this many seconds without input (0 disables)
    #[arg(short = 'I', long)]
    pub idle_alert: Option<f64>,

    /// Serve metrics, streaming and control over HTTP
    #[arg(short = 'm', long)]
    pub metrics: bool,

    /// HTTP bind address; `:0` or `0` picks a free port [default: 0.0.0.0:9108]
    #[arg(short = 'M', long)]
    pub metrics_bind: Option<String>,

    /// Lines replayed to a new stream subscriber [default: 25]
    #[arg(short = 'R', long)]
    pub ring_size: Option<usize>,

    /// TOML settings file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Diagnostic log format on stderr: json or pretty
    #[arg(long, value_parser = str::parse::<LogFormat>)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// The command line as a settings layer. Unset flags stay `None` so a
    /// settings file underneath can supply them.
    pub fn settings_layer(&self) -> SettingsFile {
        SettingsFile {
            cmd: self.cmd.clone(),
            env: (!self.env.is_empty())
                .then(|| self.env.iter().cloned().collect::<BTreeMap<_, _>>()),
            cwd: self.cwd.clone(),
            out_dir: self.out_dir.clone(),
            prefix: self.prefix.clone(),
            max_bytes: self.max_bytes.clone().map(SizeSetting::Text),
            interval: self.interval.clone().map(IntervalSetting::Text),
            compress: self.compress,
            retain: self.retain,
            echo: self.echo.then_some(true),
            timestamp: self.timestamp.then_some(true),
            idle_alert: self.idle_alert,
            metrics: (self.metrics || self.metrics_bind.is_some()).then_some(true),
            metrics_bind: self.metrics_bind.clone(),
            ring_size: self.ring_size,
        }
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}
