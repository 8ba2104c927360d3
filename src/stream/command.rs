//! Producer command line construction.

use super::StreamConfig;
use std::collections::BTreeSet;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Flags the producer build advertises in its `--help` output.
///
/// An empty set means the help text could not be read; in that case every option is
/// passed except the ones that are known to be build-dependent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedFlags {
    flags: BTreeSet<String>,
}

impl SupportedFlags {
    /// Runs `<program> --help` once and collects its `--flag` tokens.
    pub fn query(program: &str, timeout: Duration) -> Self {
        let child = Command::new(program)
            .arg("--help")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let Ok(mut child) = child else {
            tracing::debug!(program, "Could not launch producer for --help");
            return Self::default();
        };

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::debug!(program, "Producer --help timed out");
                    return Self::default();
                }
            }
        }

        match child.wait_with_output() {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push('\n');
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                let supported = Self::from_help_text(&text);
                tracing::debug!(program, flags = supported.len(), "Read producer options");
                supported
            }
            Err(_) => Self::default(),
        }
    }

    /// Extracts `--flag` tokens from help text.
    pub fn from_help_text(text: &str) -> Self {
        let flags = text
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .filter_map(|token| {
                let name = token.strip_prefix("--")?;
                let valid = !name.is_empty() && !name.starts_with('-');
                valid.then(|| format!("--{}", name.trim_end_matches('-')))
            })
            .collect();
        Self { flags }
    }

    pub fn from_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Whether an optional flag should be emitted.
    fn allows(&self, flag: &str) -> bool {
        self.is_empty() || self.contains(flag)
    }
}

/// Builds the producer argument vector, program first.
pub fn build_command(config: &StreamConfig, supported: &SupportedFlags) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        config.program.clone(),
        "--nopreview".into(),
        "-t".into(),
        "0".into(),
        "--width".into(),
        config.width.to_string(),
        "--height".into(),
        config.height.to_string(),
        "--framerate".into(),
        config.framerate.to_string(),
        "--codec".into(),
        "mjpeg".into(),
        "--quality".into(),
        config.quality.to_string(),
        // Without frame-wise flushing stdout can stay empty for seconds.
        "--flush".into(),
        "1".into(),
        "-o".into(),
        "-".into(),
    ];

    let mut push = |flag: &str, value: String| {
        if supported.allows(flag) {
            cmd.push(flag.to_string());
            cmd.push(value);
        } else {
            tracing::debug!(flag, "Producer does not support option, omitted");
        }
    };

    let extra = &config.extra;
    if !extra.ae {
        if let Some(shutter) = config.shutter_us.filter(|&s| s > 0) {
            push("--shutter", shutter.to_string());
        }
        if let Some(gain) = config.gain {
            push("--gain", gain.to_string());
        }
    }

    if !extra.awb {
        // "off" is rejected by the producer; fixed gains need "custom".
        push("--awb", "custom".to_string());
        let (red, blue) = extra.awbgains;
        push("--awbgains", format!("{red},{blue}"));
    }

    if let Some(denoise) = extra.denoise.as_ref().filter(|d| !d.is_empty()) {
        push("--denoise", denoise.clone());
    }
    if let Some(sharpness) = extra.sharpness {
        push("--sharpness", sharpness.to_string());
    }
    if let Some(contrast) = extra.contrast {
        push("--contrast", contrast.to_string());
    }
    if let Some(saturation) = extra.saturation {
        push("--saturation", saturation.to_string());
    }
    for (key, value) in &extra.custom {
        push(&format!("--{}", key.trim_start_matches('-')), value.clone());
    }

    // Build-dependent: only ever passed when `--help` lists it.
    if let Some(flicker) = extra.flicker.as_ref().filter(|f| !f.is_empty()) {
        if supported.contains("--flicker") {
            cmd.push("--flicker".into());
            cmd.push(flicker.clone());
        }
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ExtraOptions;

    fn args(cmd: &[String]) -> String {
        cmd.join(" ")
    }

    #[test]
    fn test_base_command_layout() {
        let config = StreamConfig::default();
        let cmd = build_command(&config, &SupportedFlags::default());

        assert_eq!(cmd[0], "libcamera-vid");
        let line = args(&cmd);
        assert!(line.contains("--width 640 --height 480 --framerate 15"));
        assert!(line.contains("--codec mjpeg --quality 85 --flush 1 -o -"));
        assert!(line.contains("--awb custom --awbgains 2,1.5"));
    }

    #[test]
    fn test_fixed_exposure_unless_auto() {
        let mut config = StreamConfig {
            shutter_us: Some(8000),
            gain: Some(1.5),
            ..Default::default()
        };
        let line = args(&build_command(&config, &SupportedFlags::default()));
        assert!(line.contains("--shutter 8000"));
        assert!(line.contains("--gain 1.5"));

        config.extra.ae = true;
        let line = args(&build_command(&config, &SupportedFlags::default()));
        assert!(!line.contains("--shutter"));
        assert!(!line.contains("--gain"));
    }

    #[test]
    fn test_unsupported_options_omitted() {
        let config = StreamConfig {
            gain: Some(2.0),
            extra: ExtraOptions {
                denoise: Some("cdn_off".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let supported = SupportedFlags::from_flags(["--gain", "--awb", "--awbgains"]);

        let line = args(&build_command(&config, &supported));
        assert!(line.contains("--gain 2"));
        assert!(!line.contains("--denoise"));
    }

    #[test]
    fn test_flicker_requires_listed_flag() {
        let config = StreamConfig {
            extra: ExtraOptions {
                flicker: Some("50hz".into()),
                ..Default::default()
            },
            ..Default::default()
        };

        let line = args(&build_command(&config, &SupportedFlags::default()));
        assert!(!line.contains("--flicker"));

        let supported = SupportedFlags::from_flags(["--flicker", "--awb", "--awbgains"]);
        let line = args(&build_command(&config, &supported));
        assert!(line.contains("--flicker 50hz"));
    }

    #[test]
    fn test_help_text_parsing() {
        let help = "Usage:\n  --width arg   Set width\n  --flicker-period, --awbgains=arg\n -t";
        let supported = SupportedFlags::from_help_text(help);

        assert!(supported.contains("--width"));
        assert!(supported.contains("--flicker-period"));
        assert!(supported.contains("--awbgains"));
        assert!(!supported.contains("-t"));
    }
}
