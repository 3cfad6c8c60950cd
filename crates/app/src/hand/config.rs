use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

/// Fixed service parameters. The service is deliberately not configurable
/// beyond the capture source and detector script location; resolution,
/// thresholds, and the listen port are constants.
pub(crate) const BIND_ADDR: (&str, u16) = ("0.0.0.0", 5050);
pub(crate) const FRAME_WIDTH: i32 = 640;
pub(crate) const FRAME_HEIGHT: i32 = 480;
pub(crate) const PACING_MS: u64 = 10;
/// Only one physical camera exists; a single hand keeps the summary shape
/// fixed.
pub(crate) const MAX_HANDS: usize = 1;
pub(crate) const MIN_DETECTION_CONFIDENCE: f32 = 0.3;
pub(crate) const MIN_TRACKING_CONFIDENCE: f32 = 0.3;

const USAGE: &str = "Usage: handcam [--source <uri>] [--script <path>] \
[--python <path>] [--jpeg-quality <1-100>] [--verbose]\n\nPositional form is \
also supported: handcam <camera-uri>";

#[derive(Clone, Debug)]
pub struct HandConfig {
    pub camera_uri: String,
    pub script_path: PathBuf,
    pub python: Option<PathBuf>,
    pub jpeg_quality: i32,
    pub verbose: bool,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            camera_uri: "0".to_string(),
            script_path: PathBuf::from("scripts/hand_detect.py"),
            python: None,
            jpeg_quality: 85,
            verbose: false,
        }
    }
}

impl HandConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 0;
        while idx < args.len() {
            match args[idx].as_str() {
                "--help" | "-h" => bail!(USAGE),
                "--source" => {
                    idx += 1;
                    config.camera_uri = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--source requires a value"))?
                        .clone();
                    idx += 1;
                }
                "--script" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--script requires a value"))?;
                    config.script_path = PathBuf::from(value);
                    idx += 1;
                }
                "--python" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--python requires a value"))?;
                    config.python = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--jpeg-quality" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--jpeg-quality requires a value"))?
                        .parse::<i32>()
                        .with_context(|| {
                            "--jpeg-quality must be an integer between 1 and 100".to_string()
                        })?;
                    if !(1..=100).contains(&value) {
                        bail!("--jpeg-quality must be an integer between 1 and 100");
                    }
                    config.jpeg_quality = value;
                    idx += 1;
                }
                "--verbose" => {
                    config.verbose = true;
                    idx += 1;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}\n\n{USAGE}");
                }
                other => {
                    positional.push(other.to_string());
                    idx += 1;
                }
            }
        }

        let mut positional = positional.into_iter();
        if let Some(uri) = positional.next() {
            config.camera_uri = uri;
        }
        if let Some(extra) = positional.next() {
            bail!("Unexpected argument: {extra}\n\n{USAGE}");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_without_args() {
        let config = HandConfig::from_args(&[]).unwrap();
        assert_eq!(config.camera_uri, "0");
        assert_eq!(config.jpeg_quality, 85);
        assert!(!config.verbose);
    }

    #[test]
    fn parses_flags() {
        let config = HandConfig::from_args(&args(&[
            "--source",
            "/dev/video2",
            "--jpeg-quality",
            "70",
            "--verbose",
        ]))
        .unwrap();
        assert_eq!(config.camera_uri, "/dev/video2");
        assert_eq!(config.jpeg_quality, 70);
        assert!(config.verbose);
    }

    #[test]
    fn accepts_positional_source() {
        let config = HandConfig::from_args(&args(&["1"])).unwrap();
        assert_eq!(config.camera_uri, "1");
    }

    #[test]
    fn rejects_out_of_range_quality() {
        assert!(HandConfig::from_args(&args(&["--jpeg-quality", "0"])).is_err());
        assert!(HandConfig::from_args(&args(&["--jpeg-quality", "101"])).is_err());
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(HandConfig::from_args(&args(&["--cameras", "2"])).is_err());
    }
}
