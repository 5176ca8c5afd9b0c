use anyhow::{Context, Result, anyhow};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::upload::{DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MAX_VIDEO_BYTES, UploadLimits};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/anistream-env";
pub const DEFAULT_ANISTREAM_PORT: u16 = 3000;
pub const DEFAULT_ANISTREAM_HOST: &str = "127.0.0.1";
/// Environment variable that overrides the configured port.
pub const PORT_ENV_VAR: &str = "ANISTREAM_PORT";

/// Values read from the env file. Everything is optional at this stage.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub upload_root: Option<PathBuf>,
    pub anistream_port: Option<u16>,
    pub anistream_host: Option<String>,
    pub max_image_bytes: Option<u64>,
    pub max_video_bytes: Option<u64>,
    pub public_base_url: Option<String>,
}

/// Fully resolved settings for the backend.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub upload_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub limits: UploadLimits,
    /// Prefix for returned upload URLs; empty means site-relative.
    pub public_base_url: String,
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let cfg =
        parse_env_config(&content).with_context(|| format!("Parsing {}", path.display()))?;
    Ok(Some(cfg))
}

fn parse_env_config(content: &str) -> Result<EnvConfig> {
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value_raw)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value_raw.trim().trim_matches('"');
        match key.trim() {
            "UPLOAD_ROOT" => cfg.upload_root = Some(PathBuf::from(value)),
            "ANISTREAM_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("ANISTREAM_PORT={value} is not a port"))?;
                cfg.anistream_port = Some(port);
            }
            "ANISTREAM_HOST" => {
                if !value.is_empty() {
                    cfg.anistream_host = Some(value.to_string());
                }
            }
            "MAX_IMAGE_BYTES" => {
                cfg.max_image_bytes = Some(
                    value
                        .parse()
                        .with_context(|| format!("MAX_IMAGE_BYTES={value} is not a byte count"))?,
                );
            }
            "MAX_VIDEO_BYTES" => {
                cfg.max_video_bytes = Some(
                    value
                        .parse()
                        .with_context(|| format!("MAX_VIDEO_BYTES={value} is not a byte count"))?,
                );
            }
            "PUBLIC_BASE_URL" => cfg.public_base_url = Some(value.to_string()),
            _ => {}
        }
    }
    Ok(cfg)
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    load_runtime_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_runtime_config_from(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let path = path.as_ref();
    let cfg = read_env_config(path)?
        .ok_or_else(|| anyhow!("Missing config file at {}", path.display()))?;
    resolve(cfg, std::env::var(PORT_ENV_VAR).ok().as_deref())
        .with_context(|| format!("Loading {}", path.display()))
}

fn resolve(cfg: EnvConfig, port_override: Option<&str>) -> Result<RuntimeConfig> {
    let upload_root = cfg
        .upload_root
        .ok_or_else(|| anyhow!("UPLOAD_ROOT not set"))?;
    let port = match port_override {
        Some(value) => value
            .parse::<u16>()
            .with_context(|| format!("{PORT_ENV_VAR}={value} is not a port"))?,
        None => cfg.anistream_port.unwrap_or(DEFAULT_ANISTREAM_PORT),
    };
    let host = cfg
        .anistream_host
        .unwrap_or_else(|| DEFAULT_ANISTREAM_HOST.to_string());
    let limits = UploadLimits {
        max_image_bytes: cfg.max_image_bytes.unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
        max_video_bytes: cfg.max_video_bytes.unwrap_or(DEFAULT_MAX_VIDEO_BYTES),
    };
    Ok(RuntimeConfig {
        upload_root,
        port,
        host,
        limits,
        public_base_url: cfg.public_base_url.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn read_env_config_extracts_values() {
        let cfg = make_config(
            "# comment\nUPLOAD_ROOT=\"/srv/media\"\nANISTREAM_PORT=\"4242\"\nMAX_VIDEO_BYTES=1024\n",
        );
        let parsed = read_env_config(cfg.path()).unwrap().unwrap();
        assert_eq!(parsed.anistream_port, Some(4242));
        assert_eq!(parsed.upload_root, Some(PathBuf::from("/srv/media")));
        assert_eq!(parsed.max_video_bytes, Some(1024));
    }

    #[test]
    fn missing_file_reads_as_none() {
        assert!(read_env_config(Path::new("/definitely/not/here")).unwrap().is_none());
    }

    #[test]
    fn bad_port_is_an_error() {
        let cfg = make_config("UPLOAD_ROOT=/m\nANISTREAM_PORT=http\n");
        assert!(read_env_config(cfg.path()).is_err());
    }

    #[test]
    fn resolve_applies_defaults() {
        let cfg = parse_env_config("UPLOAD_ROOT=\"/m\"\n").unwrap();
        let runtime = resolve(cfg, None).unwrap();
        assert_eq!(runtime.upload_root, PathBuf::from("/m"));
        assert_eq!(runtime.port, DEFAULT_ANISTREAM_PORT);
        assert_eq!(runtime.host, DEFAULT_ANISTREAM_HOST);
        assert_eq!(runtime.limits, UploadLimits::default());
        assert_eq!(runtime.public_base_url, "");
    }

    #[test]
    fn port_override_wins() {
        let cfg = parse_env_config("UPLOAD_ROOT=/m\nANISTREAM_PORT=4000\nANISTREAM_HOST=0.0.0.0\n")
            .unwrap();
        let runtime = resolve(cfg, Some("5000")).unwrap();
        assert_eq!(runtime.port, 5000);
        assert_eq!(runtime.host, "0.0.0.0");
    }

    #[test]
    fn upload_root_is_required() {
        let cfg = parse_env_config("ANISTREAM_PORT=4000\n").unwrap();
        assert!(resolve(cfg, None).is_err());
    }
}
