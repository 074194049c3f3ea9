use std::path::PathBuf;

/// Env-driven node configuration, mirroring the `HAVEN_FILE_*` variable
/// convention the teacher's file-server binary uses
/// (`examples/morenodevai-haven/crates/haven-file-server/src/main.rs`),
/// renamed to the `SYNDRO_*` prefix.
pub struct NodeConfig {
    pub host: String,
    pub http_port: u16,
    pub udp_port: u16,
    pub device_name: String,
    pub download_root_override: Option<PathBuf>,
    pub checkpoint_dir: PathBuf,
    pub auto_accept_trusted: bool,
    pub ram_class_mb_override: Option<u64>,
}

impl NodeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("SYNDRO_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let http_port: u16 = std::env::var("SYNDRO_HTTP_PORT")
            .unwrap_or_else(|_| "8765".to_string())
            .parse()?;
        let udp_port: u16 = std::env::var("SYNDRO_UDP_PORT")
            .unwrap_or_else(|_| syndro_discovery::beacon::BASE_UDP_PORT.to_string())
            .parse()?;
        let device_name = std::env::var("SYNDRO_DEVICE_NAME").unwrap_or_else(|_| default_device_name());
        let download_root_override = std::env::var("SYNDRO_DOWNLOAD_ROOT").ok().map(PathBuf::from);
        let checkpoint_dir = std::env::var("SYNDRO_CHECKPOINT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_app_docs_dir().join("checkpoints"));
        let auto_accept_trusted = std::env::var("SYNDRO_AUTO_ACCEPT_TRUSTED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let ram_class_mb_override = std::env::var("SYNDRO_RAM_CLASS_MB").ok().and_then(|v| v.parse().ok());

        Ok(Self {
            host,
            http_port,
            udp_port,
            device_name,
            download_root_override,
            checkpoint_dir,
            auto_accept_trusted,
            ram_class_mb_override,
        })
    }
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "syndro-node".to_string())
}

fn default_app_docs_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".syndro")
}
