use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use camino::Utf8Path;
use url::Url;

use crate::error::HarvestError;

pub trait Transfer: Send + Sync {
    /// Fetches the single remote file `file_name` under the endpoint path
    /// into `dest_dir`.
    fn fetch(&self, endpoint: &Url, file_name: &str, dest_dir: &Utf8Path)
    -> Result<(), HarvestError>;

    /// Mirrors the remote folder `folder_name` under the endpoint path into
    /// `dest_root/folder_name`, preserving the remote tree.
    fn mirror(
        &self,
        endpoint: &Url,
        folder_name: &str,
        dest_root: &Utf8Path,
    ) -> Result<(), HarvestError>;
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub timeout: Duration,
    pub mirror_segments: u8,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            mirror_segments: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LftpTransfer {
    program: PathBuf,
    options: TransferOptions,
}

impl LftpTransfer {
    pub fn new(options: TransferOptions) -> Result<Self, HarvestError> {
        let program =
            find_in_path("lftp").ok_or_else(|| HarvestError::MissingTool("lftp".to_string()))?;
        Ok(Self { program, options })
    }

    pub fn with_program(program: PathBuf, options: TransferOptions) -> Self {
        Self { program, options }
    }

    fn settings(&self) -> String {
        format!(
            "set ssl:check-hostname no; set net:timeout {}; set net:max-retries 1;",
            self.options.timeout.as_secs()
        )
    }

    fn fetch_script(&self, endpoint: &Url, file_name: &str) -> String {
        format!(
            "{} open {}://{}; get {}/{}; bye",
            self.settings(),
            endpoint.scheme(),
            endpoint.authority(),
            endpoint.path().trim_end_matches('/'),
            file_name
        )
    }

    fn mirror_script(&self, endpoint: &Url, folder_name: &str) -> String {
        format!(
            "{} open {}://{}; mirror --use-pget-n={} {}/{} {}; bye",
            self.settings(),
            endpoint.scheme(),
            endpoint.authority(),
            self.options.mirror_segments,
            endpoint.path().trim_end_matches('/'),
            folder_name,
            folder_name
        )
    }

    fn run_script(
        &self,
        script: &str,
        cwd: &Utf8Path,
        operation: String,
    ) -> Result<(), HarvestError> {
        let output = Command::new(&self.program)
            .arg("-e")
            .arg(script)
            .current_dir(cwd.as_std_path())
            .output()
            .map_err(|err| HarvestError::Transfer {
                operation: operation.clone(),
                detail: err.to_string(),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            format!("lftp exited with {}", output.status)
        } else {
            stderr
        };
        Err(HarvestError::Transfer { operation, detail })
    }
}

impl Transfer for LftpTransfer {
    fn fetch(
        &self,
        endpoint: &Url,
        file_name: &str,
        dest_dir: &Utf8Path,
    ) -> Result<(), HarvestError> {
        fs::create_dir_all(dest_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let script = self.fetch_script(endpoint, file_name);
        self.run_script(&script, dest_dir, format!("fetch {file_name}"))
    }

    fn mirror(
        &self,
        endpoint: &Url,
        folder_name: &str,
        dest_root: &Utf8Path,
    ) -> Result<(), HarvestError> {
        fs::create_dir_all(dest_root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let script = self.mirror_script(endpoint, folder_name);
        self.run_script(&script, dest_root, format!("mirror {folder_name}"))
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        #[cfg(windows)]
        {
            let exe = path.join(format!("{name}.exe"));
            if exe.exists() {
                return Some(exe);
            }
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
