use std::{fs::create_dir_all, path::Path};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use super::DatasetError;

pub struct RemoteFile {
    response: reqwest::blocking::Response,
    current_size: u64,
    pbar: Option<ProgressBar>,
}
impl RemoteFile {
    pub fn with_pbar(url: &str) -> Result<Self> {
        Self::with_config(url, 3600, true)
    }
    pub fn with_config(url: &str, timeout: u64, pbar: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url)
            .timeout(std::time::Duration::from_secs(timeout))
            .send()?;
        if !response.status().is_success() {
            return Err(DatasetError::Download {
                url: url.to_owned(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let pbar = if pbar {
            // raw.githubusercontent.com omits the length for compressed responses
            let pbar = match response.content_length() {
                Some(total_size) => {
                    let pbar = ProgressBar::new(total_size);
                    pbar.set_style(ProgressStyle::default_bar()
                        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
                        .progress_chars("#>-"));
                    pbar
                }
                None => ProgressBar::new_spinner(),
            };
            pbar.set_message(format!("Downloading {}", url));
            Some(pbar)
        } else {
            None
        };
        Ok(Self {
            response,
            current_size: 0,
            pbar,
        })
    }
    fn update(&mut self, size: usize) {
        self.current_size += size as u64;
        if let Some(pbar) = &self.pbar {
            pbar.set_position(self.current_size);
        }
    }
}

impl std::io::Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.response.read(buf)?;
        self.update(size);
        if size == 0 {
            if let Some(pbar) = &self.pbar {
                pbar.finish_and_clear();
            }
        }
        Ok(size)
    }
}

/// Downloads `url` into `path` unless the file is already there.
///
/// The body is staged in a temporary file next to `path` so that an
/// interrupted transfer never leaves a truncated file behind.
pub fn fetch_if_missing<P: AsRef<Path>>(url: &str, path: P) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(());
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(dir)?;

    info!("Downloading from {} to {}", url, path.display());
    let mut remote_file = RemoteFile::with_pbar(url)?;
    let mut local_file = tempfile::NamedTempFile::new_in(dir)?;
    std::io::copy(&mut remote_file, &mut local_file)?;
    local_file.persist(path)?;
    Ok(())
}

/// Formats a float the way Python's `str(float)` does for the rates used in
/// file names, e.g. `0.05` and `1.0`.
pub fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 && rate.is_finite() {
        format!("{:.1}", rate)
    } else {
        format!("{}", rate)
    }
}
