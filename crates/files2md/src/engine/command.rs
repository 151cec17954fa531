//! Conversion through an external converter process.
//!
//! The default program is the docling CLI. Each render call runs one child
//! process that writes `<stem>.md` into a private temporary directory.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{EngineSettings, ImageProcessing};
use crate::error::RenderError;
use crate::topology::{AcceleratorTopology, VISIBLE_DEVICES_ENV};

use super::{ConversionEngine, Device, EngineFactory, RenderOptions};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of trailing stderr lines kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Placeholder in `extra_args` replaced by the image resolution scale.
pub const IMAGE_SCALE_PLACEHOLDER: &str = "{image_scale}";

const IMAGE_PLACEHOLDER: &str = "<!-- image -->";

pub struct CommandEngineFactory {
    program: String,
    extra_args: Vec<String>,
    timeout: Duration,
    num_threads: usize,
    topology: AcceleratorTopology,
}

impl CommandEngineFactory {
    pub fn new(program: impl Into<String>, topology: AcceleratorTopology) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            timeout: Duration::from_secs(600),
            num_threads: num_cpus::get(),
            topology,
        }
    }

    pub fn from_settings(settings: &EngineSettings, topology: &AcceleratorTopology) -> Self {
        Self {
            program: settings.program.clone(),
            extra_args: settings.extra_args.clone(),
            timeout: Duration::from_secs(settings.render_timeout_secs),
            num_threads: settings.num_threads.unwrap_or_else(num_cpus::get),
            topology: topology.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    fn arguments(&self, options: &RenderOptions) -> Vec<String> {
        let settings = &options.settings;
        let device = match options.device {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Accelerator(_) => "cuda",
        };
        let image_mode = match settings.image_processing {
            ImageProcessing::Embed => "embedded",
            ImageProcessing::Placeholder | ImageProcessing::Drop => "placeholder",
        };

        let mut args = vec![
            "--to".to_string(),
            "md".to_string(),
            "--device".to_string(),
            device.to_string(),
            "--image-export-mode".to_string(),
            image_mode.to_string(),
            "--num-threads".to_string(),
            self.num_threads.to_string(),
        ];
        if settings.force_full_page_ocr {
            args.push("--force-ocr".to_string());
        }
        if settings.do_picture_description {
            args.push("--enrich-picture-description".to_string());
        }

        let scale = settings.image_resolution_scale.to_string();
        args.extend(
            self.extra_args
                .iter()
                .map(|arg| arg.replace(IMAGE_SCALE_PLACEHOLDER, &scale)),
        );
        args
    }

    /// Value of the visible-device variable for the child, `None` to inherit.
    fn visible_devices(&self, device: Device) -> Result<Option<String>, RenderError> {
        match device {
            Device::Auto => Ok(None),
            // Hide every accelerator so the converter cannot grab one.
            Device::Cpu => Ok(Some(String::new())),
            Device::Accelerator(index) => self
                .topology
                .device_id(index)
                .map(|id| Some(id.to_string()))
                .ok_or_else(|| {
                    RenderError::Engine(format!("accelerator {} is not available", index))
                }),
        }
    }
}

impl EngineFactory for CommandEngineFactory {
    fn build(&self, options: &RenderOptions) -> Result<Box<dyn ConversionEngine>, RenderError> {
        Ok(Box::new(CommandEngine {
            program: self.program.clone(),
            args: self.arguments(options),
            visible_devices: self.visible_devices(options.device)?,
            timeout: self.timeout,
        }))
    }
}

/// One configured converter invocation.
///
/// The child process owns all accelerator memory, so there is nothing to
/// release between calls.
#[derive(Debug)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    visible_devices: Option<String>,
    timeout: Duration,
}

impl CommandEngine {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn visible_devices(&self) -> Option<&str> {
        self.visible_devices.as_deref()
    }
}

impl ConversionEngine for CommandEngine {
    fn render(&mut self, input: &Path, options: &RenderOptions) -> Result<String, RenderError> {
        let output_dir = tempfile::Builder::new()
            .prefix("files2md-render-")
            .tempdir()?;

        let mut command = Command::new(&self.program);
        command
            .arg(input)
            .arg("--output")
            .arg(output_dir.path())
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(visible) = &self.visible_devices {
            command.env(VISIBLE_DEVICES_ENV, visible);
        }

        debug!(
            "Running {} on {} (device {})",
            self.program,
            input.display(),
            options.device
        );
        let mut child = command.spawn().map_err(|e| RenderError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer);
                String::from_utf8_lossy(&buffer).into_owned()
            })
        });

        let Some(status) = wait_with_timeout(&mut child, self.timeout)? else {
            warn!(
                "{} exceeded {}s on {}, killed",
                self.program,
                self.timeout.as_secs(),
                input.display()
            );
            return Err(RenderError::Timeout(self.timeout.as_secs()));
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(RenderError::CommandFailed {
                status: status.to_string(),
                stderr: tail_lines(&stderr, STDERR_TAIL_LINES),
            });
        }

        let output = find_output(output_dir.path(), input)
            .ok_or_else(|| RenderError::MissingOutput(input.to_path_buf()))?;
        let markdown = std::fs::read_to_string(&output).map_err(|e| RenderError::ReadInput {
            path: output.clone(),
            source: e,
        })?;

        Ok(match options.settings.image_processing {
            ImageProcessing::Drop => strip_image_placeholders(&markdown),
            ImageProcessing::Embed | ImageProcessing::Placeholder => markdown,
        })
    }
}

/// Waits for the child, killing it once `timeout` elapses.
///
/// Returns `None` when the child was killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                warn!("Failed to kill converter process: {}", e);
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Locates the Markdown file the converter wrote for `input`.
fn find_output(output_dir: &Path, input: &Path) -> Option<PathBuf> {
    if let Some(stem) = input.file_stem() {
        let expected = output_dir.join(format!("{}.md", stem.to_string_lossy()));
        if expected.is_file() {
            return Some(expected);
        }
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(output_dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Removes image placeholder lines and the blank runs they leave behind.
pub fn strip_image_placeholders(markdown: &str) -> String {
    let mut result = String::with_capacity(markdown.len());
    let mut previous_blank = false;

    for line in markdown.lines() {
        if line.trim() == IMAGE_PLACEHOLDER {
            continue;
        }
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        result.push_str(line);
        result.push('\n');
        previous_blank = blank;
    }

    result
}
