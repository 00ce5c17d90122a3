use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// First line of a version banner, or a placeholder when the tool printed nothing
fn first_line(output: &[u8]) -> String {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Unknown version")
        .to_string()
}

fn tool_version(executable: &Path, arg: &str, name: &str) -> Result<String> {
    let output = Command::new(executable)
        .arg(arg)
        .stdin(Stdio::null())
        .output()
        .with_context(|| {
            format!(
                "Failed to execute {} at {}. Check the path in the config file",
                name,
                executable.display()
            )
        })?;

    if !output.status.success() {
        anyhow::bail!("{} command failed with status: {}", name, output.status);
    }

    Ok(first_line(&output.stdout))
}

/// Check that ffmpeg runs and return its version line
pub fn ffmpeg_version(executable: &Path) -> Result<String> {
    tool_version(executable, "-version", "ffmpeg")
}

/// Check that apitrace runs and return its version line
pub fn apitrace_version(executable: &Path) -> Result<String> {
    tool_version(executable, "version", "apitrace")
}
