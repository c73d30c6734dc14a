//! Converters run as subprocesses: `wkhtmltopdf` and `pandoc`.

use super::{require_input, StepOptions};
use crate::config::ExternalCommand;
use crate::pipeline::error::{FormatError, PipelineError};
use crate::pipeline::file::{DocumentFile, FileFormat};
use crate::pipeline::RenderContext;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Run a converter: `input` on stdin, converted bytes on stdout.
///
/// The process is killed once `command.timeout()` elapses.
pub(crate) async fn convert(
    step: &'static str,
    command: &ExternalCommand,
    args: &[String],
    cwd: &Path,
    input: Vec<u8>,
) -> Result<Vec<u8>, PipelineError> {
    let Some((program, leading)) = command.command.split_first() else {
        return Err(PipelineError::step(step, "no converter command configured"));
    };
    debug!(step, program = %program, cwd = %cwd.display(), "Running converter");

    let mut child = Command::new(program)
        .args(leading)
        .args(&command.args)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| PipelineError::step(step, format!("failed to start {program}: {err}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PipelineError::step(step, "converter stdin unavailable"))?;
    let feeder = tokio::spawn(async move {
        let written = stdin.write_all(&input).await;
        drop(stdin);
        written
    });

    let output = match timeout(command.timeout(), child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(PipelineError::step(step, format!("failed to wait for {program}: {err}"))),
        Err(_) => {
            return Err(PipelineError::step(
                step,
                format!("{program} timed out after {}s", command.timeout_secs),
            ));
        }
    };
    // A converter may exit without reading all input; its exit status decides.
    let _ = feeder.await;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(PipelineError::step(
            step,
            format!("{program} exited with {code}: {}", stderr.trim()),
        ))
    }
}

fn split_args(options: &StepOptions<'_>) -> Vec<String> {
    options
        .get("args")
        .map(|args| args.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// HTML to PDF.
#[derive(Debug, Clone)]
pub struct WkhtmltopdfStep {
    command: ExternalCommand,
    args: Vec<String>,
}

impl WkhtmltopdfStep {
    pub(crate) const NAME: &'static str = "wkhtmltopdf";

    pub(crate) fn new(options: &StepOptions<'_>, command: &ExternalCommand) -> Self {
        Self {
            command: command.clone(),
            args: split_args(options),
        }
    }

    pub(crate) fn accepts(format: &FileFormat) -> bool {
        *format == FileFormat::HTML
    }

    pub(crate) async fn execute(&self, file: DocumentFile, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        require_input(Self::NAME, &file, Self::accepts)?;
        let mut args = self.args.clone();
        args.extend(["-".to_string(), "-".to_string()]);
        let pdf = convert(Self::NAME, &self.command, &args, &ctx.template_dir, file.content).await?;
        Ok(DocumentFile::new(FileFormat::PDF, pdf))
    }
}

const PANDOC_INPUTS: &[FileFormat] = &[
    FileFormat::HTML,
    FileFormat::MARKDOWN,
    FileFormat::DOCX,
    FileFormat::ODT,
    FileFormat::LATEX,
    FileFormat::RST,
    FileFormat::EPUB,
];

const PANDOC_OUTPUTS: &[FileFormat] = &[
    FileFormat::DOCX,
    FileFormat::ODT,
    FileFormat::HTML,
    FileFormat::MARKDOWN,
    FileFormat::LATEX,
    FileFormat::RST,
    FileFormat::ASCIIDOC,
    FileFormat::RTF,
    FileFormat::EPUB,
    FileFormat::PLAIN,
];

/// Conversion between document markup formats.
#[derive(Debug, Clone)]
pub struct PandocStep {
    command: ExternalCommand,
    from: FileFormat,
    to: FileFormat,
    args: Vec<String>,
}

impl PandocStep {
    pub(crate) const NAME: &'static str = "pandoc";

    pub(crate) fn new(options: &StepOptions<'_>, command: &ExternalCommand) -> Result<Self, FormatError> {
        let pick = |key: &str, allowed: &[FileFormat]| {
            let name = options.require(key)?;
            allowed
                .iter()
                .find(|format| format.name() == name)
                .cloned()
                .ok_or_else(|| FormatError::invalid(Self::NAME, key, format!("unsupported format '{name}'")))
        };
        Ok(Self {
            command: command.clone(),
            from: pick("from", PANDOC_INPUTS)?,
            to: pick("to", PANDOC_OUTPUTS)?,
            args: split_args(options),
        })
    }

    pub(crate) fn accepts(&self, format: &FileFormat) -> bool {
        *format == self.from
    }

    pub(crate) fn output(&self) -> FileFormat {
        self.to.clone()
    }

    pub(crate) async fn execute(&self, file: DocumentFile, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        require_input(Self::NAME, &file, |format| self.accepts(format))?;
        let mut args = vec![
            "--from".to_string(),
            self.from.name().to_string(),
            "--to".to_string(),
            self.to.name().to_string(),
            "--output".to_string(),
            "-".to_string(),
        ];
        args.extend(self.args.iter().cloned());
        let out = convert(Self::NAME, &self.command, &args, &ctx.template_dir, file.content).await?;
        Ok(DocumentFile::new(self.to.clone(), out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn shell(script: &str) -> ExternalCommand {
        let mut command = ExternalCommand::new(&["sh", "-c", script, "converter"]);
        command.timeout_secs = 5;
        command
    }

    #[tokio::test]
    async fn test_stdin_is_piped_to_stdout() {
        let dir = TempDir::new().unwrap();
        let out = convert("pandoc", &shell("tr a-z A-Z"), &[], dir.path(), b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(out, b"HELLO");
    }

    #[tokio::test]
    async fn test_arguments_follow_configured_flags() {
        let dir = TempDir::new().unwrap();
        let mut command = shell("echo \"$@\"");
        command.args = vec!["--quiet".into()];
        let out = convert("wkhtmltopdf", &command, &["-".into(), "-".into()], dir.path(), Vec::new())
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "--quiet - -");
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let err = convert("pandoc", &shell("echo 'unknown reader' >&2; exit 3"), &[], dir.path(), Vec::new())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exited with 3"), "{message}");
        assert!(message.contains("unknown reader"), "{message}");
        assert_eq!(err.step_name(), "pandoc");
    }

    #[tokio::test]
    async fn test_slow_converter_times_out() {
        let dir = TempDir::new().unwrap();
        let mut command = shell("sleep 5");
        command.timeout_secs = 1;
        let started = std::time::Instant::now();
        let err = convert("wkhtmltopdf", &command, &[], dir.path(), Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_pandoc_rejects_formats_outside_its_sets() {
        let command = ExternalCommand::new(&["pandoc"]);
        let options = [("from".to_string(), "html".to_string()), ("to".to_string(), "pdf".to_string())]
            .into_iter()
            .collect();
        let err = PandocStep::new(&StepOptions::new(PandocStep::NAME, &options), &command).unwrap_err();
        assert!(matches!(err, FormatError::InvalidOption { ref option, .. } if option == "to"));

        let options = [("to".to_string(), "docx".to_string())].into_iter().collect();
        let err = PandocStep::new(&StepOptions::new(PandocStep::NAME, &options), &command).unwrap_err();
        assert_eq!(err, FormatError::missing("pandoc", "from"));
    }
}
