use crate::core::schedule::{ScheduleDescriptor, ScheduleStatus, Scheduler};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

const TAG_PREFIX: &str = "# quadfolio:";

/// Installs the refresh command into the user's crontab.
///
/// Entries are tagged with a trailing `# quadfolio:<label>` comment so they
/// can be found and replaced without touching the rest of the crontab.
pub struct CronScheduler {
    crontab: String,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::with_binary("crontab")
    }

    pub fn with_binary(crontab: &str) -> Self {
        Self {
            crontab: crontab.to_string(),
        }
    }

    async fn read_crontab(&self) -> Result<String> {
        let output = Command::new(&self.crontab)
            .arg("-l")
            .output()
            .await
            .with_context(|| format!("Failed to run {} -l", self.crontab))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab") {
            debug!("No crontab installed yet");
            return Ok(String::new());
        }
        bail!("{} -l failed: {}", self.crontab, stderr.trim())
    }

    async fn write_crontab(&self, content: &str) -> Result<()> {
        let mut child = Command::new(&self.crontab)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {} -", self.crontab))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .await
                .context("Failed to write crontab")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for crontab")?;
        if !output.status.success() {
            bail!(
                "{} rejected the new crontab: {}",
                self.crontab,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// cron turns an unescaped `%` in the command field into a newline.
fn escape_percent(text: &str) -> String {
    text.replace('%', r"\%")
}

fn tag(label: &str) -> String {
    escape_percent(&format!("{TAG_PREFIX}{label}"))
}

/// Cron expression firing roughly every `interval_seconds`. Cron cannot go
/// below one minute; intervals are rounded up to whole minutes, and to whole
/// hours from one hour on.
pub fn cron_expression(interval_seconds: u64) -> String {
    let minutes = interval_seconds.div_ceil(60).max(1);
    match minutes {
        1 => "* * * * *".to_string(),
        2..60 => format!("*/{minutes} * * * *"),
        _ => match minutes.div_ceil(60) {
            hours @ 1..24 => format!("0 */{hours} * * *"),
            _ => "0 0 * * *".to_string(),
        },
    }
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn command_line(descriptor: &ScheduleDescriptor) -> String {
    let program: Vec<String> = descriptor.program.iter().map(|a| shell_quote(a)).collect();
    escape_percent(&format!(
        "{} >> {} 2>> {}",
        program.join(" "),
        shell_quote(&descriptor.stdout_path.to_string_lossy()),
        shell_quote(&descriptor.stderr_path.to_string_lossy())
    ))
}

/// Crontab lines for `descriptor`, each tagged with its label.
pub fn render_entries(descriptor: &ScheduleDescriptor) -> Vec<String> {
    let command = command_line(descriptor);
    let tag = tag(&descriptor.label);
    let mut lines = vec![format!(
        "{} {} {}",
        cron_expression(descriptor.interval_seconds),
        command,
        tag
    )];
    if descriptor.run_at_load {
        lines.push(format!("@reboot {command} {tag}"));
    }
    lines
}

/// Removes every line tagged with `label`.
pub fn strip_entries(crontab: &str, label: &str) -> String {
    let tag = tag(label);
    crontab
        .lines()
        .filter(|line| !line.trim_end().ends_with(&tag))
        .map(|line| format!("{line}\n"))
        .collect()
}

pub fn has_entries(crontab: &str, label: &str) -> bool {
    let tag = tag(label);
    crontab.lines().any(|line| line.trim_end().ends_with(&tag))
}

#[async_trait]
impl Scheduler for CronScheduler {
    #[instrument(name = "CronInstall", skip(self, descriptor), fields(label = %descriptor.label))]
    async fn install(&self, descriptor: &ScheduleDescriptor) -> Result<()> {
        if descriptor.program.is_empty() {
            bail!("Schedule {} has no program to run", descriptor.label);
        }
        let current = self.read_crontab().await?;
        let mut updated = strip_entries(&current, &descriptor.label);
        for line in render_entries(descriptor) {
            updated.push_str(&line);
            updated.push('\n');
        }
        debug!("Writing crontab:\n{}", updated);
        self.write_crontab(&updated).await
    }

    async fn uninstall(&self, label: &str) -> Result<()> {
        let current = self.read_crontab().await?;
        if !has_entries(&current, label) {
            debug!("No crontab entries for {}", label);
            return Ok(());
        }
        self.write_crontab(&strip_entries(&current, label)).await
    }

    async fn status(&self, label: &str) -> Result<ScheduleStatus> {
        let installed = has_entries(&self.read_crontab().await?, label);
        // cron runs whatever is installed
        Ok(ScheduleStatus {
            installed,
            running: installed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn descriptor(interval_seconds: u64, run_at_load: bool) -> ScheduleDescriptor {
        ScheduleDescriptor {
            label: "quadfolio-refresh".to_string(),
            program: vec![
                "/usr/local/bin/quadfolio".to_string(),
                "--config-path".to_string(),
                "/home/me/My Config.yaml".to_string(),
                "refresh".to_string(),
            ],
            interval_seconds,
            stdout_path: PathBuf::from("/tmp/out.log"),
            stderr_path: PathBuf::from("/tmp/err.log"),
            run_at_load,
        }
    }

    #[test]
    fn test_cron_expression() {
        assert_eq!(cron_expression(0), "* * * * *");
        assert_eq!(cron_expression(30), "* * * * *");
        assert_eq!(cron_expression(900), "*/15 * * * *");
        assert_eq!(cron_expression(3600), "0 */1 * * *");
        assert_eq!(cron_expression(3 * 3600), "0 */3 * * *");
        assert_eq!(cron_expression(86400), "0 0 * * *");
    }

    #[test]
    fn test_render_entries() {
        let lines = render_entries(&descriptor(900, true));
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "*/15 * * * * /usr/local/bin/quadfolio --config-path '/home/me/My Config.yaml' refresh >> /tmp/out.log 2>> /tmp/err.log # quadfolio:quadfolio-refresh"
        );
        assert!(lines[1].starts_with("@reboot /usr/local/bin/quadfolio"));

        assert_eq!(render_entries(&descriptor(900, false)).len(), 1);
    }

    #[test]
    fn test_percent_signs_are_escaped() {
        let mut descriptor = descriptor(900, false);
        descriptor.label = "refresh%1".to_string();
        descriptor.program[2] = "/home/a%b/c.yaml".to_string();
        descriptor.stdout_path = PathBuf::from("/tmp/100%.log");

        let lines = render_entries(&descriptor);
        assert_eq!(
            lines[0],
            r"*/15 * * * * /usr/local/bin/quadfolio --config-path '/home/a\%b/c.yaml' refresh >> '/tmp/100\%.log' 2>> /tmp/err.log # quadfolio:refresh\%1"
        );

        let crontab = format!("{}\n", lines[0]);
        assert!(has_entries(&crontab, "refresh%1"));
        assert_eq!(strip_entries(&crontab, "refresh%1"), "");
    }

    #[test]
    fn test_strip_keeps_foreign_lines() {
        let mut crontab = "MAILTO=me\n0 1 * * * backup.sh\n".to_string();
        for line in render_entries(&descriptor(900, true)) {
            crontab.push_str(&line);
            crontab.push('\n');
        }
        assert!(has_entries(&crontab, "quadfolio-refresh"));
        assert!(!has_entries(&crontab, "other"));

        let stripped = strip_entries(&crontab, "quadfolio-refresh");
        assert_eq!(stripped, "MAILTO=me\n0 1 * * * backup.sh\n");
        assert!(!has_entries(&stripped, "quadfolio-refresh"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("refresh"), "refresh");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
