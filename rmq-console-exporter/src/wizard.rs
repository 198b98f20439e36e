//! Interactive creation of a config file holding queue filter rules.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use rmq_console_collector::Filter;
use serde::Serialize;
use thiserror::Error;

use crate::config::FilterConfig;

/// Wizard errors.
#[derive(Debug, Error)]
pub enum WizardError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("file {0} exists, choose a different path")]
    Exists(PathBuf),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Prompts on `output`, reads answers from `input`.
pub struct ConfigWizard<R, W> {
    input: R,
    output: W,
}

impl ConfigWizard<io::StdinLock<'static>, io::Stdout> {
    /// A wizard on the process terminal.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConfigWizard<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Run the wizard.
    ///
    /// Returns the written path, or `None` when no rule was entered.
    pub fn run(&mut self) -> Result<Option<PathBuf>, WizardError> {
        let path = loop {
            let answer = self
                .ask("Path to save the config file")?
                .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
            if !answer.is_empty() {
                break PathBuf::from(answer);
            }
        };

        if path.exists() {
            let confirm = self.ask("File exists. Confirm overwrite [y/N]")?;
            if !confirm.is_some_and(|c| c.eq_ignore_ascii_case("y")) {
                return Err(WizardError::Exists(path));
            }
        }

        let queues = self.ask_rules()?;
        if queues.is_empty() {
            writeln!(self.output, "Config file was not created")?;
            return Ok(None);
        }

        writeln!(self.output, "Writing config file: {}", path.display())?;
        let content = render_config(queues)?;
        std::fs::write(&path, &content)?;
        writeln!(self.output, "Config created:\n{}", content)?;

        Ok(Some(path))
    }

    /// Collect rules until an empty answer or end of input.
    fn ask_rules(&mut self) -> Result<Vec<String>, WizardError> {
        let mut rules = Vec::new();

        while let Some(rule) =
            self.ask("Add a valid regexp to filter queues by name. Leave empty to exit")?
        {
            if rule.is_empty() {
                break;
            }
            match Filter::new(&[rule.as_str()]) {
                Ok(_) => rules.push(rule),
                Err(e) => writeln!(self.output, "regexp not valid: {}", e)?,
            }
        }

        Ok(rules)
    }

    /// Print a prompt and read one trimmed answer; `None` at end of input.
    fn ask(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}: ", label)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

/// The part of the config file the wizard fills in.
#[derive(Serialize)]
struct WizardConfig {
    filters: FilterConfig,
}

fn render_config(queues: Vec<String>) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&WizardConfig {
        filters: FilterConfig { queues },
    })
}

/// Convenience wrapper for `--create-config`.
pub fn create_config() -> Result<Option<PathBuf>, WizardError> {
    ConfigWizard::stdio().run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExporterConfig;
    use std::io::Cursor;

    fn run(answers: &str) -> (Result<Option<PathBuf>, WizardError>, String) {
        let mut output = Vec::new();
        let result = ConfigWizard::new(Cursor::new(answers.to_string()), &mut output).run();
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_writes_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");

        let answers = format!("{}\n^.*\\.dev$\n^orders\n\n", path.display());
        let (result, output) = run(&answers);

        assert_eq!(result.unwrap(), Some(path.clone()));
        assert!(output.contains("Config created:"));

        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.filters.queues, vec![r"^.*\.dev$", "^orders"]);
    }

    #[test]
    fn test_invalid_rule_is_asked_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");

        let answers = format!("{}\n(broken\n^ok$\n\n", path.display());
        let (result, output) = run(&answers);

        assert!(result.unwrap().is_some());
        assert!(output.contains("regexp not valid"));
        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.filters.queues, vec!["^ok$"]);
    }

    #[test]
    fn test_no_rules_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");

        let (result, output) = run(&format!("{}\n\n", path.display()));

        assert_eq!(result.unwrap(), None);
        assert!(output.contains("Config file was not created"));
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_file_declined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{}").unwrap();

        let (result, _) = run(&format!("{}\nn\n", path.display()));

        assert!(matches!(result, Err(WizardError::Exists(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_existing_file_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{}").unwrap();

        let (result, _) = run(&format!("{}\ny\n^a\n\n", path.display()));

        assert!(result.unwrap().is_some());
        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.filters.queues, vec!["^a"]);
    }

    #[test]
    fn test_end_of_input_before_path() {
        let (result, _) = run("");
        assert!(matches!(result, Err(WizardError::Io(_))));
    }
}
