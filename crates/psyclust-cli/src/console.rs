//! Interactive review over a line-oriented terminal.

use std::io::{BufRead, Write};
use std::path::Path;

use colored::Colorize;
use psyclust_labels::{
    parse_choice, ActionSource, Choice, ClusterLabelRecord, EditRequest, ReviewAction, ReviewStatus,
    Result,
};

/// Reads decisions from `input`, prompts on `output`. End of input means quit.
pub struct ConsoleActions<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleActions<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// `None` on end of input.
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        self.read_line()
    }

    fn show(&mut self, file_name: &str, record: &ClusterLabelRecord) -> Result<()> {
        writeln!(self.output)?;
        writeln!(
            self.output,
            "{} {} (cluster {})",
            "Reviewing".cyan().bold(),
            file_name.bold(),
            record.cluster_id
        )?;
        writeln!(self.output, "  label:     {}", record.label.as_deref().unwrap_or("<none>"))?;
        let traits = if record.traits.is_empty() {
            "<none>".to_string()
        } else {
            record.traits.join(", ")
        };
        writeln!(self.output, "  traits:    {traits}")?;
        writeln!(self.output, "  structure: {}", record.structure)?;
        Ok(())
    }

    /// Collect edit fields; `None` when input ends mid-edit.
    fn read_edit(&mut self) -> Result<Option<EditRequest>> {
        let Some(label) = self.ask("  new label (blank keeps): ")? else {
            return Ok(None);
        };
        let Some(traits) = self.ask("  new traits, comma-separated (blank keeps): ")? else {
            return Ok(None);
        };
        let Some(structure) = self.ask("  new structure (blank keeps): ")? else {
            return Ok(None);
        };
        Ok(Some(EditRequest {
            label,
            traits,
            structure,
        }))
    }
}

impl<R: BufRead, W: Write> ActionSource for ConsoleActions<R, W> {
    fn next_action(
        &mut self,
        file_name: &str,
        record: &ClusterLabelRecord,
        default_accept: bool,
    ) -> Result<ReviewAction> {
        self.show(file_name, record)?;
        let menu = if default_accept {
            "[A]ccept / (e)dit / (s)kip / (q)uit: "
        } else {
            "(a)ccept / (e)dit / (s)kip / (q)uit: "
        };
        let Some(input) = self.ask(menu)? else {
            return Ok(ReviewAction::Quit);
        };
        Ok(match parse_choice(&input, default_accept) {
            Choice::Accept => ReviewAction::Accept,
            Choice::Skip => ReviewAction::Skip,
            Choice::Quit => ReviewAction::Quit,
            Choice::Edit => match self.read_edit()? {
                Some(request) => ReviewAction::Edit(request),
                None => ReviewAction::Quit,
            },
            Choice::Invalid(input) => ReviewAction::Invalid { input },
        })
    }

    fn confirm_overwrite(&mut self, cluster_id: u32, final_path: &Path) -> Result<bool> {
        writeln!(
            self.output,
            "{} a final record for cluster {cluster_id} already exists at {}",
            "warning:".yellow().bold(),
            final_path.display()
        )?;
        let answer = self.ask("Overwrite? [y/N]: ")?.unwrap_or_default();
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    fn outcome(&mut self, file_name: &str, status: ReviewStatus) {
        let tag = match status {
            ReviewStatus::Accepted => status.as_str().green().bold(),
            ReviewStatus::Edited => status.as_str().cyan().bold(),
            ReviewStatus::Skipped => status.as_str().normal(),
            _ => status.as_str().yellow().bold(),
        };
        let _ = writeln!(self.output, "{tag}: {file_name}");
    }
}
