use std::io::{self, BufRead, Write};

/// User interaction the sync layer needs, independent of how it is presented.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter {
    /// `None` when the user cancels.
    fn ask_text(&self, prompt: &str) -> Option<String>;

    fn ask_confirmation(&self, prompt: &str) -> bool;

    fn notify(&self, message: &str);
}

/// Line-based prompter over stdin/stdout, with notifications on stderr.
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(prompt: &str) -> Option<String> {
        print!("{} ", prompt);
        io::stdout().flush().ok()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl Prompter for TerminalPrompter {
    fn ask_text(&self, prompt: &str) -> Option<String> {
        Self::read_line(prompt).filter(|answer| !answer.trim().is_empty())
    }

    fn ask_confirmation(&self, prompt: &str) -> bool {
        Self::read_line(&format!("{}\n[y/N]", prompt))
            .map(|answer| matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }

    fn notify(&self, message: &str) {
        eprintln!("{}", message);
    }
}
