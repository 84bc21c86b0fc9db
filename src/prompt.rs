use crate::app::ports::PromptPort;
use std::io::{self, Write};

/// Interactive prompt source backed by stdin/stdout.
pub struct StdinPrompter;

impl PromptPort for StdinPrompter {
    fn ask(&self, question: &str) -> io::Result<String> {
        print!("{question}");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

/// Prompts for a buffer distance, re-asking until the answer parses as a
/// positive number.
pub fn prompt_buffer_distance(prompt: &dyn PromptPort) -> io::Result<f64> {
    loop {
        let answer = prompt.ask("Enter buffer distance in feet for all layers: ")?;
        match answer.parse::<f64>() {
            Ok(distance) if distance > 0.0 && distance.is_finite() => return Ok(distance),
            _ => println!("Please enter a valid number."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    pub struct ScriptedPrompter {
        answers: Mutex<Vec<String>>,
    }

    impl ScriptedPrompter {
        pub fn new(answers: &[&str]) -> Self {
            ScriptedPrompter {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
            }
        }
    }

    impl PromptPort for ScriptedPrompter {
        fn ask(&self, _question: &str) -> io::Result<String> {
            self.answers
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "out of answers"))
        }
    }

    #[test]
    fn reprompts_until_a_valid_number() {
        let prompt = ScriptedPrompter::new(&["not a number", "-3", "", "500"]);
        assert_eq!(prompt_buffer_distance(&prompt).unwrap(), 500.0);
    }

    #[test]
    fn propagates_prompt_io_errors() {
        let prompt = ScriptedPrompter::new(&[]);
        assert!(prompt_buffer_distance(&prompt).is_err());
    }
}
