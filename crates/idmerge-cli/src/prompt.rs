use idmerge_core::import::MissingSpectraPrompt;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Asks on the terminal for the location of a missing spectrum file.
/// An empty answer (or end of input) aborts the import.
pub struct StdinPrompt<R, W> {
    input: R,
    output: W,
}

impl Default for StdinPrompt<std::io::StdinLock<'static>, std::io::Stderr> {
    fn default() -> Self {
        StdinPrompt::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> StdinPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        StdinPrompt { input, output }
    }

    fn ask(&mut self, file: &str) -> std::io::Result<Option<PathBuf>> {
        loop {
            write!(
                self.output,
                "spectrum file `{}` is missing, enter its location (leave empty to abort): ",
                file
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let answer = line.trim();
            if answer.is_empty() {
                return Ok(None);
            }
            let path = PathBuf::from(answer);
            if path.is_file() {
                return Ok(Some(path));
            }
            writeln!(self.output, "`{}` is not a file", path.display())?;
        }
    }
}

impl<R: BufRead, W: Write> MissingSpectraPrompt for StdinPrompt<R, W> {
    fn replacement(&mut self, file: &str) -> Option<PathBuf> {
        match self.ask(file) {
            Ok(path) => path,
            Err(err) => {
                log::error!("unable to read replacement for {}: {}", file, err);
                None
            }
        }
    }
}
