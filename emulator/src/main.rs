mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use session::{Session, SessionOptions};
use trigger_core::protocol::ProtocolVariant;

const DEFAULT_TRANSCRIPT: &str = "trigger-emulator.log";

const USAGE: &str = "Usage: trigger-emulator [--protocol <simplified|framed>] [--threshold <n>] \
                     [--pulse-width-us <n>] [--replies] [--transcript <path>]";

fn main() -> io::Result<()> {
    let (options, transcript) = parse_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::with_transcript_file(options, &transcript)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Radar trigger emulator ready ({} protocol, threshold {}). Type `help` for commands or `exit` to quit.",
        options.protocol, options.threshold
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_line(trimmed)? {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_args<I>(args: I) -> Result<(SessionOptions, PathBuf), String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = SessionOptions::default();
    let mut transcript = PathBuf::from(DEFAULT_TRANSCRIPT);
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };

        match flag.as_str() {
            "--protocol" => {
                let name = value()?;
                options.protocol = ProtocolVariant::from_name(&name)
                    .ok_or_else(|| format!("Unknown protocol `{name}`"))?;
            }
            "--threshold" => options.threshold = parse_positive(&flag, &value()?)?,
            "--pulse-width-us" => {
                let micros = parse_positive(&flag, &value()?)?;
                options.pulse_width = Some(Duration::from_micros(u64::from(micros)));
            }
            "--replies" => options.simplified_replies = true,
            "--transcript" => transcript = PathBuf::from(value()?),
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }

    Ok((options, transcript))
}

fn parse_positive(flag: &str, value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(format!("{flag} expects a positive integer, got `{value}`")),
    }
}
