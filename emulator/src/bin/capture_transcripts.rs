use std::io;
use std::path::Path;
use std::time::Duration;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, SessionOptions};
use trigger_core::protocol::ProtocolVariant;

const TRANSCRIPT_DIR: &str = "transcripts";

fn main() -> io::Result<()> {
    record(
        "framed-link.log",
        SessionOptions {
            protocol: ProtocolVariant::Framed,
            ..SessionOptions::default()
        },
        &[
            "frame 70 75 01 00 00 00 00 00 01 06",
            "frame 00 75 01 00 00 00 00 00 01 06",
            "frame 70 75 01 00 01 00 04 00 14 00 00 00 1a 7a",
            "status",
        ],
    )?;
    record(
        "simplified-link.log",
        SessionOptions::default(),
        &[
            "$RTG#",
            "$PLS00100#",
            "$DTG00002#",
            "$RTG#",
            "$RTG#",
            "$XYZ#",
            "status",
            "history",
        ],
    )?;
    record(
        "pulse-counting.log",
        SessionOptions {
            threshold: 5,
            pulse_width: Some(Duration::from_micros(1)),
            ..SessionOptions::default()
        },
        &["pulse 12", "$PAU#", "pulse 20", "$RES#", "pulse 5", "history"],
    )?;
    Ok(())
}

fn record(name: &str, options: SessionOptions, script: &[&str]) -> io::Result<()> {
    let path = Path::new(TRANSCRIPT_DIR).join(name);
    let mut session = Session::with_transcript_file(options, &path)?;
    for line in script {
        let _ = session.handle_line(line)?;
    }
    println!("wrote {}", path.display());
    Ok(())
}
