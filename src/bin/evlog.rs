//! Evaluation log utility.
//!
//! Maintenance commands for persisted evaluation logs: print, reformat,
//! repair, and concatenate. These operate on log files, never on a live
//! in-memory store; anything they produce re-ingests through the normal
//! replay path.

use std::path::PathBuf;
use std::process;

use kestrel::storage::persistent::FileEvalLog;

fn usage() {
    eprintln!("Usage:");
    eprintln!("  evlog print <log>              print every frame");
    eprintln!("  evlog reformat <src> <dst>     rewrite with fresh framing and numbering");
    eprintln!("  evlog repair <src> <dst>       drop malformed frames");
    eprintln!("  evlog cat <dst> <src>...       concatenate logs into <dst>");
}

fn run(args: &[String]) -> Result<(), String> {
    match args {
        [cmd, log] if cmd == "print" => print_log(log),
        [cmd, src, dst] if cmd == "reformat" => {
            // A single-source concatenation is exactly a reformat: frames are
            // re-framed with the current codec and renumbered from 1.
            let count = FileEvalLog::concat(&[PathBuf::from(src)], dst)
                .map_err(|e| format!("reformat failed: {e}"))?;
            println!("reformatted {count} frames into {dst}");
            Ok(())
        }
        [cmd, src, dst] if cmd == "repair" => {
            let stats =
                FileEvalLog::repair(src, dst).map_err(|e| format!("repair failed: {e}"))?;
            println!(
                "repaired {src}: kept {} frames, dropped {}",
                stats.kept, stats.dropped
            );
            Ok(())
        }
        [cmd, dst, sources @ ..] if cmd == "cat" && !sources.is_empty() => {
            let paths: Vec<PathBuf> = sources.iter().map(PathBuf::from).collect();
            let count =
                FileEvalLog::concat(&paths, dst).map_err(|e| format!("cat failed: {e}"))?;
            println!("wrote {count} frames into {dst}");
            Ok(())
        }
        _ => {
            usage();
            Err("invalid arguments".to_string())
        }
    }
}

fn print_log(path: &str) -> Result<(), String> {
    let frames = FileEvalLog::frames(path).map_err(|e| format!("cannot read {path}: {e}"))?;
    for frame in &frames {
        let record = &frame.record;
        let coords: Vec<String> = record
            .point()
            .coords()
            .iter()
            .map(|c| format!("{c:.17e}"))
            .collect();
        println!(
            "#{:<6} {} {:<16} {:<14} outputs={} point=[{}]",
            frame.sequence,
            frame.timestamp.to_rfc3339(),
            record.producer_id(),
            record.eval_id().to_string(),
            record.satisfied().len(),
            coords.join(", ")
        );
    }
    println!("{} frames", frames.len());
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        eprintln!("error: {e}");
        process::exit(-1);
    }
}
