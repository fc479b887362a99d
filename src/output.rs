//! Terminal output for match and delta results

use crate::delta::{format_delta, DeltaReport};
use crate::query::MatchResult;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// `ColorChoice::Auto` only consults `TERM`/`NO_COLOR`, so pipes and files
/// are excluded here.
fn color_choice(color: bool, is_terminal: bool) -> ColorChoice {
    if color && is_terminal {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn stdout(color: bool) -> StandardStream {
    StandardStream::stdout(color_choice(color, io::stdout().is_terminal()))
}

/// Print matched builds, one block per build
pub fn print_matches(results: &[MatchResult], color: bool) -> io::Result<()> {
    write_matches(&mut stdout(color), results)
}

/// Print delta scan hits in `<filename> a - b = 0x..` form
pub fn print_delta(name_a: &str, name_b: &str, target: i128, report: &DeltaReport, color: bool) -> io::Result<()> {
    write_delta(&mut stdout(color), name_a, name_b, target, report)
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).map_err(io::Error::other)?;
    writeln!(out)
}

pub fn write_matches<W: WriteColor>(out: &mut W, results: &[MatchResult]) -> io::Result<()> {
    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }

        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
        writeln!(out, "{}", result.id)?;
        out.reset()?;

        if let Some(buildid) = &result.buildid {
            write_field(out, "buildid", buildid)?;
        }
        write_field(out, "md5", &result.md5)?;
        write_field(out, "sha1", &result.sha1)?;
        write_field(out, "sha256", &result.sha256)?;

        if !result.symbols.is_empty() {
            writeln!(out, "  symbols:")?;
            let width = result.symbols.keys().map(String::len).max().unwrap_or(0);
            for (name, address) in &result.symbols {
                write!(out, "    {:width$}  ", name, width = width)?;
                out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
                writeln!(out, "{}", address)?;
                out.reset()?;
            }
        }

        write_field(out, "download", &result.download_url)?;
        write_field(out, "symfile", &result.symbols_url)?;
    }

    Ok(())
}

fn write_field<W: WriteColor>(out: &mut W, label: &str, value: &str) -> io::Result<()> {
    write!(out, "  {:<10}", format!("{}:", label))?;
    writeln!(out, "{}", value)
}

pub fn write_delta<W: WriteColor>(
    out: &mut W,
    name_a: &str,
    name_b: &str,
    target: i128,
    report: &DeltaReport,
) -> io::Result<()> {
    writeln!(out, "Looking for {} - {} = {}", name_a, name_b, format_delta(target))?;

    for m in &report.matches {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        let file_name = m.path.file_name().unwrap_or(m.path.as_os_str());
        write!(out, "{}", file_name.to_string_lossy())?;
        out.reset()?;
        writeln!(out, " {} - {} = {}", name_a, name_b, format_delta(m.delta))?;
    }

    Ok(())
}
