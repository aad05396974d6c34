use crate::sql::Session;
use anyhow::Result;
use std::io::{BufRead, Write};
use tracing::{debug, info};

/// Runs the statement loop over `input`, writing responses to `out`.
///
/// ## Input Rules
/// - Blank lines and lines starting with `--` are skipped.
/// - A statement may span several lines and ends at a line ending in `;`.
/// - `.EXIT` (no semicolon) or `QUIT;` ends the loop.
///
/// Each statement gets one response: the message from [`Session::execute`]
/// or `ERROR: <message>`. A statement that fails never ends the loop.
///
/// ## Example
/// ```text
/// > CREATE DATABASE db_1;
/// Database db_1 created.
/// > USE db_1;
/// Using database db_1.
/// > SELECT * FROM missing;
/// ERROR: table missing does not exist
/// > .EXIT
/// All done.
/// ```
///
/// When the input ends the session is closed, which rolls back a
/// transaction left open.
pub fn run<R: BufRead, W: Write>(session: &mut Session, input: R, out: &mut W) -> Result<()> {
    let mut buf = String::new();

    for line in input.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        if buf.is_empty() && trimmed.eq_ignore_ascii_case(".exit") {
            writeln!(out, "All done.")?;
            break;
        }

        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(trimmed);
        if !buf.ends_with(';') {
            continue;
        }

        let stmt = std::mem::take(&mut buf);
        if stmt.eq_ignore_ascii_case("QUIT;") {
            writeln!(out, "bye")?;
            break;
        }

        debug!(%stmt, "statement read");
        match session.execute(&stmt) {
            Ok(resp) => writeln!(out, "{resp}")?,
            Err(e) => writeln!(out, "ERROR: {e}")?,
        }
    }

    if !buf.trim().is_empty() {
        info!(pending = %buf, "input ended inside an unterminated statement");
    }
    session.close()?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use std::sync::Arc;

    fn run_script(script: &str) -> String {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(EngineConfig::with_data_dir(dir.path())).unwrap();
        let mut session = Session::new(Arc::new(engine));
        let mut out = Vec::new();
        run(&mut session, script.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn skips_comments_and_joins_lines() {
        let out = run_script(
            "-- setup\n\nCREATE DATABASE db_1;\nUSE db_1;\n\
             CREATE TABLE t (\n  a int,\n  b varchar(10)\n);\n.EXIT\n",
        );
        assert_eq!(
            out,
            "Database db_1 created.\nUsing database db_1.\nTable t created.\nAll done.\n"
        );
    }

    #[test]
    fn errors_do_not_stop_the_loop() {
        let out = run_script("USE nope;\nCREATE DATABASE d;\nQUIT;\nCREATE DATABASE e;\n");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ERROR: "));
        assert_eq!(lines[1], "Database d created.");
        assert_eq!(lines[2], "bye");
    }
}
