//! Prompt framing on the standard streams: newline- or RS-delimited reads
//! in serve mode, whole-stdin reads for a single shot.

use std::io::{BufRead, Read};


/// Default end-of-turn marker on stdout.
pub const END_SENTINEL: &[u8] = b"\n<<<NOX_END>>>\n";
/// ASCII record separator, the alternative turn delimiter.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Read one serve-mode prompt. `None` on end of input. The delimiter is
/// consumed; trailing `\r`/`\n` are stripped from the payload.
pub fn read_prompt<R: BufRead>(input: &mut R, use_rs: bool) -> std::io::Result<Option<String>> {
    let delimiter = if use_rs { RECORD_SEPARATOR } else { b'\n' };
    let mut buf = Vec::new();
    let n = input.read_until(delimiter, &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&delimiter) {
        buf.pop();
    }
    while matches!(buf.last(), Some(b'\r') | Some(b'\n')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// If stdin is not a TTY, read it fully as one prompt.
/// Returns `None` when stdin is a TTY or the input is empty/whitespace.
pub fn read_whole_stdin() -> std::io::Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    if buf.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(buf))
    }
}
