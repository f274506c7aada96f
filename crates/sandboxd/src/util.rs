//! Shell-safe quoting and bounded subprocess invocation.
//!
//! Grounded on the original `utils.py` (`q()`/`run()`), carried into
//! Rust as POSIX single-quote escaping plus a `wait_timeout`-style
//! helper over `std::process::Child`, following `binary_checker.rs`'s
//! use of `std::process::Command`.

use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

/// POSIX shell single-quote escaping: wraps `s` in single quotes,
/// escaping embedded `'` as `'\''`.
pub fn quote(s: &str) -> String {
    if !s.is_empty() && s.bytes().all(|b| is_shell_safe(b)) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

fn is_shell_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'/' | b':')
}

/// Runs `cmd` to completion, capturing stdout/stderr, and kills it if
/// it runs longer than `timeout`. Returns `None` on timeout.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> std::io::Result<Option<Output>> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child: Child = cmd.spawn()?;
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait()? {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            if let Some(mut out) = child.stdout.take() {
                use std::io::Read;
                let _ = out.read_to_end(&mut stdout);
            }
            if let Some(mut err) = child.stderr.take() {
                use std::io::Read;
                let _ = err.read_to_end(&mut stderr);
            }
            return Ok(Some(Output {
                status,
                stdout,
                stderr,
            }));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_plain_token_unchanged() {
        assert_eq!(quote("/usr/bin/python3"), "/usr/bin/python3");
    }

    #[test]
    fn quote_escapes_embedded_quote() {
        assert_eq!(quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn quote_wraps_whitespace() {
        assert_eq!(quote("a b"), "'a b'");
    }
}
