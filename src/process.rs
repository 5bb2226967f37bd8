use anyhow::{Context, Result, anyhow, bail, ensure};
use std::{
    io::Read,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run a command and return its stdout, killing it once `timeout` elapsed
pub fn output_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context(format!("failed to spawn {program}"))?;

    // drain stdout while waiting, a full pipe would block the child
    let reader = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut stdout = String::new();
            pipe.read_to_string(&mut stdout).map(|_| stdout)
        })
    });

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .context(format!("failed to wait for {program}"))?
        {
            break status;
        }

        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{program} did not finish within {timeout:?}");
        }

        thread::sleep(POLL_INTERVAL);
    };

    let stdout = match reader {
        Some(reader) => reader
            .join()
            .map_err(|_| anyhow!("output reader of {program} panicked"))?
            .context(format!("failed to read output of {program}"))?,
        None => String::new(),
    };

    ensure!(status.success(), "{program} exited with {status}");

    Ok(stdout)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_output_with_timeout_returns_stdout() {
        let out = output_with_timeout("echo", &["hello"], Duration::from_secs(2)).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_output_with_timeout_kills_slow_command() {
        let result = output_with_timeout("sleep", &["5"], Duration::from_millis(100));
        assert!(result.unwrap_err().to_string().contains("did not finish"));
    }

    #[test]
    fn test_output_with_timeout_reads_output_larger_than_pipe_buffer() {
        let out =
            output_with_timeout("head", &["-c", "200000", "/dev/zero"], Duration::from_secs(2))
                .unwrap();
        assert_eq!(out.len(), 200000);
    }

    #[test]
    fn test_output_with_timeout_missing_program() {
        let result =
            output_with_timeout("definitely-not-a-real-binary", &[], Duration::from_secs(1));
        assert!(result.unwrap_err().to_string().contains("failed to spawn"));
    }
}
