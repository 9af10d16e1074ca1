use std::{path::Path, process::Command};

use eyre::{eyre, Result, WrapErr};
use scribe_instrumenter::InstrumentationMetadata;

/// Name of the flattened output unit in the instrumenter's JSON output.
const FLATTENED: &str = "flattened.sol";

#[derive(Debug)]
pub struct ScribbleOutput {
    pub instrumented: String,
    pub metadata: InstrumentationMetadata,
}

/// Run `<cmd> <file> -m json -o --` and pick the flattened source and the metadata out of its
/// output. Any diagnostic on stderr counts as a failure.
pub fn run_scribble(cmd: &str, file: &Path) -> Result<ScribbleOutput> {
    debug!(%cmd, file = %file.display(), "running instrumenter");
    let output = Command::new(cmd)
        .arg(file)
        .args(["-m", "json", "-o", "--"])
        .output()
        .wrap_err_with(|| format!("failed to run `{cmd}`"))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        eyre::bail!("`{cmd}` reported errors:\n{stderr}");
    }
    if !output.status.success() {
        eyre::bail!("`{cmd}` failed: {}", output.status);
    }

    parse_output(&String::from_utf8(output.stdout)?)
}

fn parse_output(stdout: &str) -> Result<ScribbleOutput> {
    let mut json: serde_json::Value =
        serde_json::from_str(stdout).wrap_err("instrumenter output is not JSON")?;

    let instrumented = json["sources"][FLATTENED]["source"]
        .as_str()
        .ok_or_else(|| eyre!("no `{FLATTENED}` source in instrumenter output"))?
        .to_string();
    let metadata = json
        .get_mut("instrumentationMetadata")
        .map(serde_json::Value::take)
        .ok_or_else(|| eyre!("no instrumentation metadata in instrumenter output"))?;
    let metadata = serde_json::from_value(metadata).wrap_err("malformed instrumentation metadata")?;
    Ok(ScribbleOutput { instrumented, metadata })
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};

    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("scribble.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn reads_flattened_source_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        // Echo the arguments back so the invocation can be checked.
        let cmd = script(
            dir.path(),
            r#"printf '{"sources":{"flattened.sol":{"source":"%s"}},"instrumentationMetadata":{"instrToOriginalMap":[],"otherInstrumentation":["0:1:0"],"propertyMap":[],"originalSourceList":["a.sol"],"instrSourceList":["flattened.sol"]}}' "$*""#,
        );

        let output = run_scribble(cmd.to_str().unwrap(), Path::new("a.sol")).unwrap();
        assert_eq!(output.instrumented, "a.sol -m json -o --");
        assert_eq!(output.metadata.other_instrumentation, ["0:1:0"]);
        assert_eq!(output.metadata.original_source_list, ["a.sol"]);
    }

    #[test]
    fn rejects_failures() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "exit 3");
        let err = run_scribble(cmd.to_str().unwrap(), Path::new("a.sol")).unwrap_err();
        assert!(err.to_string().contains("failed"), "{err}");
    }

    #[test]
    fn rejects_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "echo 'unknown annotation' >&2\necho '{}'");
        let err = run_scribble(cmd.to_str().unwrap(), Path::new("a.sol")).unwrap_err();
        assert!(err.to_string().contains("unknown annotation"), "{err}");
    }

    #[test]
    fn missing_flattened_unit() {
        let err = parse_output(r#"{"sources":{}}"#).unwrap_err();
        assert!(err.to_string().contains("flattened.sol"), "{err}");
    }
}
