use std::process::Command;

const TOKEN: &str = "PID:";

/// Replace each `PID:<name>` with the pid `resolve` finds for `<name>`.
///
/// Names are `[A-Za-z0-9_.-]+`. Unresolved tokens stay as they are.
pub fn replace_pid_tokens<F>(command: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(command.len());
    let mut rest = command;

    while let Some(at) = rest.find(TOKEN) {
        out.push_str(&rest[..at]);
        let after = &rest[at + TOKEN.len()..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
            .unwrap_or(after.len());

        if name_len == 0 {
            out.push_str(TOKEN);
            rest = after;
            continue;
        }

        let name = &after[..name_len];
        match resolve(name) {
            Some(pid) => out.push_str(&pid),
            None => {
                tracing::warn!(process = name, "no pid found; leaving placeholder");
                out.push_str(&rest[at..at + TOKEN.len() + name_len]);
            }
        }
        rest = &after[name_len..];
    }

    out.push_str(rest);
    out
}

/// `pidof -s <name>`, or `None` if nothing matched or `pidof` is missing.
pub fn pidof(name: &str) -> Option<String> {
    let output = Command::new("pidof").arg("-s").arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let pid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!pid.is_empty()).then_some(pid)
}
