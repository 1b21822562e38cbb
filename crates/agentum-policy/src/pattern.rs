use regex::Regex;

/// A tool call formatted `ToolName(argument...)`, e.g. `Bash(git status)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall<'a> {
    pub tool: &'a str,
    pub argument: &'a str,
}

impl<'a> ToolCall<'a> {
    /// Split a call string into tool name and argument. Returns `None`
    /// for anything that is not of the documented shape; callers treat
    /// that as deny.
    pub fn parse(raw: &'a str) -> Option<Self> {
        let open = raw.find('(')?;
        if !raw.ends_with(')') || open == 0 {
            return None;
        }
        let tool = &raw[..open];
        if !tool.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        Some(Self {
            tool,
            argument: &raw[open + 1..raw.len() - 1],
        })
    }
}

/// Compile one allow/deny pattern into an anchored regex.
///
/// `**` matches across path separators. A single `*` is segment-scoped
/// when it sits in a path position (immediately after `/`) and otherwise
/// matches any characters, so `Bash(rm *)` covers `Bash(rm -rf /tmp)`
/// while `Write(/ws/*.yaml)` stays inside one directory. The
/// `{workspace}` placeholder is substituted before compilation. Returns
/// `None` when the compiled regex is rejected, which callers treat as
/// no-match (and the engine as deny overall).
pub fn compile_pattern(pattern: &str, workspace: &str) -> Option<Regex> {
    let substituted = pattern.replace("{workspace}", workspace);

    let mut regex = String::with_capacity(substituted.len() + 8);
    regex.push('^');

    let mut prev: Option<char> = None;
    let mut chars = substituted.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else if prev == Some('/') {
                    regex.push_str("[^/]*");
                } else {
                    regex.push_str(".*");
                }
            }
            _ => regex.push_str(&regex::escape(&c.to_string())),
        }
        prev = Some(c);
    }
    regex.push('$');

    Regex::new(&regex).ok()
}
