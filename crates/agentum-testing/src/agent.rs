//! Fake agent executables for supervisor tests.
//!
//! Each helper writes a small shell script that prints event records
//! (one JSON object per line, `{"type": ..., "data": ...}`) the way the
//! real agent child does, then exits. Scripts ignore the arguments the
//! supervisor passes.

use std::path::{Path, PathBuf};

/// Write an executable script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write agent script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod agent script");
    }
    path
}

/// Emits a full happy-path run: `agent_start` (with a resume id), one
/// tool round-trip, a partial plus final message, and `agent_complete`.
/// Also drops an `output.yaml` into the current directory (the workspace).
pub fn happy_agent(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "happy-agent",
        r#"#!/bin/sh
echo '{"type":"agent_start","data":{"session_id":"self","model":"test-model","tools":["Bash","Write"],"working_dir":".","task":"scripted","resume_id":"resume-token-1"}}'
sleep 0.5
echo '{"type":"tool_start","data":{"tool_name":"Write","tool_input":{"file_path":"./out.yaml"},"tool_id":"t_1"}}'
printf 'result: ok\n' > output.yaml
echo '{"type":"tool_complete","data":{"tool_name":"Write","tool_id":"t_1","result":"written","duration_ms":5,"is_error":false}}'
echo '{"type":"message","data":{"text":"writing","is_partial":true}}'
echo '{"type":"message","data":{"text":" done","is_partial":false,"full_text":"writing done"}}'
echo '{"type":"metrics_update","data":{"turns":1,"tokens_in":100,"tokens_out":20,"total_cost_usd":0.01,"model":"test-model"}}'
echo '{"type":"agent_complete","data":{"status":"complete","num_turns":1,"duration_ms":42,"total_cost_usd":0.01,"usage":{"input_tokens":100,"output_tokens":20},"model":"test-model"}}'
"#,
    )
}

/// Emits `agent_start` then sleeps; used for cancel and timeout tests.
/// Exits on SIGTERM like a well-behaved agent. `exec` keeps a single
/// process owning the stdout pipe, so termination closes the stream
/// immediately instead of leaving an orphan holding the write end.
pub fn slow_agent(dir: &Path, sleep_secs: u32) -> PathBuf {
    write_script(
        dir,
        "slow-agent",
        &format!(
            r#"#!/bin/sh
echo '{{"type":"agent_start","data":{{"session_id":"self","model":"test-model","tools":[],"working_dir":".","task":"scripted","resume_id":"resume-token-2"}}}}'
echo '{{"type":"tool_start","data":{{"tool_name":"Bash","tool_input":{{"command":"sleep"}},"tool_id":"t_1"}}}}'
exec sleep {}
"#,
            sleep_secs
        ),
    )
}

/// Emits a couple of records then dies with a non-zero exit and no
/// `agent_complete`.
pub fn crash_agent(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "crash-agent",
        r#"#!/bin/sh
echo '{"type":"agent_start","data":{"session_id":"self","model":"test-model","tools":[],"working_dir":".","task":"scripted"}}'
echo '{"type":"thinking","data":{"text":"about to go wrong"}}'
exit 3
"#,
    )
}

/// Interleaves malformed lines with valid records; the stream must
/// survive to the final `agent_complete`.
pub fn garbage_agent(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "garbage-agent",
        r#"#!/bin/sh
echo '{"type":"agent_start","data":{"session_id":"self","model":"test-model","tools":[],"working_dir":".","task":"scripted"}}'
echo 'this is not json'
echo '{"type":"unknown_kind","data":{}}'
echo '{"truncated":'
echo '{"type":"message","data":{"text":"still here","is_partial":false,"full_text":"still here"}}'
echo '{"type":"agent_complete","data":{"status":"complete","num_turns":1,"duration_ms":1,"total_cost_usd":0,"usage":{},"model":"test-model"}}'
"#,
    )
}

/// Emits denied tool calls in a loop so the permission audit escalates
/// to an interrupt; never completes on its own.
pub fn denied_loop_agent(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "denied-loop-agent",
        r#"#!/bin/sh
echo '{"type":"agent_start","data":{"session_id":"self","model":"test-model","tools":["Bash"],"working_dir":".","task":"scripted"}}'
i=0
while [ $i -lt 50 ]; do
  echo '{"type":"tool_start","data":{"tool_name":"Bash","tool_input":{"command":"rm -rf /"},"tool_id":"t_loop"}}'
  i=$((i+1))
  sleep 0.1
done
"#,
    )
}
