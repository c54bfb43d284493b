//! Execution façade: validate, synthesize, spawn, decode.
//!
//! Every operation spawns exactly one child process and blocks until it
//! finishes. The engine holds no per-invocation state, so one instance can be
//! shared across threads.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::catalog::UnitCatalog;
use crate::cmd::ProcessOutput;
use crate::codec;
use crate::error::{EngineError, Result};
use crate::harness::PreparedHarness;
use crate::introspect::Introspection;
use crate::runner::{Invocation, ProgramRunner};
use crate::synth::{CallbackEndpoint, Synthesizer};
use crate::unit::{ExecutionResult, Unit};
use crate::validate::{apply_defaults, validate_inputs};
use crate::verdict::{self, Verdict};
use crate::workspace::{Workspace, WorkspaceStore};

/// Engine knobs resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Limit for execute and introspect runs; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Limit for test harness runs.
    pub test_timeout: Option<Duration>,
    pub entry_function: String,
    pub pytest_args: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            test_timeout: Some(Duration::from_secs(300)),
            entry_function: "run".to_string(),
            pytest_args: vec![
                "-v".to_string(),
                "-p".to_string(),
                "no:cacheprovider".to_string(),
            ],
        }
    }
}

pub struct Engine {
    runner: Arc<dyn ProgramRunner>,
    store: Arc<dyn WorkspaceStore>,
    synth: Synthesizer,
    settings: EngineSettings,
    callback: Option<CallbackEndpoint>,
}

impl Engine {
    pub fn new(
        runner: Arc<dyn ProgramRunner>,
        store: Arc<dyn WorkspaceStore>,
        settings: EngineSettings,
    ) -> Result<Self> {
        Ok(Self {
            synth: Synthesizer::new(settings.entry_function.clone())?,
            runner,
            store,
            settings,
            callback: None,
        })
    }

    /// Route `execute_unit` calls from event/output programs to `callback`.
    pub fn with_callback(mut self, callback: CallbackEndpoint) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &dyn WorkspaceStore {
        self.store.as_ref()
    }

    /// Run `unit` once against `inputs` in `workspace`.
    pub fn execute(
        &self,
        unit: &Unit,
        workspace: &Workspace,
        inputs: &JsonMap<String, JsonValue>,
    ) -> Result<ExecutionResult> {
        let args = apply_defaults(&unit.inputs, inputs);
        validate_inputs(&unit.inputs, &args, workspace)?;

        let invocation_id = random_hex(8)?;
        let provided = self.allocate_output_paths(unit, workspace, &invocation_id)?;
        let program = self
            .synth
            .execution_program(unit, self.callback.as_ref(), workspace.id())?;

        info!(
            unit = %unit.name,
            workspace = workspace.id(),
            invocation = %invocation_id,
            mode = ?unit.mode,
            "engine:execute"
        );
        let invocation = Invocation::inline(program, workspace.root())
            .arg(JsonValue::Object(args).to_string())
            .arg(JsonValue::Object(provided.clone()).to_string())
            .timeout(self.settings.timeout);
        let output = self.runner.run(&invocation)?;

        let payload = decode_result(&output)?;
        shape_result(unit, payload, &provided)
    }

    /// Resolve `unit_name` in `catalog` and execute it in `workspace_id`.
    pub fn execute_by_name(
        &self,
        catalog: &dyn UnitCatalog,
        unit_name: &str,
        workspace_id: &str,
        inputs: &JsonMap<String, JsonValue>,
    ) -> Result<ExecutionResult> {
        let unit = catalog
            .get_by_name(unit_name)
            .ok_or_else(|| EngineError::UnitNotFound(unit_name.to_string()))?;
        let workspace = self.store.resolve_directory(workspace_id)?;
        self.execute(&unit, &workspace, inputs)
    }

    /// Derive the input/output schema and docstring of a typed-function fragment.
    pub fn introspect(&self, code: &str) -> Result<Introspection> {
        let program = self.synth.introspection(code)?;
        let scratch = tempfile::Builder::new()
            .prefix("scriptbox-introspect-")
            .tempdir()
            .map_err(|e| EngineError::io("Failed to create introspection directory", e))?;

        let invocation = Invocation::inline(program, scratch.path()).timeout(self.settings.timeout);
        let output = self.runner.run(&invocation)?;
        let introspection = Introspection::from_payload(decode_result(&output)?)?;
        debug!(
            inputs = introspection.inputs().len(),
            "engine:introspect complete"
        );
        Ok(introspection)
    }

    /// Build the unit's test harness and run it.
    pub fn run_test(&self, unit: &Unit) -> Result<Verdict> {
        let harness = self.prepare_test(unit)?;
        self.run_prepared(&harness)
    }

    /// Write the unit's test harness to a temporary file without running it.
    pub fn prepare_test(&self, unit: &Unit) -> Result<PreparedHarness> {
        let test_code = unit
            .test_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| EngineError::MissingTestCode(unit.name.clone()))?;
        let program = self
            .synth
            .harness(unit, test_code, &self.settings.pytest_args)?;
        PreparedHarness::write(&program, &random_hex(6)?)
    }

    /// Run a prepared harness and classify the outcome.
    ///
    /// A failing or timed-out test run is a normal verdict; only failing to
    /// start the runner is an error.
    pub fn run_prepared(&self, harness: &PreparedHarness) -> Result<Verdict> {
        let invocation =
            Invocation::file(harness.path(), harness.dir()).timeout(self.settings.test_timeout);
        info!(harness = %harness.path().display(), "engine:test start");

        let verdict = match self.runner.spawn(&invocation) {
            Ok(output) => verdict::classify(output.exit_code, &output.stdout, &output.stderr),
            Err(EngineError::Timeout {
                after,
                stdout,
                stderr,
            }) => {
                warn!(after = ?after, "engine:test timed out");
                Verdict {
                    success: false,
                    exit_code: -1,
                    details: format!("Test run timed out after {}s", after.as_secs_f64()),
                    stdout,
                    stderr,
                }
            }
            Err(e) => return Err(e),
        };
        info!(success = verdict.success, details = %verdict.details, "engine:test done");
        Ok(verdict)
    }

    /// Render and create the target path of every file output.
    fn allocate_output_paths(
        &self,
        unit: &Unit,
        workspace: &Workspace,
        invocation_id: &str,
    ) -> Result<JsonMap<String, JsonValue>> {
        let mut provided = JsonMap::new();
        for decl in unit.file_outputs() {
            let relative =
                self.synth
                    .output_path(&decl.path, &unit.name, &decl.name, invocation_id)?;
            let absolute = workspace.resolve(&relative)?;
            if let Some(parent) = absolute.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    EngineError::io(
                        format!("Failed to create output directory {}", parent.display()),
                        e,
                    )
                })?;
            }
            provided.insert(decl.name.clone(), JsonValue::String(relative));
        }
        Ok(provided)
    }
}

/// Decode the result span of a cleanly exited program.
///
/// No span at all means the program never reached its emit step, which is an
/// execution failure; a malformed span stays a protocol error.
fn decode_result(output: &ProcessOutput) -> Result<JsonMap<String, JsonValue>> {
    codec::decode_object(&output.stdout).map_err(|e| {
        warn!(error = %e, "engine:result decode failed");
        if e.is_missing_span() {
            EngineError::execution(format!(
                "program exited without printing a result ({})",
                e
            ))
        } else {
            EngineError::from(e)
        }
    })
}

/// Keep exactly the declared output names.
fn shape_result(
    unit: &Unit,
    mut payload: JsonMap<String, JsonValue>,
    provided: &JsonMap<String, JsonValue>,
) -> Result<ExecutionResult> {
    if unit.outputs.is_empty() {
        return Ok(ExecutionResult::new(payload));
    }

    let mut shaped = JsonMap::new();
    for decl in &unit.outputs {
        let value = match payload.remove(&decl.name) {
            Some(value) => value,
            None => match provided.get(&decl.name) {
                Some(path) if decl.tag.is_file() => path.clone(),
                _ => {
                    return Err(EngineError::execution(format!(
                        "program did not produce declared output '{}'",
                        decl.name
                    )));
                }
            },
        };
        shaped.insert(decl.name.clone(), value);
    }

    if !payload.is_empty() {
        let extra: Vec<&String> = payload.keys().collect();
        debug!(unit = %unit.name, ?extra, "engine:dropped undeclared outputs");
    }
    Ok(ExecutionResult::new(shaped))
}

/// Random lowercase hex string of `bytes` random bytes.
pub fn random_hex(bytes: usize) -> Result<String> {
    let mut buf = vec![0u8; bytes];
    getrandom::fill(&mut buf).map_err(|e| {
        let source = std::io::Error::other(e.to_string());
        EngineError::io("Failed to gather randomness", source)
    })?;
    Ok(buf.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProtocolError;
    use crate::test_support::{FakeRunner, python_runner, pytest_runner};
    use crate::unit::{InputDecl, OutputDecl, SynthesisMode, TypeTag};
    use crate::workspace::LocalWorkspaceStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn input(name: &str, tag: TypeTag) -> InputDecl {
        InputDecl {
            name: name.to_string(),
            tag,
            description: String::new(),
            default: None,
        }
    }

    fn output(name: &str, tag: TypeTag) -> OutputDecl {
        OutputDecl {
            name: name.to_string(),
            tag,
            description: String::new(),
            path: String::new(),
        }
    }

    fn args(value: JsonValue) -> JsonMap<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    fn engine_with(runner: Arc<dyn ProgramRunner>, tmp: &TempDir) -> Engine {
        let store = Arc::new(LocalWorkspaceStore::new(tmp.path()));
        Engine::new(runner, store, EngineSettings::default()).unwrap()
    }

    fn add_unit() -> Unit {
        let mut unit = Unit::new("add", "output['sum'] = event['a'] + event['b']");
        unit.inputs = vec![input("a", TypeTag::Integer), input("b", TypeTag::Integer)];
        unit.outputs = vec![output("sum", TypeTag::Integer)];
        unit
    }

    #[test]
    fn test_validation_failure_never_spawns() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::replying("<$output> {} </$output>", 0));
        let engine = engine_with(runner.clone(), &tmp);
        let ws = engine.store().resolve_directory("w").unwrap();

        let err = engine
            .execute(&add_unit(), &ws, &args(json!({"a": 1})))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(runner.calls(), 0);
    }

    #[test]
    fn test_result_is_shaped_to_declared_outputs() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::replying(
            "debug\n<$output> {\"sum\": 3, \"scratch\": 1} </$output>\n",
            0,
        ));
        let engine = engine_with(runner.clone(), &tmp);
        let ws = engine.store().resolve_directory("w").unwrap();

        let result = engine
            .execute(&add_unit(), &ws, &args(json!({"a": 1, "b": 2})))
            .unwrap();
        assert_eq!(result.to_json(), json!({"sum": 3}));
        assert_eq!(runner.calls(), 1);

        let invocation = runner.last_invocation().unwrap();
        assert_eq!(invocation.workdir, ws.root());
        assert_eq!(invocation.args[0], "{\"a\":1,\"b\":2}");
        assert_eq!(invocation.args[1], "{}");
        assert_eq!(invocation.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_missing_declared_output_is_execution_error() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::replying("<$output> {} </$output>", 0));
        let engine = engine_with(runner, &tmp);
        let ws = engine.store().resolve_directory("w").unwrap();

        let err = engine
            .execute(&add_unit(), &ws, &args(json!({"a": 1, "b": 2})))
            .unwrap_err();
        assert!(err.to_string().contains("declared output 'sum'"));
    }

    #[test]
    fn test_missing_span_is_execution_error_and_bad_json_is_protocol_error() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalWorkspaceStore::new(tmp.path()));
        let inputs = args(json!({"a": 1, "b": 2}));

        let engine = Engine::new(
            Arc::new(FakeRunner::replying("just noise", 0)),
            store.clone(),
            EngineSettings::default(),
        )
        .unwrap();
        let ws = store.resolve_directory("w").unwrap();
        let err = engine.execute(&add_unit(), &ws, &inputs).unwrap_err();
        assert!(matches!(err, EngineError::Execution { .. }));

        let engine = Engine::new(
            Arc::new(FakeRunner::replying("<$output> {oops </$output>", 0)),
            store,
            EngineSettings::default(),
        )
        .unwrap();
        let err = engine.execute(&add_unit(), &ws, &inputs).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::InvalidJson { .. })
        ));
    }

    #[test]
    fn test_non_zero_exit_carries_stderr() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::failing("Traceback: KeyError: 'a'", 1));
        let engine = engine_with(runner, &tmp);
        let ws = engine.store().resolve_directory("w").unwrap();
        let err = engine
            .execute(&add_unit(), &ws, &args(json!({"a": 1, "b": 2})))
            .unwrap_err();
        assert_eq!(err.to_string(), "Error running code: Traceback: KeyError: 'a'");
    }

    #[test]
    fn test_unknown_unit_by_name() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(FakeRunner::replying("", 0)), &tmp);
        let catalog = crate::catalog::InMemoryCatalog::new();
        let err = engine
            .execute_by_name(&catalog, "nope", "w", &JsonMap::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnitNotFound(name) if name == "nope"));
    }

    #[test]
    fn test_missing_test_code() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(FakeRunner::replying("", 0)), &tmp);
        let err = engine.run_test(&add_unit()).unwrap_err();
        assert!(matches!(err, EngineError::MissingTestCode(_)));
    }

    #[test]
    fn test_harness_file_is_gone_after_run_test() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::replying("=== 3 failed, 2 passed in 0.1s ===", 0));
        let engine = engine_with(runner.clone(), &tmp);
        let mut unit = add_unit();
        unit.test_code = Some("def test_add():\n    assert True".to_string());

        let verdict = engine.run_test(&unit).unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.details, "3 failed");

        let harness_path = runner.last_program_path().unwrap();
        assert!(runner.program_existed_during_call());
        assert!(!harness_path.exists());
    }

    #[test]
    fn test_harness_file_is_gone_after_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::unspawnable());
        let engine = engine_with(runner.clone(), &tmp);
        let mut unit = add_unit();
        unit.test_code = Some("def test_add():\n    assert True".to_string());

        assert!(matches!(engine.run_test(&unit), Err(EngineError::Spawn { .. })));
        assert!(!runner.last_program_path().unwrap().exists());
    }

    #[test]
    fn test_timed_out_test_run_is_a_failure_verdict() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::timing_out("partial", Duration::from_secs(2)));
        let engine = engine_with(runner, &tmp);
        let mut unit = add_unit();
        unit.test_code = Some("def test_add():\n    assert True".to_string());

        let verdict = engine.run_test(&unit).unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.exit_code, -1);
        assert_eq!(verdict.details, "Test run timed out after 2s");
        assert_eq!(verdict.stdout, "partial");
    }

    #[test]
    fn test_python_event_mode_execution() {
        let Some(python) = python_runner() else {
            return;
        };
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(python), &tmp);
        let ws = engine.store().resolve_directory("w").unwrap();

        let mut unit = add_unit();
        unit.code = "print('debug noise')\noutput['sum'] = event['a'] + event['b']".to_string();
        let result = engine
            .execute(&unit, &ws, &args(json!({"a": 2, "b": 3})))
            .unwrap();
        assert_eq!(result.to_json(), json!({"sum": 5}));
    }

    #[test]
    fn test_python_typed_mode_execution() {
        let Some(python) = python_runner() else {
            return;
        };
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(python), &tmp);
        let ws = engine.store().resolve_directory("w").unwrap();

        let mut unit = Unit::new("add", "def run(a: int, b: int) -> int:\n    return a + b\n");
        unit.mode = SynthesisMode::TypedFunction;
        let result = engine
            .execute(&unit, &ws, &args(json!({"a": 2, "b": 3})))
            .unwrap();
        assert_eq!(result.to_json(), json!({"result": 5}));
    }

    #[test]
    fn test_python_file_output_is_written_in_the_workspace() {
        let Some(python) = python_runner() else {
            return;
        };
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(python), &tmp);
        let ws = engine.store().resolve_directory("w").unwrap();

        let mut unit = Unit::new(
            "report",
            "with open(output['report'], 'w') as f:\n    f.write('total=' + str(event['n']))",
        );
        unit.inputs = vec![input("n", TypeTag::Integer)];
        let mut decl = output("report", TypeTag::File);
        decl.path = "reports/{{ unit }}-{{ invocation }}.txt".to_string();
        unit.outputs = vec![decl];

        let result = engine.execute(&unit, &ws, &args(json!({"n": 4}))).unwrap();
        let path = result.get("report").and_then(|v| v.as_str()).unwrap();
        assert!(path.starts_with("reports/report-"));
        assert_eq!(
            fs::read_to_string(ws.root().join(path)).unwrap(),
            "total=4"
        );
    }

    #[test]
    fn test_python_introspection() {
        let Some(python) = python_runner() else {
            return;
        };
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(python), &tmp);

        let code = r#"
from typing import List, Optional

def run(values: List[int], scale: float = 1.0, label: Optional[str] = None) -> float:
    """Sum and scale values.

    Args:
        values: Numbers to add up.
        scale: Multiplier applied to
            the total.
        label: Unused tag.
    """
    return sum(values) * scale
"#;
        let introspection = engine.introspect(code).unwrap();
        let inputs = introspection.inputs();
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[0].name, "values");
        assert_eq!(inputs[0].tag, TypeTag::List);
        assert_eq!(inputs[0].description, "Numbers to add up.");
        assert_eq!(inputs[1].tag, TypeTag::Float);
        assert_eq!(inputs[1].description, "Multiplier applied to the total.");
        assert_eq!(inputs[1].default, Some(json!(1.0)));
        assert_eq!(inputs[2].tag, TypeTag::String);

        let outputs = introspection.outputs();
        assert_eq!(outputs[0].name, "result");
        assert_eq!(outputs[0].tag, TypeTag::Float);
        assert!(introspection.docstring.unwrap().starts_with("Sum and scale values."));
    }

    #[test]
    fn test_python_introspected_none_default_can_be_omitted() {
        let Some(python) = python_runner() else {
            return;
        };
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(python), &tmp);
        let ws = engine.store().resolve_directory("w").unwrap();

        let code = "from typing import Optional\n\n\ndef run(a: int, label: Optional[str] = None) -> str:\n    return '%d:%s' % (a, label)\n";
        let introspection = engine.introspect(code).unwrap();
        let mut unit = Unit::new("tag", code);
        unit.apply_introspection(&introspection);
        assert!(unit.inputs[1].is_nullable());

        let result = engine.execute(&unit, &ws, &args(json!({"a": 2}))).unwrap();
        assert_eq!(result.to_json(), json!({"result": "2:None"}));

        let err = engine.execute(&unit, &ws, &args(json!({}))).unwrap_err();
        assert!(matches!(err, EngineError::Validation(ref v) if v.violations == ["a value is not set"]));
    }

    #[test]
    fn test_python_introspection_requires_annotations() {
        let Some(python) = python_runner() else {
            return;
        };
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(python), &tmp);

        let err = engine.introspect("def run(a, b: int) -> int:\n    return b\n").unwrap_err();
        assert!(matches!(err, EngineError::Introspection(ref m) if m.contains("a")));

        let err = engine.introspect("def run(a: int):\n    return a\n").unwrap_err();
        assert!(matches!(err, EngineError::Introspection(_)));
    }

    #[test]
    fn test_pytest_verdicts() {
        let Some(python) = pytest_runner() else {
            return;
        };
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(python), &tmp);

        let mut unit = add_unit();
        unit.test_code = Some(
            "def test_add(mock_output):\n    out = execute_function({'a': 1, 'b': 2}, mock_output)\n    assert out['sum'] == 3\n"
                .to_string(),
        );
        let verdict = engine.run_test(&unit).unwrap();
        assert!(verdict.success, "{}", verdict.stdout);
        assert_eq!(verdict.exit_code, 0);
        assert!(verdict.details.contains("1 passed"));

        unit.test_code = Some(
            "def test_wrong(mock_output):\n    assert execute_function({'a': 1, 'b': 2}, mock_output)['sum'] == 4\n"
                .to_string(),
        );
        let verdict = engine.run_test(&unit).unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.exit_code, 1);

        unit.test_code = Some("def helper():\n    pass\n".to_string());
        let verdict = engine.run_test(&unit).unwrap();
        assert_eq!(verdict.exit_code, 5);
        assert_eq!(verdict.details, "No tests were collected");
    }

    #[test]
    fn test_pytest_execute_unit_stub_raises() {
        let Some(python) = pytest_runner() else {
            return;
        };
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(python), &tmp);

        let mut unit = Unit::new("caller", "output['x'] = execute_unit('other', {})['y']");
        unit.test_code = Some(
            "import pytest\n\ndef test_stub(mock_output):\n    with pytest.raises(NotImplementedError):\n        execute_function({}, mock_output)\n"
                .to_string(),
        );
        let verdict = engine.run_test(&unit).unwrap();
        assert!(verdict.success, "{}", verdict.stdout);
    }
}
