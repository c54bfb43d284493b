//! Program synthesis: turns a unit's code fragment into a complete program.
//!
//! Fragments are inserted verbatim. The marshalling identifiers (`event`,
//! `output`, `execute_unit`, the entry function and anything prefixed
//! `_scriptbox_`) are reserved; fragments must not redefine them.

use minijinja::{AutoEscape, Environment, UndefinedBehavior, context};
use serde::Serialize;

use crate::codec::{END_SENTINEL, START_SENTINEL};
use crate::error::Result;
use crate::unit::{SynthesisMode, Unit};

/// Path template used for file outputs that declare none.
pub const DEFAULT_OUTPUT_PATH_TEMPLATE: &str = "outputs/{{ unit }}/{{ invocation }}/{{ output }}";

const EMIT: &str = include_str!("scripts/emit.py");
const EXECUTE_UNIT: &str = include_str!("scripts/execute_unit.py");
const TYPED_HELPERS: &str = include_str!("scripts/typed_helpers.py");
const EVENT_OUTPUT: &str = include_str!("scripts/event_output.py");
const TYPED_FUNCTION: &str = include_str!("scripts/typed_function.py");
const INTROSPECT: &str = include_str!("scripts/introspect.py");
const HARNESS: &str = include_str!("scripts/harness.py");

/// Where `execute_unit` calls from inside a program are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackEndpoint {
    /// Base URL, e.g. `http://127.0.0.1:4321`.
    pub url: String,
    pub token: String,
}

pub type TemplateEnv = Environment<'static>;

/// Create the template environment with every embedded program template.
pub fn create_template_env() -> Result<TemplateEnv> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_keep_trailing_newline(true);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    env.add_template("emit.py", EMIT)?;
    env.add_template("execute_unit.py", EXECUTE_UNIT)?;
    env.add_template("typed_helpers.py", TYPED_HELPERS)?;
    env.add_template("event_output.py", EVENT_OUTPUT)?;
    env.add_template("typed_function.py", TYPED_FUNCTION)?;
    env.add_template("introspect.py", INTROSPECT)?;
    env.add_template("harness.py", HARNESS)?;
    Ok(env)
}

pub struct Synthesizer {
    env: TemplateEnv,
    entry_function: String,
}

impl Synthesizer {
    pub fn new(entry_function: impl Into<String>) -> Result<Self> {
        Ok(Self {
            env: create_template_env()?,
            entry_function: entry_function.into(),
        })
    }

    /// Program for running `unit` once with argument blobs in `argv[1]`
    /// (inputs) and `argv[2]` (pre-populated outputs).
    pub fn execution_program(
        &self,
        unit: &Unit,
        callback: Option<&CallbackEndpoint>,
        workspace_id: &str,
    ) -> Result<String> {
        match unit.mode {
            SynthesisMode::EventOutput => self.event_output(&unit.code, callback, workspace_id),
            SynthesisMode::TypedFunction => self.typed_function(&unit.code),
        }
    }

    /// Event/output mode: the fragment mutates `output` in place.
    pub fn event_output(
        &self,
        code: &str,
        callback: Option<&CallbackEndpoint>,
        workspace_id: &str,
    ) -> Result<String> {
        let template = self.env.get_template("event_output.py")?;
        Ok(template.render(context! {
            code => code,
            callback => callback,
            workspace_id => workspace_id,
            start => START_SENTINEL,
            end => END_SENTINEL,
        })?)
    }

    /// Typed-function mode: the entry function is called once with coerced
    /// arguments and its return value wrapped as `{"result": value}`.
    pub fn typed_function(&self, code: &str) -> Result<String> {
        let template = self.env.get_template("typed_function.py")?;
        Ok(template.render(context! {
            code => code,
            entry => self.entry_function,
            start => START_SENTINEL,
            end => END_SENTINEL,
        })?)
    }

    /// Program that prints the entry function's schema triple.
    pub fn introspection(&self, code: &str) -> Result<String> {
        let template = self.env.get_template("introspect.py")?;
        Ok(template.render(context! {
            code => code,
            entry => self.entry_function,
            start => START_SENTINEL,
            end => END_SENTINEL,
        })?)
    }

    /// Pytest harness wrapping the unit's code and its test code.
    pub fn harness(&self, unit: &Unit, test_code: &str, pytest_args: &[String]) -> Result<String> {
        let file_outputs: Vec<&str> = unit.file_outputs().map(|o| o.name.as_str()).collect();
        let template = self.env.get_template("harness.py")?;
        Ok(template.render(context! {
            code => unit.code,
            test_code => test_code,
            typed => unit.mode == SynthesisMode::TypedFunction,
            file_outputs => file_outputs,
            pytest_args => pytest_args,
        })?)
    }

    /// Render a file output's workspace-relative path.
    pub fn output_path(
        &self,
        template: &str,
        unit: &str,
        output: &str,
        invocation: &str,
    ) -> Result<String> {
        let template = if template.trim().is_empty() {
            DEFAULT_OUTPUT_PATH_TEMPLATE
        } else {
            template
        };
        Ok(self.env.render_str(
            template,
            context! {
                unit => unit,
                output => output,
                invocation => invocation,
            },
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{OutputDecl, TypeTag};

    fn synth() -> Synthesizer {
        Synthesizer::new("run").unwrap()
    }

    #[test]
    fn event_program_keeps_fragment_verbatim() {
        let code = "x = event['a']\n\nif x:\n    output['y'] = x  # {{ not a template }}";
        let program = synth().event_output(code, None, "w").unwrap();
        assert!(program.contains(code));
        assert!(program.contains("event = json.loads(sys.argv[1])"));
        assert!(program.contains("output = json.loads(sys.argv[2])"));
        assert!(program.contains("_SCRIPTBOX_CALLBACK = None"));
        assert!(program.trim_end().ends_with("_scriptbox_emit(output)"));
    }

    #[test]
    fn event_program_embeds_callback_endpoint() {
        let callback = CallbackEndpoint {
            url: "http://127.0.0.1:9000".to_string(),
            token: "secret".to_string(),
        };
        let program = synth()
            .event_output("pass", Some(&callback), "session-1")
            .unwrap();
        assert!(program.contains("\"url\": \"http://127.0.0.1:9000\""));
        assert!(program.contains("\"token\": \"secret\""));
        assert!(program.contains("\"workspace_id\": \"session-1\""));
        assert!(program.contains("def execute_unit(name, inputs):"));
    }

    #[test]
    fn typed_program_puts_fragment_first() {
        let code = "from __future__ import annotations\n\ndef run(a: int, b: int) -> int:\n    return a + b\n";
        let program = synth().typed_function(code).unwrap();
        assert!(program.starts_with(code));
        assert!(program.contains("globals().get(\"run\")"));
        assert!(program.trim_end().ends_with("_scriptbox_main()"));
    }

    #[test]
    fn entry_function_name_is_configurable() {
        let program = Synthesizer::new("main").unwrap().introspection("").unwrap();
        assert!(program.contains("name = \"main\""));
    }

    #[test]
    fn harness_wraps_event_code_and_prepares_file_outputs() {
        let mut unit = Unit::new("report", "output['report'] = 'x'\nprint(event)");
        unit.outputs.push(OutputDecl {
            name: "report".to_string(),
            tag: TypeTag::File,
            description: String::new(),
            path: String::new(),
        });
        let args = vec!["-v".to_string()];
        let program = synth()
            .harness(&unit, "def test_it(mock_output):\n    pass", &args)
            .unwrap();

        assert!(program.contains(
            "def execute_function(event, output):\n    output['report'] = 'x'\n    print(event)\n    return output"
        ));
        assert!(program.contains("output[\"report\"] = str(tmp_path / \"report\")"));
        assert!(program.contains("raise NotImplementedError("));
        assert!(program.contains("def test_it(mock_output):"));
        assert!(program.contains("pytest.main([\"-v\"] + [__file__])"));
    }

    #[test]
    fn harness_keeps_typed_code_at_module_level() {
        let mut unit = Unit::new("add", "def run(a: int) -> int:\n    return a");
        unit.mode = SynthesisMode::TypedFunction;
        let program = synth().harness(&unit, "", &[]).unwrap();
        assert!(program.starts_with("def run(a: int) -> int:\n    return a"));
        assert!(!program.contains("def execute_function"));
    }

    #[test]
    fn output_paths_render_templates() {
        let s = synth();
        assert_eq!(
            s.output_path("", "report", "chart", "ab12").unwrap(),
            "outputs/report/ab12/chart"
        );
        assert_eq!(
            s.output_path("charts/{{ unit }}-{{ output }}.png", "report", "chart", "ab12")
                .unwrap(),
            "charts/report-chart.png"
        );
        assert!(s.output_path("{{ missing }}", "u", "o", "i").is_err());
    }
}
