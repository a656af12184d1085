//! Handlebars-based command templates
//!
//! The script is rendered against the host's bindings; every resulting line
//! that is neither blank nor a `#` comment is one command.

use async_trait::async_trait;
use colored::Colorize;
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderErrorReason, no_escape,
};
use serde_json::{Map, Value};
use tracing::debug;

use super::{ScriptCompiler, ScriptEnv, ScriptError, ScriptProgram, ScriptSource};
use crate::domain::BindingSet;
use crate::engine::EngineHandle;
use crate::protocol::Session;

const TEMPLATE_NAME: &str = "script";
const FILENAME_VAR: &str = "__filename__";

/// Compiles handlebars templates into [`CommandScript`]s
#[derive(Debug, Clone, Default)]
pub struct TemplateCompiler {
    verbose: u8,
}

impl TemplateCompiler {
    pub fn new(verbose: u8) -> Self {
        Self { verbose }
    }

    fn registry(&self, engine: EngineHandle) -> Handlebars<'static> {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(no_escape);
        hbs.set_strict_mode(true);
        hbs.register_helper("hostvar", Box::new(HostVarHelper { engine }));
        hbs
    }

    fn compile_error(source: &ScriptSource, message: impl ToString) -> ScriptError {
        ScriptError::Compile {
            origin: source.origin_label().to_string(),
            message: message.to_string(),
        }
    }
}

impl ScriptCompiler for TemplateCompiler {
    fn compile(&self, source: &ScriptSource, env: ScriptEnv) -> Result<Box<dyn ScriptProgram>, ScriptError> {
        debug!(
            origin = %source.origin_label(),
            bindings = env.bindings.len(),
            wait = env.wait,
            "TemplateCompiler::compile: called"
        );
        let mut hbs = self.registry(env.engine);
        hbs.register_template_string(TEMPLATE_NAME, &source.code)
            .map_err(|e| Self::compile_error(source, e))?;

        let data = template_data(&env.bindings, source.origin.as_deref());
        let rendered = hbs
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| Self::compile_error(source, e))?;

        let commands = split_commands(&rendered);
        if self.verbose > 0 {
            for command in &commands {
                eprintln!("{} {}", "compiled:".dimmed(), command);
            }
        }
        debug!(commands = commands.len(), "TemplateCompiler::compile: complete");

        Ok(Box::new(CommandScript::new(commands, env.wait)))
    }
}

/// Single values render as strings, lists as arrays
fn template_data(bindings: &BindingSet, origin: Option<&str>) -> Value {
    let mut data = Map::new();
    for (name, values) in bindings.iter() {
        let value = match values.as_slice() {
            [single] => Value::String(single.clone()),
            many => Value::Array(many.iter().cloned().map(Value::String).collect()),
        };
        data.insert(name.clone(), value);
    }
    data.insert(
        FILENAME_VAR.to_string(),
        origin.map_or(Value::Null, |o| Value::String(o.to_string())),
    );
    Value::Object(data)
}

fn split_commands(rendered: &str) -> Vec<String> {
    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// `{{hostvar "host" "name"}}` reads another host's define
struct HostVarHelper {
    engine: EngineHandle,
}

impl HelperDef for HostVarHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let host = h
            .param(0)
            .and_then(|v| v.value().as_str())
            .ok_or(RenderErrorReason::ParamNotFoundForIndex("hostvar", 0))?;
        let name = h
            .param(1)
            .and_then(|v| v.value().as_str())
            .ok_or(RenderErrorReason::ParamNotFoundForIndex("hostvar", 1))?;

        if let Some(values) = self.engine.host_value(host, name) {
            out.write(&values.join(","))?;
        }
        Ok(())
    }
}

/// A rendered list of commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandScript {
    commands: Vec<String>,
    wait: bool,
}

impl CommandScript {
    /// With `wait`, each command waits for the prompt; otherwise it is only sent
    pub fn new(commands: Vec<String>, wait: bool) -> Self {
        Self { commands, wait }
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

#[async_trait]
impl ScriptProgram for CommandScript {
    async fn run(&mut self, session: &mut dyn Session) -> Result<(), ScriptError> {
        debug!(commands = self.commands.len(), wait = self.wait, "CommandScript::run: called");
        for command in &self.commands {
            if self.wait {
                session.execute(command).await?;
            } else {
                session.send(command).await?;
            }
        }
        Ok(())
    }
}
